use std::time::Duration;

use crate::server::{ConfigError, HapConfig};

#[test]
fn test_default_config_is_valid() {
    let config = HapConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.port, 51826);
    assert_eq!(config.event_batch_delay, Duration::from_millis(250));
    assert_eq!(config.idle_connection_limit, 16);
    assert_eq!(config.max_idle_time, Duration::from_secs(3600));
    assert_eq!(config.handshake_timeout, Duration::from_secs(60));
    assert_eq!(config.data_stream.connect_timeout, Duration::from_secs(10));
}

#[test]
fn test_generated_device_ids_differ() {
    let a = HapConfig::default();
    let b = HapConfig::default();
    assert_eq!(a.device_id.len(), 17);
    assert_ne!(a.device_id, b.device_id);
}

#[test]
fn test_invalid_device_id() {
    let config = HapConfig::default().with_device_id("AA:BB:CC:DD:EE");
    assert!(matches!(config.validate(), Err(ConfigError::InvalidDeviceId(_))));

    let config = HapConfig::default().with_device_id("AA:BB:CC:DD:EE:GG");
    assert!(matches!(config.validate(), Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_setup_code_format() {
    for code in ["03145154", "031-45-15", "031-45-15a", "03-145-154"] {
        let config = HapConfig::new(code);
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidSetupCode(_))),
            "{code} accepted"
        );
    }
    assert!(HapConfig::new("482-91-736").validate().is_ok());
}

#[test]
fn test_trivial_setup_codes_rejected() {
    for code in ["000-00-000", "555-55-555", "123-45-678", "876-54-321"] {
        assert!(HapConfig::new(code).validate().is_err(), "{code} accepted");
    }
}

#[test]
fn test_zero_timings_rejected() {
    let config = HapConfig::default().with_event_batch_delay(Duration::ZERO);
    assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));

    let config = HapConfig::default().with_handshake_timeout(Duration::ZERO);
    assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));
}

#[test]
fn test_builder_chain() {
    let config = HapConfig::new("482-91-736")
        .with_port(0)
        .with_device_id("12:34:56:78:9A:BC")
        .with_insecure_pairing()
        .with_idle_limits(2, Duration::from_secs(5));
    assert_eq!(config.port, 0);
    assert_eq!(config.device_id, "12:34:56:78:9A:BC");
    assert!(config.allow_insecure_pairing);
    assert_eq!(config.idle_connection_limit, 2);
    assert_eq!(config.max_idle_time, Duration::from_secs(5));
}
