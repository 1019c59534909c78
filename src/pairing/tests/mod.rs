mod setup;

use super::*;
use crate::testing::pairing::{ControllerIdentity, PairSetupClient, PairedAccessory};

pub(super) const SETUP_CODE: &str = "031-45-154";

pub(super) struct Fixture {
    pub identity: AccessoryIdentity,
    pub store: MemoryIdentityStore,
    pub setup: SetupCoordinator,
    pub allow_insecure: bool,
    pub connection_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_setup(SetupCoordinator::new())
    }

    pub fn with_setup(setup: SetupCoordinator) -> Self {
        Self {
            identity: AccessoryIdentity::new("AA:BB:CC:DD:EE:FF", SETUP_CODE),
            store: MemoryIdentityStore::new(),
            setup,
            allow_insecure: false,
            connection_id: Uuid::new_v4(),
        }
    }

    pub fn ctx(&self) -> PairingContext<'_> {
        self.ctx_for(self.connection_id)
    }

    pub fn ctx_for(&self, connection_id: Uuid) -> PairingContext<'_> {
        PairingContext {
            identity: &self.identity,
            store: &self.store,
            setup: &self.setup,
            allow_insecure: self.allow_insecure,
            connection_id,
        }
    }

    /// Run a full Pair-Setup for `controller` and return what it learned
    pub async fn pair(&self, controller: &ControllerIdentity) -> PairedAccessory {
        let mut machine = PairSetup::new();
        let mut client = PairSetupClient::new(controller.clone(), SETUP_CODE);
        let ctx = self.ctx();

        let m2 = machine.handle(&ctx, &client.start()).await;
        let m3 = client.process_m2(&m2.body).unwrap();
        let m4 = machine.handle(&ctx, &m3).await;
        let m5 = client.process_m4(&m4.body).unwrap();
        let m6 = machine.handle(&ctx, &m5).await;
        client.process_m6(&m6.body).unwrap()
    }
}

pub(super) fn error_of(body: &[u8]) -> (u8, Option<u8>) {
    let tlv = TlvDecoder::decode(body).unwrap();
    (tlv.get_state().unwrap(), tlv.get_error())
}

use crate::protocol::tlv::TlvDecoder;
