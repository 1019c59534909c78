//! Controller side of Pair-Setup and Pair-Verify

use zeroize::Zeroizing;

use super::ControllerError;
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, Nonce,
    SrpClient, SrpParams, SrpVerifier, X25519KeyPair, X25519PublicKey, derive_key_fixed,
};
use crate::protocol::tlv::{TlvDecoder, TlvEncoder, TlvType, methods};

/// Long-term identity of a simulated controller
#[derive(Debug, Clone)]
pub struct ControllerIdentity {
    /// Pairing username
    pub username: String,
    /// Long-term Ed25519 key pair
    pub keypair: Ed25519KeyPair,
}

impl ControllerIdentity {
    /// Create an identity with a fresh key pair
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            keypair: Ed25519KeyPair::generate(),
        }
    }

    /// Long-term public key bytes
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        *self.keypair.public_key().as_bytes()
    }
}

/// What the controller learns about the accessory from Pair-Setup
#[derive(Debug, Clone)]
pub struct PairedAccessory {
    /// Accessory pairing identifier
    pub device_id: String,
    /// Accessory long-term public key
    pub public_key: Ed25519PublicKey,
}

fn expect_state(tlv: &TlvDecoder, expected: u8) -> Result<(), ControllerError> {
    if let Some(code) = tlv.get_error() {
        return Err(ControllerError::Rejected {
            state: tlv.get_u8(TlvType::State).unwrap_or(0),
            code,
        });
    }
    let state = tlv.get_state()?;
    if state != expected {
        return Err(ControllerError::Protocol(format!(
            "expected state {expected}, got {state}"
        )));
    }
    Ok(())
}

/// Controller Pair-Setup driver (sans-IO)
pub struct PairSetupClient {
    identity: ControllerIdentity,
    setup_code: String,
    verifier: Option<SrpVerifier>,
    session_key: Option<Zeroizing<Vec<u8>>>,
}

impl PairSetupClient {
    /// Create a client that will prove knowledge of `setup_code`
    #[must_use]
    pub fn new(identity: ControllerIdentity, setup_code: impl Into<String>) -> Self {
        Self {
            identity,
            setup_code: setup_code.into(),
            verifier: None,
            session_key: None,
        }
    }

    /// M1 body
    #[must_use]
    pub fn start(&self) -> Vec<u8> {
        TlvEncoder::new()
            .add_state(1)
            .add_method(methods::PAIR_SETUP)
            .build()
    }

    /// Consume M2, produce M3
    ///
    /// # Errors
    /// Returns error if the accessory rejected M1 or M2 is malformed.
    pub fn process_m2(&mut self, m2: &[u8]) -> Result<Vec<u8>, ControllerError> {
        let tlv = TlvDecoder::decode(m2)?;
        expect_state(&tlv, 2)?;
        let salt = tlv.get_required(TlvType::Salt)?;
        let server_public = tlv.get_required(TlvType::PublicKey)?;

        let client = SrpClient::new(&SrpParams::RFC5054_3072)?;
        let verifier = client.process_challenge(
            b"Pair-Setup",
            self.setup_code.as_bytes(),
            salt,
            server_public,
        )?;
        let m3 = TlvEncoder::new()
            .add_state(3)
            .add(TlvType::PublicKey, client.public_key())
            .add(TlvType::Proof, verifier.client_proof())
            .build();
        self.verifier = Some(verifier);
        Ok(m3)
    }

    /// Consume M4, produce M5
    ///
    /// # Errors
    /// Returns error if the accessory rejected the proof or its own proof is wrong.
    pub fn process_m4(&mut self, m4: &[u8]) -> Result<Vec<u8>, ControllerError> {
        let tlv = TlvDecoder::decode(m4)?;
        expect_state(&tlv, 4)?;
        let verifier = self
            .verifier
            .take()
            .ok_or_else(|| ControllerError::Protocol("M4 before M2".to_string()))?;
        let session_key = verifier.verify_server(tlv.get_required(TlvType::Proof)?)?;
        let k = session_key.as_bytes();

        let x = derive_key_fixed(
            b"Pair-Setup-Controller-Sign-Salt",
            k,
            b"Pair-Setup-Controller-Sign-Info",
        )?;
        let ltpk = self.identity.public_key();
        let mut info = x.to_vec();
        info.extend_from_slice(self.identity.username.as_bytes());
        info.extend_from_slice(&ltpk);
        let signature = self.identity.keypair.sign(&info);

        let sub = TlvEncoder::new()
            .add(TlvType::Identifier, self.identity.username.as_bytes())
            .add(TlvType::PublicKey, &ltpk)
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let key = derive_key_fixed(b"Pair-Setup-Encrypt-Salt", k, b"Pair-Setup-Encrypt-Info")?;
        let sealed =
            ChaCha20Poly1305Cipher::new(&key)?.encrypt(&Nonce::from_label(b"PS-Msg05"), &sub)?;

        self.session_key = Some(Zeroizing::new(k.to_vec()));
        Ok(TlvEncoder::new()
            .add_state(5)
            .add(TlvType::EncryptedData, &sealed)
            .build())
    }

    /// Consume M6 and check the accessory signature
    ///
    /// # Errors
    /// Returns error if M6 cannot be opened or the signature does not verify.
    pub fn process_m6(&mut self, m6: &[u8]) -> Result<PairedAccessory, ControllerError> {
        let tlv = TlvDecoder::decode(m6)?;
        expect_state(&tlv, 6)?;
        let k = self
            .session_key
            .take()
            .ok_or_else(|| ControllerError::Protocol("M6 before M4".to_string()))?;

        let key = derive_key_fixed(b"Pair-Setup-Encrypt-Salt", &k, b"Pair-Setup-Encrypt-Info")?;
        let plaintext = ChaCha20Poly1305Cipher::new(&key)?.decrypt(
            &Nonce::from_label(b"PS-Msg06"),
            tlv.get_required(TlvType::EncryptedData)?,
        )?;
        let sub = TlvDecoder::decode(&plaintext)?;
        let device_id = String::from_utf8(sub.get_required(TlvType::Identifier)?.to_vec())
            .map_err(|_| ControllerError::Protocol("identifier is not UTF-8".to_string()))?;
        let public_key = Ed25519PublicKey::from_bytes(sub.get_required(TlvType::PublicKey)?)?;
        let signature = Ed25519Signature::from_bytes(sub.get_required(TlvType::Signature)?)?;

        let x = derive_key_fixed(
            b"Pair-Setup-Accessory-Sign-Salt",
            &k,
            b"Pair-Setup-Accessory-Sign-Info",
        )?;
        let mut info = x.to_vec();
        info.extend_from_slice(device_id.as_bytes());
        info.extend_from_slice(public_key.as_bytes());
        public_key.verify(&info, &signature)?;

        Ok(PairedAccessory {
            device_id,
            public_key,
        })
    }
}

/// Controller Pair-Verify driver (sans-IO)
pub struct PairVerifyClient {
    identity: ControllerIdentity,
    ephemeral: X25519KeyPair,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
}

impl PairVerifyClient {
    /// Create a client with a fresh ephemeral key
    #[must_use]
    pub fn new(identity: ControllerIdentity) -> Self {
        Self {
            identity,
            ephemeral: X25519KeyPair::generate(),
            shared_secret: None,
        }
    }

    /// M1 body
    #[must_use]
    pub fn start(&self) -> Vec<u8> {
        TlvEncoder::new()
            .add_state(1)
            .add(TlvType::PublicKey, self.ephemeral.public_key().as_bytes())
            .build()
    }

    /// Consume M2, check the accessory proof against `accessory`, produce M3
    ///
    /// # Errors
    /// Returns error if M2 cannot be opened or the accessory signature is wrong.
    pub fn process_m2(
        &mut self,
        m2: &[u8],
        accessory: &PairedAccessory,
    ) -> Result<Vec<u8>, ControllerError> {
        let tlv = TlvDecoder::decode(m2)?;
        expect_state(&tlv, 2)?;
        let accessory_public = X25519PublicKey::from_bytes(tlv.get_required(TlvType::PublicKey)?)?;
        let shared = self.ephemeral.diffie_hellman(&accessory_public);
        let shared_secret = Zeroizing::new(*shared.as_bytes());

        let key = derive_key_fixed(
            b"Pair-Verify-Encrypt-Salt",
            &shared_secret[..],
            b"Pair-Verify-Encrypt-Info",
        )?;
        let cipher = ChaCha20Poly1305Cipher::new(&key)?;
        let plaintext = cipher.decrypt(
            &Nonce::from_label(b"PV-Msg02"),
            tlv.get_required(TlvType::EncryptedData)?,
        )?;
        let sub = TlvDecoder::decode(&plaintext)?;
        let device_id = sub.get_required(TlvType::Identifier)?;
        if device_id != accessory.device_id.as_bytes() {
            return Err(ControllerError::Protocol("unexpected accessory id".to_string()));
        }
        let signature = Ed25519Signature::from_bytes(sub.get_required(TlvType::Signature)?)?;
        let own_public = self.ephemeral.public_key();
        let mut info = accessory_public.as_bytes().to_vec();
        info.extend_from_slice(device_id);
        info.extend_from_slice(own_public.as_bytes());
        accessory.public_key.verify(&info, &signature)?;

        let mut proof = own_public.as_bytes().to_vec();
        proof.extend_from_slice(self.identity.username.as_bytes());
        proof.extend_from_slice(accessory_public.as_bytes());
        let own_signature = self.identity.keypair.sign(&proof);

        let sub = TlvEncoder::new()
            .add(TlvType::Identifier, self.identity.username.as_bytes())
            .add(TlvType::Signature, &own_signature.to_bytes())
            .build();
        let sealed = cipher.encrypt(&Nonce::from_label(b"PV-Msg03"), &sub)?;

        self.shared_secret = Some(shared_secret);
        Ok(TlvEncoder::new()
            .add_state(3)
            .add(TlvType::EncryptedData, &sealed)
            .build())
    }

    /// Shared secret computed from M2, available before M4 arrives
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        self.shared_secret.as_ref().map(|s| &s[..])
    }

    /// Consume M4; returns the shared secret the traffic keys derive from
    ///
    /// # Errors
    /// Returns error if the accessory rejected M3.
    pub fn process_m4(&mut self, m4: &[u8]) -> Result<Zeroizing<[u8; 32]>, ControllerError> {
        let tlv = TlvDecoder::decode(m4)?;
        expect_state(&tlv, 4)?;
        self.shared_secret
            .take()
            .ok_or_else(|| ControllerError::Protocol("M4 before M2".to_string()))
    }
}
