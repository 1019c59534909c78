//! SRP-6a (RFC 5054 3072-bit group, SHA-512) as used by HAP Pair-Setup
//!
//! The accessory plays the server role. A client is kept alongside for the
//! simulated controller and the tests.

use super::{CryptoError, constant_time_eq};
use num_bigint::{BigUint, RandomBits};
use num_traits::Zero;
use rand::Rng;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

const N_3072_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
    8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
    302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
    A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
    49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
    FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
    180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
    3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D\
    04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D\
    B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226\
    1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
    BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC\
    E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

/// SRP group parameters
#[derive(Debug, Clone, Copy)]
pub struct SrpParams {
    modulus_hex: &'static [u8],
    generator: u32,
}

impl SrpParams {
    /// RFC 5054 3072-bit group with generator 5
    pub const RFC5054_3072: Self = Self {
        modulus_hex: N_3072_HEX,
        generator: 5,
    };

    fn group(&self) -> Result<Group, CryptoError> {
        let hex: Vec<u8> = self
            .modulus_hex
            .iter()
            .copied()
            .filter(u8::is_ascii_hexdigit)
            .collect();
        let n = BigUint::parse_bytes(&hex, 16)
            .ok_or_else(|| CryptoError::SrpError("failed to parse N".to_string()))?;
        let g = BigUint::from(self.generator);
        let len = n.to_bytes_be().len();

        let mut group = Group {
            n,
            g,
            k: BigUint::zero(),
            len,
        };
        // k = H(N | PAD(g))
        group.k = BigUint::from_bytes_be(&Sha512::new()
            .chain_update(group.n.to_bytes_be())
            .chain_update(group.pad(&group.g))
            .finalize());
        Ok(group)
    }
}

struct Group {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    len: usize,
}

impl Group {
    fn pad(&self, value: &BigUint) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        if bytes.len() >= self.len {
            return bytes;
        }
        let mut padded = vec![0u8; self.len];
        padded[self.len - bytes.len()..].copy_from_slice(&bytes);
        padded
    }

    /// x = H(s | H(I ":" P))
    fn private_key(username: &[u8], password: &[u8], salt: &[u8]) -> BigUint {
        let inner = Sha512::new()
            .chain_update(username)
            .chain_update(b":")
            .chain_update(password)
            .finalize();
        BigUint::from_bytes_be(&Sha512::new().chain_update(salt).chain_update(inner).finalize())
    }

    /// u = H(PAD(A) | PAD(B))
    fn scrambler(&self, a_pub: &BigUint, b_pub: &BigUint) -> BigUint {
        BigUint::from_bytes_be(
            &Sha512::new()
                .chain_update(self.pad(a_pub))
                .chain_update(self.pad(b_pub))
                .finalize(),
        )
    }

    /// M1 = H(H(N) xor H(g) | H(I) | s | A | B | K), with A and B as sent on the wire
    fn client_proof(
        &self,
        username: &[u8],
        salt: &[u8],
        a_wire: &[u8],
        b_wire: &[u8],
        key: &[u8],
    ) -> Vec<u8> {
        let hn = Sha512::digest(self.n.to_bytes_be());
        let hg = Sha512::digest(self.g.to_bytes_be());
        let hn_xor_hg: Vec<u8> = hn.iter().zip(hg.iter()).map(|(a, b)| a ^ b).collect();

        Sha512::new()
            .chain_update(&hn_xor_hg)
            .chain_update(Sha512::digest(username))
            .chain_update(salt)
            .chain_update(a_wire)
            .chain_update(b_wire)
            .chain_update(key)
            .finalize()
            .to_vec()
    }

    /// M2 = H(A | M1 | K)
    fn server_proof(a_wire: &[u8], m1: &[u8], key: &[u8]) -> Vec<u8> {
        Sha512::new()
            .chain_update(a_wire)
            .chain_update(m1)
            .chain_update(key)
            .finalize()
            .to_vec()
    }

    fn random_private() -> BigUint {
        rand::thread_rng().sample(RandomBits::new(256))
    }
}

/// Accessory side of the SRP exchange
pub struct SrpServer {
    group: Group,
    v: BigUint,
    b: BigUint,
    public_key: Vec<u8>,
}

impl SrpServer {
    /// Compute the password verifier `v = g^x mod N`
    ///
    /// # Errors
    /// Returns `CryptoError::SrpError` if the group parameters cannot be parsed.
    pub fn compute_verifier(
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        params: &SrpParams,
    ) -> Result<Vec<u8>, CryptoError> {
        let group = params.group()?;
        let x = Group::private_key(username, password, salt);
        Ok(group.pad(&group.g.modpow(&x, &group.n)))
    }

    /// Start a session from a stored verifier; generates the private value `b`
    ///
    /// # Errors
    /// Returns `CryptoError::SrpError` if the group parameters cannot be parsed.
    pub fn new(verifier: &[u8], params: &SrpParams) -> Result<Self, CryptoError> {
        let group = params.group()?;
        let v = BigUint::from_bytes_be(verifier);
        let b = Group::random_private() % &group.n;

        // B = k*v + g^b mod N
        let b_pub = (&group.k * &v + group.g.modpow(&b, &group.n)) % &group.n;
        let public_key = group.pad(&b_pub);

        Ok(Self {
            group,
            v,
            b,
            public_key,
        })
    }

    /// Server public value `B`, padded to the group length
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Check the client proof and produce the session key and server proof
    ///
    /// # Errors
    /// Returns `CryptoError::SrpError` for a degenerate client public value and
    /// `CryptoError::VerificationFailed` when the proof does not match.
    pub fn verify_client(
        &self,
        username: &[u8],
        salt: &[u8],
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<(SessionKey, Vec<u8>), CryptoError> {
        let n = &self.group.n;
        let a_pub = BigUint::from_bytes_be(client_public);
        if (&a_pub % n).is_zero() {
            return Err(CryptoError::SrpError("invalid client public key".to_string()));
        }

        let b_pub = BigUint::from_bytes_be(&self.public_key);
        let u = self.group.scrambler(&a_pub, &b_pub);
        if u.is_zero() {
            return Err(CryptoError::SrpError("scrambling parameter is zero".to_string()));
        }

        // S = (A * v^u)^b mod N
        let base = (&a_pub * self.v.modpow(&u, n)) % n;
        let shared = base.modpow(&self.b, n);
        let key = Sha512::digest(shared.to_bytes_be()).to_vec();

        let expected = self
            .group
            .client_proof(username, salt, client_public, &self.public_key, &key);
        if !constant_time_eq(&expected, client_proof) {
            return Err(CryptoError::VerificationFailed);
        }

        let m2 = Group::server_proof(client_public, client_proof, &key);
        Ok((SessionKey { key }, m2))
    }
}

/// Controller side of the SRP exchange
pub struct SrpClient {
    group: Group,
    a: BigUint,
    public_key: Vec<u8>,
}

impl SrpClient {
    /// Generate a fresh private value `a` and public value `A`
    ///
    /// # Errors
    /// Returns `CryptoError::SrpError` if the group parameters cannot be parsed.
    pub fn new(params: &SrpParams) -> Result<Self, CryptoError> {
        let group = params.group()?;
        let a = Group::random_private() % &group.n;
        let public_key = group.pad(&group.g.modpow(&a, &group.n));
        Ok(Self {
            group,
            a,
            public_key,
        })
    }

    /// Client public value `A`, padded to the group length
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Process the server challenge and compute the client proof
    ///
    /// # Errors
    /// Returns `CryptoError::SrpError` if the server public value is degenerate.
    pub fn process_challenge(
        &self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        let n = &self.group.n;
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % n).is_zero() {
            return Err(CryptoError::SrpError("invalid server public key".to_string()));
        }

        let a_pub = BigUint::from_bytes_be(&self.public_key);
        let u = self.group.scrambler(&a_pub, &b_pub);
        let x = Group::private_key(username, password, salt);

        // S = (B - k*g^x)^(a + u*x) mod N, kept non-negative
        let k_g_x = (&self.group.k * self.group.g.modpow(&x, n)) % n;
        let base = (&b_pub % n + n - k_g_x) % n;
        let shared = base.modpow(&(&self.a + &u * &x), n);
        let key = Sha512::digest(shared.to_bytes_be()).to_vec();

        let m1 = self
            .group
            .client_proof(username, salt, &self.public_key, server_public, &key);

        Ok(SrpVerifier {
            a_wire: self.public_key.clone(),
            m1,
            key,
        })
    }
}

/// Client state between sending M1 and checking M2
pub struct SrpVerifier {
    a_wire: Vec<u8>,
    m1: Vec<u8>,
    key: Vec<u8>,
}

impl SrpVerifier {
    /// Client proof M1
    #[must_use]
    pub fn client_proof(&self) -> &[u8] {
        &self.m1
    }

    /// Check the server proof M2
    ///
    /// # Errors
    /// Returns `CryptoError::VerificationFailed` if M2 does not match.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<SessionKey, CryptoError> {
        let expected = Group::server_proof(&self.a_wire, &self.m1, &self.key);
        if !constant_time_eq(&expected, server_proof) {
            return Err(CryptoError::VerificationFailed);
        }
        Ok(SessionKey {
            key: self.key.clone(),
        })
    }
}

impl Drop for SrpVerifier {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Shared SRP session key `K`
pub struct SessionKey {
    key: Vec<u8>,
}

impl SessionKey {
    /// Raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
