//! Secret-ballot codec (spec §4.3): authenticated encryption of ballot
//! payloads for `secret` polls. The default implementation is AES-256-GCM
//! with a key derived via HKDF-SHA256 from a deployment secret, modeled
//! on the trust-state encryption used elsewhere in this stack.

use base64::Engine;
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encryption failed: {0}")]
    EncryptFailed(String),
    #[error("decryption failed: {0}")]
    DecryptFailed(String),
    #[error("ciphertext is malformed")]
    Malformed,
}

/// `(encrypt(plaintext) -> ciphertext, decrypt(ciphertext) -> plaintext)`
/// (spec §9 "secret-poll codec pluggability"). The bulletin-board
/// end-to-end-verifiable scheme is a future implementation of this trait;
/// nothing else in the core depends on AES-GCM specifically.
pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, CodecError>;
    fn decrypt(&self, stored: &str) -> Result<Vec<u8>, CodecError>;
}

/// AES-256-GCM codec. Stored form is `base64(nonce ‖ ciphertext ‖ tag)`.
/// Stateless once constructed; safe to share across tasks.
pub struct AesGcmCodec {
    key: Zeroizing<Vec<u8>>,
    rng: SystemRandom,
}

impl AesGcmCodec {
    /// Derive the AES-256 key from a deployment secret read at start-up
    /// (spec §4.3, §6 "deployment secret file path").
    pub fn new(deployment_secret: &[u8]) -> Result<Self, CodecError> {
        let hkdf = Hkdf::<Sha256>::new(Some(b"vote-core-ballot-encryption-v1"), deployment_secret);
        let mut key = Zeroizing::new(vec![0u8; 32]);
        hkdf.expand(b"aes-256-gcm-key", &mut key)
            .map_err(|e| CodecError::EncryptFailed(format!("key derivation failed: {e}")))?;
        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    fn unbound_key(&self) -> Result<LessSafeKey, CodecError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| CodecError::EncryptFailed("bad key length".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl SecretCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, CodecError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CodecError::EncryptFailed("rng failure".into()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let key = self.unbound_key()?;
        let mut buf = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buf)
            .map_err(|_| CodecError::EncryptFailed("seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + buf.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&buf);
        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    fn decrypt(&self, stored: &str) -> Result<Vec<u8>, CodecError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(stored)
            .map_err(|_| CodecError::Malformed)?;
        if raw.len() < NONCE_LEN {
            return Err(CodecError::Malformed);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CodecError::Malformed)?;

        let key = self.unbound_key()?;
        let mut buf = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| CodecError::DecryptFailed("authentication failed".into()))?;
        Ok(plaintext.to_vec())
    }
}
