//! Cryptographic primitives
//!
//! PBKDF2-HMAC-SHA256 key stretching, AES-256-GCM sealing, and the packed
//! wire format used for self-contained ciphertexts:
//!
//! ```text
//! base64( salt(32) || iv(12) || ciphertext+tag )
//! ```
//!
//! Every decryption failure (wrong password, flipped bit, truncated blob,
//! bad base64) surfaces as the same [`Error::Decryption`].

use crate::{Error, Result};
use aes_gcm::{aead::Aead, Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

/// Default PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt length inside a packed blob
pub const PACKED_SALT_LEN: usize = 32;

/// Salt length for vault identities
pub const VAULT_SALT_LEN: usize = 16;

/// AES-GCM nonce length
pub const IV_LEN: usize = 12;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

const MIN_SALT_LEN: usize = 16;

/// Fill a fixed-size array from the OS RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Returns `true` if the OS RNG can be read.
pub fn secure_random_available() -> bool {
    let mut sample = [0u8; 8];
    OsRng.try_fill_bytes(&mut sample).is_ok()
}

/// Best-effort in-place wipe of a sensitive buffer.
///
/// Only the bytes behind this slice are cleared; copies the runtime made
/// elsewhere are out of reach. Rust's ownership rules (no aliasing into freed
/// buffers) are what actually keep secrets from leaking.
pub fn scrub(buf: &mut [u8]) {
    buf.zeroize();
}

/// One encrypted value as persisted by the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Fresh random nonce, never reused under the same key
    pub iv: [u8; IV_LEN],
    /// AES-GCM ciphertext including the 16-byte tag
    pub ciphertext: Vec<u8>,
}

/// Symmetric AES-256-GCM key derived from a password
///
/// Never serialized. Key bytes are wiped on drop.
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl EncryptionKey {
    /// Stretch `password` with PBKDF2-HMAC-SHA256.
    ///
    /// Deterministic: the same password, salt and iteration count always
    /// produce the same key, which is what lets a reload re-derive it.
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if salt.len() < MIN_SALT_LEN {
            return Err(Error::Encryption("Salt too short".to_string()));
        }
        if iterations == 0 {
            return Err(Error::Encryption("Iteration count must be non-zero".to_string()));
        }

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut *bytes);
        Ok(Self { bytes })
    }

    /// Create from raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.bytes.as_slice()))
    }

    /// Encrypt under a freshly generated nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedRecord> {
        let iv = random_bytes::<IV_LEN>();
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(EncryptedRecord { iv, ciphertext })
    }

    /// Decrypt and authenticate
    pub fn open(&self, record: &EncryptedRecord) -> Result<Zeroizing<Vec<u8>>> {
        self.cipher()
            .decrypt(Nonce::from_slice(&record.iv), record.ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| Error::Decryption)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Derive an AES-256-GCM key from a password and salt.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<EncryptionKey> {
    EncryptionKey::derive(password, salt, iterations)
}

/// Self-describing ciphertext: salt, nonce and ciphertext in one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBlob {
    /// Per-blob PBKDF2 salt
    pub salt: [u8; PACKED_SALT_LEN],
    /// AES-GCM nonce
    pub iv: [u8; IV_LEN],
    /// Ciphertext including tag
    pub ciphertext: Vec<u8>,
}

impl PackedBlob {
    /// Concatenate and base64-encode
    pub fn pack(&self) -> String {
        let mut combined = Zeroizing::new(Vec::with_capacity(
            PACKED_SALT_LEN + IV_LEN + self.ciphertext.len(),
        ));
        combined.extend_from_slice(&self.salt);
        combined.extend_from_slice(&self.iv);
        combined.extend_from_slice(&self.ciphertext);
        STANDARD.encode(combined.as_slice())
    }

    /// Decode and split. Anything malformed is reported as `Decryption`.
    pub fn unpack(packed: &str) -> Result<Self> {
        let combined = STANDARD
            .decode(packed.trim())
            .map_err(|_| Error::Decryption)?;
        if combined.len() <= PACKED_SALT_LEN + IV_LEN {
            return Err(Error::Decryption);
        }

        let mut salt = [0u8; PACKED_SALT_LEN];
        salt.copy_from_slice(&combined[..PACKED_SALT_LEN]);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&combined[PACKED_SALT_LEN..PACKED_SALT_LEN + IV_LEN]);
        let ciphertext = combined[PACKED_SALT_LEN + IV_LEN..].to_vec();

        Ok(Self {
            salt,
            iv,
            ciphertext,
        })
    }
}

/// Encrypt `plaintext` into a packed blob.
///
/// A fresh salt and nonce are drawn on every call, so two encryptions of the
/// same input never produce the same blob.
pub fn encrypt(plaintext: &str, password: &str) -> Result<String> {
    let salt = random_bytes::<PACKED_SALT_LEN>();
    let key = EncryptionKey::derive(password, &salt, PBKDF2_ITERATIONS)?;
    let record = key.seal(plaintext.as_bytes())?;

    Ok(PackedBlob {
        salt,
        iv: record.iv,
        ciphertext: record.ciphertext,
    }
    .pack())
}

/// Decrypt a packed blob produced by [`encrypt`].
pub fn decrypt(packed: &str, password: &str) -> Result<Zeroizing<String>> {
    let blob = PackedBlob::unpack(packed)?;
    let key = EncryptionKey::derive(password, &blob.salt, PBKDF2_ITERATIONS)?;
    let plaintext = key.open(&EncryptedRecord {
        iv: blob.iv,
        ciphertext: blob.ciphertext,
    })?;

    String::from_utf8(plaintext.to_vec())
        .map(Zeroizing::new)
        .map_err(|_| Error::Decryption)
}

/// Serialize `value` as JSON and encrypt it.
pub fn encrypt_json<T: Serialize>(value: &T, password: &str) -> Result<String> {
    let json = Zeroizing::new(serde_json::to_string(value)?);
    encrypt(&json, password)
}

/// Decrypt a blob and parse its JSON payload.
pub fn decrypt_json<T: DeserializeOwned>(packed: &str, password: &str) -> Result<T> {
    let plaintext = decrypt(packed, password)?;
    Ok(serde_json::from_str(&plaintext)?)
}

/// Cheap structural check: valid base64 with room for salt, nonce and at
/// least one ciphertext byte. Says nothing about the password.
pub fn is_valid_packed_format(data: &str) -> bool {
    match STANDARD.decode(data.trim()) {
        Ok(decoded) => decoded.len() > PACKED_SALT_LEN + IV_LEN,
        Err(_) => false,
    }
}
