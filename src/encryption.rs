// SPDX-License-Identifier: MIT OR Apache-2.0
//! AES-256-GCM encryption for secret values.
//!
//! Ciphertext blobs are self-describing:
//!
//! ```text
//! "CVB1" (4) || key epoch u32 LE (4) || nonce (12) || ciphertext + tag
//! ```
//!
//! The epoch names which master key encrypted the blob, which is what makes
//! master-key rotation resumable after a crash. A fresh random nonce is drawn
//! per encryption and never reused. Authentication failure, truncation, and
//! bad framing all surface as [`VaultError::DecryptionFailed`]; corrupted
//! plaintext is never returned, and key bytes never appear in errors.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{
    key::{MasterKey, KEY_SIZE},
    Result, VaultError,
};

/// 12-byte nonce for AES-GCM (96 bits is the standard).
pub const NONCE_SIZE: usize = 12;

/// Blob format magic.
const MAGIC: &[u8; 4] = b"CVB1";

/// Fixed header length before the ciphertext: magic + epoch + nonce.
const HEADER_LEN: usize = MAGIC.len() + 4 + NONCE_SIZE;

/// Authenticated-encryption codec keyed by one master key.
pub struct Cipher {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl Cipher {
    /// Key a codec from master-key material.
    pub fn new(master_key: &MasterKey) -> Self {
        Self {
            key: Zeroizing::new(*master_key.as_bytes()),
        }
    }

    /// Encrypt `plaintext` under this key, stamping the blob with `epoch`.
    pub fn encrypt(&self, epoch: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        let aead = Aes256Gcm::new_from_slice(&*self.key)
            .map_err(|_| VaultError::Validation("encryption key has invalid length".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = aead
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::Validation("plaintext exceeds cipher limits".to_string()))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&epoch.to_le_bytes());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`Cipher::encrypt`].
    ///
    /// Fails if the framing is malformed or the authentication tag does not
    /// verify (wrong key, corruption, truncation).
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        check_frame(blob)?;
        let nonce = Nonce::from_slice(&blob[8..HEADER_LEN]);

        let aead = Aes256Gcm::new_from_slice(&*self.key)
            .map_err(|_| VaultError::DecryptionFailed("invalid key length".to_string()))?;
        aead.decrypt(nonce, &blob[HEADER_LEN..])
            .map_err(|_| {
                VaultError::DecryptionFailed(
                    "ciphertext failed authentication (wrong key or corrupted data)".to_string(),
                )
            })
    }
}

/// Read the key epoch a blob was encrypted under without decrypting it.
pub fn blob_epoch(blob: &[u8]) -> Result<u32> {
    check_frame(blob)?;
    let mut epoch = [0u8; 4];
    epoch.copy_from_slice(&blob[4..8]);
    Ok(u32::from_le_bytes(epoch))
}

fn check_frame(blob: &[u8]) -> Result<()> {
    if blob.len() < HEADER_LEN {
        return Err(VaultError::DecryptionFailed(format!(
            "blob truncated: {} bytes, need at least {HEADER_LEN}",
            blob.len()
        )));
    }
    if &blob[..4] != MAGIC {
        return Err(VaultError::DecryptionFailed(
            "unrecognized blob format".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Cipher {
        Cipher::new(&MasterKey::from_bytes([0u8; KEY_SIZE]))
    }

    #[test]
    fn test_roundtrip() {
        let cipher = test_cipher();
        let blob = cipher.encrypt(1, b"hello, world!").unwrap();

        assert_ne!(&blob[HEADER_LEN..], b"hello, world!");
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"hello, world!");
    }

    #[test]
    fn test_epoch_embedded() {
        let cipher = test_cipher();
        let blob = cipher.encrypt(42, b"data").unwrap();
        assert_eq!(blob_epoch(&blob).unwrap(), 42);
    }

    #[test]
    fn test_nonce_fresh_per_call() {
        let cipher = test_cipher();
        let a = cipher.encrypt(1, b"same text").unwrap();
        let b = cipher.encrypt(1, b"same text").unwrap();
        assert_ne!(a[8..HEADER_LEN], b[8..HEADER_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = test_cipher();
        let blob = cipher.encrypt(1, b"").unwrap();
        assert!(cipher.decrypt(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_large_plaintext() {
        let cipher = test_cipher();
        let plaintext = vec![0xabu8; 1024 * 1024];
        let blob = cipher.encrypt(1, &plaintext).unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = test_cipher().encrypt(1, b"secret").unwrap();
        let other = Cipher::new(&MasterKey::from_bytes([9u8; KEY_SIZE]));
        assert!(matches!(
            other.decrypt(&blob),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_every_flipped_byte_detected() {
        let cipher = test_cipher();
        let blob = cipher.encrypt(1, b"integrity matters").unwrap();

        // Flipping any byte of the ciphertext body must fail authentication.
        for i in HEADER_LEN..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(
                    cipher.decrypt(&tampered),
                    Err(VaultError::DecryptionFailed(_))
                ),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let cipher = test_cipher();
        let mut blob = cipher.encrypt(1, b"secret").unwrap();
        blob[8] ^= 0xff;
        assert!(cipher.decrypt(&blob).is_err());
    }

    #[test]
    fn test_truncated_blob_fails() {
        let cipher = test_cipher();
        let blob = cipher.encrypt(1, b"secret").unwrap();
        for len in [0, 3, HEADER_LEN - 1] {
            assert!(matches!(
                cipher.decrypt(&blob[..len]),
                Err(VaultError::DecryptionFailed(_))
            ));
        }
    }

    #[test]
    fn test_bad_magic_fails() {
        let cipher = test_cipher();
        let mut blob = cipher.encrypt(1, b"secret").unwrap();
        blob[0] = b'X';
        assert!(matches!(
            blob_epoch(&blob),
            Err(VaultError::DecryptionFailed(_))
        ));
        assert!(cipher.decrypt(&blob).is_err());
    }

    #[test]
    fn test_error_messages_carry_no_key_material() {
        let blob = test_cipher().encrypt(1, b"secret").unwrap();
        let other = Cipher::new(&MasterKey::from_bytes([9u8; KEY_SIZE]));
        let msg = other.decrypt(&blob).unwrap_err().to_string();
        assert!(!msg.contains("secret"));
        assert!(!msg.contains("09")); // no hex-dumped key bytes
    }
}
