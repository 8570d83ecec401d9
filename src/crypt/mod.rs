mod key;
pub use key::OperatorKey;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use log::error;

use crate::{keepsake_error, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

type GcmNonce = Nonce<<Aes256Gcm as AeadCore>::NonceSize>;

/// Encrypts `plaintext` with a fresh random nonce. The nonce is prepended to
/// the returned ciphertext.
pub fn aes256gcm_encrypt(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = init_cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| {
            keepsake_error!(EncryptionError {
                description: format!("Failed to encrypt data: {e}"),
            })
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Reverses [`aes256gcm_encrypt`]. Fails on a wrong key, wrong `aad` or any
/// tampering with the ciphertext.
pub fn aes256gcm_decrypt(key: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = init_cipher(key)?;
    if ciphertext.len() < NONCE_LEN {
        return Err(keepsake_error!(DecryptionError {
            description: format!(
                "Ciphertext too short: expected at least {NONCE_LEN} bytes, got {}",
                ciphertext.len()
            ),
        }));
    }
    let (nonce, msg) = ciphertext.split_at(NONCE_LEN);
    cipher
        .decrypt(GcmNonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| {
            let msg = format!("Failed to decrypt data: {e}");
            error!("{}", msg);
            keepsake_error!(DecryptionError { description: msg })
        })
}

fn init_cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|_| {
        keepsake_error!(DecryptionError {
            description: format!(
                "Key must be exactly {KEY_LEN} bytes for AES-256-GCM (got {} bytes)",
                key.len()
            ),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = [7u8; KEY_LEN];
        let sealed = aes256gcm_encrypt(&key, b"slot", b"service account").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"service account".len() + 16);
        let plain = aes256gcm_decrypt(&key, b"slot", &sealed).unwrap();
        assert_eq!(plain, b"service account");
    }

    #[test]
    fn test_nonce_differs_between_encryptions() {
        let key = [7u8; KEY_LEN];
        let a = aes256gcm_encrypt(&key, b"", b"same").unwrap();
        let b = aes256gcm_encrypt(&key, b"", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = aes256gcm_encrypt(&[1u8; KEY_LEN], b"", b"secret").unwrap();
        let err = aes256gcm_decrypt(&[2u8; KEY_LEN], b"", &sealed).unwrap_err();
        assert!(format!("{err}").starts_with("Decryption error: Failed to decrypt data"));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [3u8; KEY_LEN];
        let sealed = aes256gcm_encrypt(&key, b"a", b"secret").unwrap();
        assert!(aes256gcm_decrypt(&key, b"b", &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [3u8; KEY_LEN];
        let mut sealed = aes256gcm_encrypt(&key, b"", b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(aes256gcm_decrypt(&key, b"", &sealed).is_err());
    }

    #[test]
    fn test_short_ciphertext_fails() {
        let err = aes256gcm_decrypt(&[0u8; KEY_LEN], b"", &[0u8; 4]).unwrap_err();
        assert!(format!("{err}").contains("Ciphertext too short"));
    }

    #[test]
    fn test_bad_key_length_fails() {
        let err = aes256gcm_decrypt(&[0u8; 16], b"", &[0u8; 40]).unwrap_err();
        assert!(format!("{err}").contains("Key must be exactly 32 bytes"));
    }
}
