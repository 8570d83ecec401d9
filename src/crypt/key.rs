use std::{fs, path::Path};

use aes_gcm::{
    aead::{KeyInit, OsRng},
    Aes256Gcm,
};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use zeroize::{Zeroize, Zeroizing};

use super::{aes256gcm_decrypt, aes256gcm_encrypt, KEY_LEN};
use crate::{keepsake_error, Result, ResultExt};

/// The operator-held symmetric key guarding first-stage secrets.
///
/// On disk the key is a single line of URL-safe base64 encoding 32 bytes.
/// Sealed tokens are URL-safe base64 of `nonce || ciphertext || tag`.
#[derive(Clone)]
pub struct OperatorKey {
    bytes: [u8; KEY_LEN],
}

impl std::fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Drop for OperatorKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl OperatorKey {
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self { bytes }
    }

    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(URL_SAFE.decode(encoded.trim()).map_err(|e| {
            keepsake_error!(DecryptionError {
                description: format!("Operator key is not valid base64: {e}"),
            })
        })?);
        if decoded.len() != KEY_LEN {
            return Err(keepsake_error!(DecryptionError {
                description: format!(
                    "Operator key must decode to {KEY_LEN} bytes (got {} bytes)",
                    decoded.len()
                ),
            }));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }

    /// Reads the key from the first line of `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = Zeroizing::new(
            fs::read_to_string(path)
                .context(format!("Reading operator key {} failed", path.display()))?,
        );
        let line = content.lines().next().unwrap_or_default();
        Self::from_encoded(line)
    }

    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(self.bytes))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let sealed = aes256gcm_encrypt(&self.bytes, b"", plaintext)?;
        Ok(URL_SAFE.encode(sealed))
    }

    /// Decrypts a token produced by [`OperatorKey::seal`].
    pub fn open(&self, token: &str) -> Result<Zeroizing<Vec<u8>>> {
        let sealed = URL_SAFE.decode(token.trim()).map_err(|e| {
            keepsake_error!(DecryptionError {
                description: format!("Sealed value is not valid base64: {e}"),
            })
        })?;
        aes256gcm_decrypt(&self.bytes, b"", &sealed)
            .map(Zeroizing::new)
            .map_err(|e| {
                if is_fernet_token(&sealed) {
                    keepsake_error!(DecryptionError {
                        description: "Sealed value is a Fernet token; re-seal the secret with seal-secret"
                            .to_string(),
                    })
                } else {
                    e
                }
            })
    }
}

/// Fernet layout: version `0x80`, 8-byte timestamp, 16-byte IV, a
/// block-aligned ciphertext and a 32-byte HMAC.
fn is_fernet_token(sealed: &[u8]) -> bool {
    const OVERHEAD: usize = 1 + 8 + 16 + 32;
    sealed.first() == Some(&0x80)
        && sealed.len() >= OVERHEAD + 16
        && (sealed.len() - OVERHEAD) % 16 == 0
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_seal_and_open() {
        let key = OperatorKey::generate();
        let token = key.seal(b"eyJ0eXBlIjoic2VydmljZV9hY2NvdW50In0=").unwrap();
        let opened = key.open(&token).unwrap();
        assert_eq!(opened.as_slice(), b"eyJ0eXBlIjoic2VydmljZV9hY2NvdW50In0=");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let token = OperatorKey::generate().seal(b"secret").unwrap();
        let err = OperatorKey::generate().open(&token).unwrap_err();
        assert!(matches!(err, crate::KeepsakeError::DecryptionError { .. }));
    }

    #[test]
    fn test_fernet_token_asks_for_reseal() {
        let mut token = vec![0x80];
        token.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x65, 0x00, 0x00, 0x00]);
        token.extend_from_slice(&[7u8; 16]);
        token.extend_from_slice(&[9u8; 32]);
        token.extend_from_slice(&[3u8; 32]);
        let token = URL_SAFE.encode(token);

        let err = OperatorKey::generate().open(&token).unwrap_err();

        assert!(matches!(err, crate::KeepsakeError::DecryptionError { .. }));
        assert!(format!("{err}").contains("re-seal the secret with seal-secret"));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let key = OperatorKey::generate();
        let err = key.open("not base64 at all!").unwrap_err();
        assert!(format!("{err}").contains("Sealed value is not valid base64"));
    }

    #[test]
    fn test_load_reads_first_line() {
        let key = OperatorKey::generate();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", key.encode().as_str()).unwrap();
        writeln!(file, "ignored trailing line").unwrap();

        let loaded = OperatorKey::load(file.path()).unwrap();
        let token = key.seal(b"abc").unwrap();
        assert_eq!(loaded.open(&token).unwrap().as_slice(), b"abc");
    }

    #[test]
    fn test_load_rejects_short_key() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", URL_SAFE.encode([0u8; 16])).unwrap();
        let err = OperatorKey::load(file.path()).unwrap_err();
        assert!(format!("{err}").contains("must decode to 32 bytes"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", OperatorKey::generate());
        assert!(rendered.contains("[REDACTED]"));
    }
}
