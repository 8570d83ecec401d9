use base64::{engine::general_purpose::STANDARD as b64_engine, Engine};
use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

pub use secrecy::{ExposeSecret, SecretSlice, SecretString};

/// Secret bytes carried base64 encoded in the configuration.
pub type SecretBytes = SecretSlice<u8>;

/// Decodes a base64 configuration value straight into [`SecretBytes`].
pub(crate) fn base64_secret<'de, D>(deserializer: D) -> Result<SecretBytes, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = Zeroizing::new(String::deserialize(deserializer)?);
    b64_engine
        .decode(encoded.trim())
        .map(SecretBytes::from)
        .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
}

pub(crate) fn optional_base64_secret<'de, D>(
    deserializer: D,
) -> Result<Option<SecretBytes>, D::Error>
where
    D: Deserializer<'de>,
{
    base64_secret(deserializer).map(Some)
}
