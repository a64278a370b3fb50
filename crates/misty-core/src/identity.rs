//! Node identity and the secret-keyed hostname scheme.
//!
//! Every node in a fleet shares one secret. A node announces itself on the
//! overlay as `<base_name>-<tag>`, where `tag` is the first 8 hex characters
//! of `HMAC-SHA256(secret, base_name)`. Any holder of the secret can compute
//! the server's public hostname from its base name alone, so the server is
//! recognised among discovered peers without a lookup service.

use std::path::Path;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::{ConfigError, IdentityPaths};

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the MAC (32 bits).
pub const HASH_TAG_LEN: usize = 8;

/// `base_name + "-" + hex(HMAC-SHA256(secret, base_name))[..8]`.
pub fn hashed_name(secret: &[u8], base_name: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(base_name.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("{}-{}", base_name, &digest[..HASH_TAG_LEN])
}

/// The identity document, stored as JSON next to the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub device_id: String,
    pub server_id: String,
    pub base_name: String,
}

impl IdentityConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::DecodeFailed(path.to_path_buf(), e))
    }
}

/// An identity document paired with the fleet secret.
#[derive(Clone)]
pub struct Identity {
    pub config: IdentityConfig,
    secret: Vec<u8>,
}

impl Identity {
    pub fn new(config: IdentityConfig, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            config,
            secret: secret.into(),
        }
    }

    /// Read both files. Either one missing or unreadable is an error.
    pub fn load(paths: &IdentityPaths) -> Result<Self, ConfigError> {
        let config = IdentityConfig::load(&paths.config_path)?;
        let secret = read_secret(&paths.secret_path)?;
        Ok(Self { config, secret })
    }

    /// This node's public overlay hostname.
    pub fn hostname(&self) -> String {
        hashed_name(&self.secret, &self.config.base_name)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("config", &self.config)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The secret file is raw bytes, used exactly as stored.
fn read_secret(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))
}
