//! Credential sources
//!
//! Passwords never live in the plan as literals. They are resolved by name
//! from a [`SecretSource`]: process environment, a mounted secrets directory
//! (one file per secret), or an in-memory map.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::types::{ProvisionError, Result};

/// Secret name of the admin user's password
pub const ADMIN_PASSWORD: &str = "admin_password";

/// Secret name of the application user's password
pub const APP_PASSWORD: &str = "app_password";

/// A password that is wiped from memory on drop and never printed
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the plaintext value
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Supplies secrets by name
pub trait SecretSource: Send + Sync {
    /// Resolve a secret, failing if it is missing or empty
    fn get(&self, name: &str) -> Result<Secret>;
}

/// Reads secrets from environment variables
///
/// Secret names map to variable names; unmapped names fall back to the
/// upper-cased secret name.
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    vars: HashMap<String, String>,
}

impl EnvSecretSource {
    pub fn new() -> Self {
        let mut vars = HashMap::new();
        vars.insert(ADMIN_PASSWORD.to_string(), "ADMIN_PASSWORD".to_string());
        vars.insert(APP_PASSWORD.to_string(), "MONGO_PASSWORD".to_string());
        Self { vars }
    }

    /// Override the environment variable used for a secret
    pub fn with_var(mut self, name: &str, var: &str) -> Self {
        self.vars.insert(name.to_string(), var.to_string());
        self
    }

    fn var_for(&self, name: &str) -> String {
        self.vars
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_ascii_uppercase())
    }
}

impl Default for EnvSecretSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretSource for EnvSecretSource {
    fn get(&self, name: &str) -> Result<Secret> {
        let var = self.var_for(name);
        let value = std::env::var(&var)
            .map_err(|_| ProvisionError::Secret(format!("{} is not set (secret '{}')", var, name)))?;
        non_empty(name, Secret::new(value))
    }
}

/// Reads secrets from files in a directory, e.g. `/run/secrets/admin_password`
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    dir: PathBuf,
}

impl FileSecretSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SecretSource for FileSecretSource {
    fn get(&self, name: &str) -> Result<Secret> {
        let path = self.dir.join(name);
        let raw = Zeroizing::new(std::fs::read_to_string(&path).map_err(|e| {
            ProvisionError::Secret(format!("cannot read {}: {}", path.display(), e))
        })?);
        // Mounted secrets usually end with a newline
        let value = raw.trim_end_matches(['\n', '\r']);
        non_empty(name, Secret::new(value))
    }
}

/// Fixed secrets held in memory
#[derive(Clone, Default)]
pub struct MapSecretSource {
    secrets: HashMap<String, Secret>,
}

impl MapSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), Secret::new(value));
        self
    }
}

impl SecretSource for MapSecretSource {
    fn get(&self, name: &str) -> Result<Secret> {
        let secret = self
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::Secret(format!("secret '{}' not found", name)))?;
        non_empty(name, secret)
    }
}

fn non_empty(name: &str, secret: Secret) -> Result<Secret> {
    if secret.is_empty() {
        return Err(ProvisionError::Secret(format!("secret '{}' is empty", name)));
    }
    Ok(secret)
}
