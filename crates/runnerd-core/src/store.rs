//! Persistent key/value state
//!
//! A JSON object on disk. Every write replaces the file atomically (temp file
//! and rename), so a crash leaves either the old or the new state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::{DesiredConfig, Secret};
use crate::error::CoreError;
use crate::state::{ProvisionStage, RegistrationState};
use crate::status::WorkloadStatus;

/// Well-known keys
pub mod keys {
    pub const PEER_URI: &str = "peer_uri";
    pub const PEER_TOKEN: &str = "peer_token";
    pub const PROVISIONING: &str = "provisioning";
    pub const REGISTRATION: &str = "registration";
    pub const APT_KEY: &str = "apt_key";
    pub const LAST_CONFIG: &str = "last_config";
    pub const STATUS: &str = "status";
}

/// Durable string-keyed store of JSON values
#[derive(Debug, Default)]
pub struct StateStore {
    /// Backing file; `None` keeps everything in memory
    path: Option<PathBuf>,
    data: BTreeMap<String, Value>,
}

impl StateStore {
    /// Open the store at `path`, starting empty if the file does not exist
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the file exists but cannot be read
    /// or is not a JSON object
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();

        let data = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                CoreError::StoreError(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(CoreError::StoreError(format!("{}: {e}", path.display())));
            }
        };

        debug!(path = %path.display(), keys = data.len(), "opened state store");

        Ok(Self {
            path: Some(path),
            data,
        })
    }

    /// Store that is never written to disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read and decode a value
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the stored value has the wrong shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        match self.data.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| CoreError::StoreError(format!("key {key}: {e}"))),
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.data.get(key), Some(v) if !v.is_null())
    }

    /// Write a value and persist
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if encoding or persisting fails
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), CoreError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::StoreError(format!("key {key}: {e}")))?;
        self.data.insert(key.to_string(), value);
        self.flush()
    }

    /// Remove a key and persist
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn unset(&mut self, key: &str) -> Result<(), CoreError> {
        if self.data.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), CoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let err = |e: std::io::Error| CoreError::StoreError(format!("{}: {e}", path.display()));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(err)?;
        }

        let json = serde_json::to_vec_pretty(&self.data)
            .map_err(|e| CoreError::StoreError(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)
                .map_err(err)?;
            // a leftover temp file keeps its old mode
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(err)?;
            file.write_all(&json).map_err(err)?;
            file.sync_all().map_err(err)?;
        }
        fs::rename(&tmp, path).map_err(err)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    /// Current provisioning stage
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the stored value is corrupt
    pub fn provisioning(&self) -> Result<ProvisionStage, CoreError> {
        Ok(self.get(keys::PROVISIONING)?.unwrap_or_default())
    }

    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn set_provisioning(&mut self, stage: ProvisionStage) -> Result<(), CoreError> {
        self.set(keys::PROVISIONING, &stage)
    }

    /// Current registration state
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the stored value is corrupt
    pub fn registration(&self) -> Result<RegistrationState, CoreError> {
        Ok(self.get(keys::REGISTRATION)?.unwrap_or_default())
    }

    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn set_registration(&mut self, state: RegistrationState) -> Result<(), CoreError> {
        self.set(keys::REGISTRATION, &state)
    }

    /// Credentials last supplied by a peer relation
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the stored values are corrupt
    pub fn peer_credentials(&self) -> Result<Option<(String, Secret)>, CoreError> {
        let uri: Option<String> = self.get(keys::PEER_URI)?;
        let token: Option<Secret> = self.get(keys::PEER_TOKEN)?;
        Ok(match (uri, token) {
            (Some(uri), Some(token)) if !uri.is_empty() && !token.is_empty() => Some((uri, token)),
            _ => None,
        })
    }

    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn set_peer_credentials(&mut self, uri: &str, token: &Secret) -> Result<(), CoreError> {
        self.set(keys::PEER_URI, &uri)?;
        self.set(keys::PEER_TOKEN, token)
    }

    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn clear_peer_credentials(&mut self) -> Result<(), CoreError> {
        self.unset(keys::PEER_URI)?;
        self.unset(keys::PEER_TOKEN)
    }

    /// Desired config from the last successful reconcile
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the stored value is corrupt
    pub fn last_config(&self) -> Result<Option<DesiredConfig>, CoreError> {
        self.get(keys::LAST_CONFIG)
    }

    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn set_last_config(&mut self, config: &DesiredConfig) -> Result<(), CoreError> {
        self.set(keys::LAST_CONFIG, config)
    }

    /// Last published status
    ///
    /// # Errors
    /// Returns `CoreError::StoreError` if the stored value is corrupt
    pub fn status(&self) -> Result<Option<WorkloadStatus>, CoreError> {
        self.get(keys::STATUS)
    }

    /// # Errors
    /// Returns `CoreError::StoreError` if persisting fails
    pub fn set_status(&mut self, status: &WorkloadStatus) -> Result<(), CoreError> {
        self.set(keys::STATUS, status)
    }
}
