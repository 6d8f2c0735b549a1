use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::protocol::ClientId;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("identity file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    client_id: ClientId,
}

/// Process-wide home of this client's `ClientId`.
///
/// Generated once on first run, loaded on every later start, never
/// regenerated while the stored value is valid.
#[derive(Debug, Clone)]
pub enum IdentityStore {
    File(PathBuf),
    Fixed(ClientId),
}

impl IdentityStore {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn fixed(id: ClientId) -> Self {
        Self::Fixed(id)
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::file(&config.identity_path)
    }

    pub fn load_or_create(&self) -> Result<ClientId, IdentityError> {
        match self {
            Self::Fixed(id) => Ok(id.clone()),
            Self::File(path) => {
                if let Some(id) = load(path)? {
                    debug!("Loaded client identity {} from {}", id, path.display());
                    return Ok(id);
                }
                let id = ClientId::new(Uuid::new_v4().to_string());
                persist(path, &id)?;
                info!("Generated client identity {} at {}", id, path.display());
                Ok(id)
            }
        }
    }
}

fn load(path: &Path) -> Result<Option<ClientId>, IdentityError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(IdentityError::Io { path: path.to_path_buf(), source }),
    };
    let stored: StoredIdentity = serde_json::from_str(&raw)
        .map_err(|source| IdentityError::Corrupt { path: path.to_path_buf(), source })?;
    if stored.client_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(stored.client_id))
}

fn persist(path: &Path, id: &ClientId) -> Result<(), IdentityError> {
    let io_err = |source| IdentityError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let body = serde_json::to_string_pretty(&StoredIdentity { client_id: id.clone() })
        .map_err(|source| IdentityError::Corrupt { path: path.to_path_buf(), source })?;
    fs::write(path, body).map_err(io_err)
}
