//! Long-lived agent identity: a 128-bit id plus an X25519 keypair, persisted
//! as `identity.json` in the data directory with owner-only permissions.

use crate::{CryptoError, Result};
use metroo_core::AgentId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

const IDENTITY_FILE: &str = "identity.json";

#[derive(Clone)]
pub struct Identity {
    agent_id: AgentId,
    secret: StaticSecret,
    public: PublicKey,
}

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    agent_id: AgentId,
    private_key: String,
}

impl Identity {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self {
            agent_id: AgentId::generate(),
            secret,
            public,
        }
    }

    pub fn from_parts(agent_id: AgentId, secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self {
            agent_id,
            secret,
            public,
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(their_public)
    }

    /// Load the identity from `data_dir`, generating and persisting a fresh
    /// one on first start. A configured id must match the persisted one.
    pub fn load_or_generate(data_dir: &Path, configured_id: Option<AgentId>) -> Result<Self> {
        let path = data_dir.join(IDENTITY_FILE);
        if path.exists() {
            let identity = Self::load(&path)?;
            if let Some(wanted) = configured_id {
                if wanted != identity.agent_id {
                    return Err(CryptoError::Identity(format!(
                        "configured agent id {} does not match persisted identity {}",
                        wanted.short(),
                        identity.agent_id.short()
                    )));
                }
            }
            return Ok(identity);
        }
        fs::create_dir_all(data_dir)?;
        let mut identity = Self::generate();
        if let Some(id) = configured_id {
            identity.agent_id = id;
        }
        identity.persist(&path)?;
        tracing::info!(agent = %identity.agent_id.short(), "generated new identity");
        Ok(identity)
    }

    fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let file: IdentityFile = serde_json::from_str(&data)
            .map_err(|e| CryptoError::Identity(format!("{}: {e}", path.display())))?;
        let raw = hex::decode(&file.private_key)
            .map_err(|_| CryptoError::Identity("private key is not hex".into()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| CryptoError::Identity("private key must be 32 bytes".into()))?;
        Ok(Self::from_parts(file.agent_id, StaticSecret::from(bytes)))
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let file = IdentityFile {
            agent_id: self.agent_id,
            private_key: hex::encode(self.secret.to_bytes()),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| CryptoError::Identity(e.to_string()))?;
        let tmp: PathBuf = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Identity")
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let first = Identity::load_or_generate(dir.path(), None).unwrap();
        let second = Identity::load_or_generate(dir.path(), None).unwrap();
        assert_eq!(first.agent_id(), second.agent_id());
        assert_eq!(first.public_key().as_bytes(), second.public_key().as_bytes());
    }

    #[test]
    fn configured_id_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _first = Identity::load_or_generate(dir.path(), None).unwrap();
        let other = AgentId::generate();
        assert!(Identity::load_or_generate(dir.path(), Some(other)).is_err());
    }

    #[test]
    fn configured_id_is_used_on_first_start() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = AgentId::generate();
        let identity = Identity::load_or_generate(dir.path(), Some(wanted)).unwrap();
        assert_eq!(identity.agent_id(), wanted);
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let _identity = Identity::load_or_generate(dir.path(), None).unwrap();
        let meta = fs::metadata(dir.path().join(IDENTITY_FILE)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn shared_secret_agrees() {
        let a = Identity::generate();
        let b = Identity::generate();
        let ab = a.diffie_hellman(b.public_key());
        let ba = b.diffie_hellman(a.public_key());
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }
}
