//! Access configuration and roster.
//!
//! One file owns everything the running service needs to answer "who
//! may connect and who may operate the bot": the operating mode, the
//! administrator identity, pricing, and the enable list (the roster)
//! handed to the protected service. Keeping the roster in the same
//! record as the rest of the access configuration avoids the split
//! source of truth the credential collection used to drift against.

use crate::error::{AppError, AppResult};
use crate::store::credentials::atomic_write;
use keywarden_types::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Who may start self-service flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Any actor may self-provision (paid).
    Public,
    /// Only the administrator may operate.
    Private,
}

impl AccessMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Public => Self::Private,
            Self::Private => Self::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// The persisted access configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub mode: AccessMode,
    pub admin: ActorId,
    pub daily_price: u64,
    pub min_price: u64,
    #[serde(default)]
    pub enabled: Vec<String>,
}

/// Result of a roster reconciliation: the minimal applied change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RosterDiff {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// The live access configuration, backed by one atomically-replaced
/// file.
#[derive(Debug)]
pub struct AccessRoster {
    path: PathBuf,
    config: AccessConfig,
}

impl AccessRoster {
    /// Load the access file, or seed it from defaults when absent.
    pub fn load_or_seed<P: Into<PathBuf>>(path: P, seed: AccessConfig) -> AppResult<Self> {
        let path = path.into();
        let config = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AppError::persistence(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                persist(&path, &seed)?;
                seed
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, config })
    }

    pub fn mode(&self) -> AccessMode {
        self.config.mode
    }

    pub fn admin(&self) -> &ActorId {
        &self.config.admin
    }

    pub fn is_admin(&self, actor: &ActorId) -> bool {
        &self.config.admin == actor
    }

    pub fn daily_price(&self) -> u64 {
        self.config.daily_price
    }

    pub fn min_price(&self) -> u64 {
        self.config.min_price
    }

    pub fn enabled(&self) -> &[String] {
        &self.config.enabled
    }

    pub fn contains(&self, credential: &str) -> bool {
        self.config.enabled.iter().any(|c| c == credential)
    }

    /// Add a credential to the roster. Returns whether the roster
    /// changed.
    pub fn grant(&mut self, credential: &str) -> AppResult<bool> {
        if self.contains(credential) {
            return Ok(false);
        }
        let mut updated = self.config.clone();
        updated.enabled.push(credential.to_string());
        self.commit(updated)?;
        Ok(true)
    }

    /// Remove a credential from the roster. Returns whether the
    /// roster changed.
    pub fn revoke(&mut self, credential: &str) -> AppResult<bool> {
        if !self.contains(credential) {
            return Ok(false);
        }
        let mut updated = self.config.clone();
        updated.enabled.retain(|c| c != credential);
        self.commit(updated)?;
        Ok(true)
    }

    /// Remove several credentials in one persisted step.
    pub fn revoke_all(&mut self, credentials: &[String]) -> AppResult<Vec<String>> {
        let doomed: Vec<String> = credentials
            .iter()
            .filter(|c| self.contains(c))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }
        let mut updated = self.config.clone();
        updated.enabled.retain(|c| !doomed.contains(c));
        self.commit(updated)?;
        Ok(doomed)
    }

    /// Bring the roster to exactly `desired`, applying only the
    /// symmetric difference. Persists once; the caller fires the
    /// reload side effect at most once and only when the diff is
    /// non-empty.
    pub fn reconcile(&mut self, desired: &HashSet<String>) -> AppResult<RosterDiff> {
        let current: HashSet<String> = self.config.enabled.iter().cloned().collect();
        let mut diff = RosterDiff {
            added: desired.difference(&current).cloned().collect(),
            removed: current.difference(desired).cloned().collect(),
        };
        diff.added.sort();
        diff.removed.sort();

        if !diff.changed() {
            return Ok(diff);
        }

        let mut updated = self.config.clone();
        updated.enabled.retain(|c| desired.contains(c));
        updated.enabled.extend(diff.added.iter().cloned());
        self.commit(updated)?;
        Ok(diff)
    }

    /// Flip public/private. Administrator only; enforced by callers.
    pub fn toggle_mode(&mut self) -> AppResult<AccessMode> {
        let mut updated = self.config.clone();
        updated.mode = updated.mode.toggled();
        let mode = updated.mode;
        self.commit(updated)?;
        Ok(mode)
    }

    /// Re-read the access file, discarding in-memory state. Used
    /// after a restore replaces the underlying file.
    pub fn reload_from_disk(&mut self) -> AppResult<()> {
        let bytes = fs::read(&self.path)?;
        self.config = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::persistence(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }

    fn commit(&mut self, updated: AccessConfig) -> AppResult<()> {
        persist(&self.path, &updated)?;
        self.config = updated;
        Ok(())
    }
}

fn persist(path: &Path, config: &AccessConfig) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(config)?;
    atomic_write(path, &bytes)
}
