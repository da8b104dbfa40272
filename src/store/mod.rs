//! Persistent state and its single mutual-exclusion domain.
//!
//! `CoreState` bundles the credential collection and the access
//! roster behind one `tokio::sync::Mutex`. Every mutator in the
//! system — conversational flows, the web API, the expiry sweeper,
//! the payment poller's provisioning step, and the restore file
//! replacement — goes through this lock. Externally-blocking work
//! (service reload, provider queries) must happen outside the guard;
//! composite operations therefore return a "roster changed" flag and
//! leave the reload side effect to the caller.

pub mod credentials;
pub mod roster;

use crate::error::AppResult;
use chrono::NaiveDate;
use keywarden_types::{ActorId, CredentialInfo};
use std::sync::Arc;
use tokio::sync::Mutex;

pub use credentials::{CredentialStore, SubscriptionRecord};
pub use roster::{AccessConfig, AccessMode, AccessRoster, RosterDiff};

/// Point-in-time view of the access configuration, taken under the
/// lock and used afterwards without holding it.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub mode: AccessMode,
    pub admin: ActorId,
    pub daily_price: u64,
    pub min_price: u64,
}

#[derive(Debug)]
pub struct CoreState {
    pub credentials: CredentialStore,
    pub access: AccessRoster,
}

/// The single exclusion domain guarding all store and roster state.
pub type SharedCore = Arc<Mutex<CoreState>>;

impl CoreState {
    pub fn new(credentials: CredentialStore, access: AccessRoster) -> Self {
        Self {
            credentials,
            access,
        }
    }

    pub fn into_shared(self) -> SharedCore {
        Arc::new(Mutex::new(self))
    }

    pub fn policy_snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            mode: self.access.mode(),
            admin: self.access.admin().clone(),
            daily_price: self.access.daily_price(),
            min_price: self.access.min_price(),
        }
    }

    pub fn list(&self, today: NaiveDate) -> Vec<CredentialInfo> {
        self.credentials.list(today)
    }

    /// Create a credential and grant it live access. Returns the new
    /// record and whether the roster changed (always true on success).
    pub fn provision(
        &mut self,
        credential: &str,
        days: u32,
        today: NaiveDate,
    ) -> AppResult<(SubscriptionRecord, bool)> {
        let record = self.credentials.create(credential, days, today)?;
        let changed = self.access.grant(credential)?;
        Ok((record, changed))
    }

    /// Renew a credential. Clears any lock and re-grants roster
    /// access if the record is active again.
    pub fn extend(
        &mut self,
        credential: &str,
        extra_days: u32,
        today: NaiveDate,
    ) -> AppResult<(SubscriptionRecord, bool)> {
        let record = self.credentials.renew(credential, extra_days, today)?;
        let changed = self.access.grant(credential)?;
        Ok((record, changed))
    }

    /// Delete a credential and revoke its roster entry. Returns
    /// whether the roster changed.
    pub fn remove(&mut self, credential: &str) -> AppResult<bool> {
        self.credentials.delete(credential)?;
        self.access.revoke(credential)
    }

    /// One sweeper pass: revoke roster access for every record whose
    /// derived status is expired. Never touches `locked`, never
    /// deletes records. Running it twice in a row revokes nothing the
    /// second time.
    pub fn sweep_expired(&mut self, today: NaiveDate) -> AppResult<Vec<String>> {
        let expired: Vec<String> = self
            .credentials
            .list(today)
            .into_iter()
            .filter(|info| info.status == keywarden_types::CredentialStatus::Expired)
            .map(|info| info.credential)
            .collect();
        self.access.revoke_all(&expired)
    }

    /// Bring the roster to exactly the derived-active set.
    pub fn reconcile_roster(&mut self, today: NaiveDate) -> AppResult<RosterDiff> {
        let desired = self.credentials.active_set(today);
        self.access.reconcile(&desired)
    }

    /// Re-read both persisted files, discarding in-memory state.
    /// Called inside the same critical section that replaced the
    /// files during a restore.
    pub fn restore_from_disk(&mut self) -> AppResult<()> {
        self.credentials.reload_from_disk()?;
        self.access.reload_from_disk()
    }
}

/// Read the optional one-line domain label file.
pub fn read_domain(path: &std::path::Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_types::CredentialStatus;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn core(dir: &TempDir) -> CoreState {
        let credentials =
            CredentialStore::load(dir.path().join("credentials.json")).unwrap();
        let access = AccessRoster::load_or_seed(
            dir.path().join("access.json"),
            AccessConfig {
                mode: AccessMode::Private,
                admin: ActorId::from("actor:1"),
                daily_price: 1000,
                min_price: 500,
                enabled: Vec::new(),
            },
        )
        .unwrap();
        CoreState::new(credentials, access)
    }

    #[test]
    fn provision_grants_roster_access() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir);

        let (record, changed) = core.provision("alice", 30, day("2026-08-01")).unwrap();
        assert!(changed);
        assert_eq!(record.expires_on, day("2026-08-31"));
        assert!(core.access.contains("alice"));
    }

    #[test]
    fn sweep_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir);
        core.provision("old", 5, day("2026-01-01")).unwrap();
        core.provision("fresh", 365, day("2026-08-01")).unwrap();

        let first = core.sweep_expired(day("2026-08-01")).unwrap();
        assert_eq!(first, vec!["old".to_string()]);
        assert!(!core.access.contains("old"));
        assert!(core.access.contains("fresh"));

        let second = core.sweep_expired(day("2026-08-01")).unwrap();
        assert!(second.is_empty());
        assert!(core.access.contains("fresh"));
    }

    #[test]
    fn sweep_leaves_records_intact_for_later_renewal() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir);
        core.provision("old", 5, day("2026-01-01")).unwrap();
        core.sweep_expired(day("2026-08-01")).unwrap();

        // The record is still there, just off the roster.
        assert_eq!(
            core.credentials.get("old").unwrap().status(day("2026-08-01")),
            CredentialStatus::Expired
        );

        let (record, changed) = core.extend("old", 30, day("2026-08-01")).unwrap();
        assert!(changed);
        assert_eq!(record.expires_on, day("2026-08-31"));
        assert!(core.access.contains("old"));
    }

    #[test]
    fn reconcile_matches_derived_active_set() {
        let dir = TempDir::new().unwrap();
        let mut core = core(&dir);
        let today = day("2026-08-01");
        core.provision("active", 30, today).unwrap();
        core.provision("stale", 30, day("2026-01-01")).unwrap();
        // Stray roster entry with no backing record.
        core.access.grant("ghost").unwrap();

        let diff = core.reconcile_roster(today).unwrap();
        assert!(diff.changed());

        let roster: std::collections::HashSet<String> =
            core.access.enabled().iter().cloned().collect();
        assert_eq!(roster, core.credentials.active_set(today));
    }
}
