//! The persisted subscription collection.
//!
//! Records live in a single JSON array file that is replaced
//! atomically (write temp, then rename) on every mutation, so a crash
//! mid-write can never leave a truncated collection behind.

use crate::error::{AppError, AppResult};
use chrono::{Days, NaiveDate};
use keywarden_types::{CredentialInfo, CredentialStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One provisioned credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub credential: String,
    pub expires_on: NaiveDate,
    #[serde(default)]
    pub locked: bool,
}

impl SubscriptionRecord {
    /// Derived status; never stored.
    pub fn status(&self, today: NaiveDate) -> CredentialStatus {
        if self.locked {
            CredentialStatus::Locked
        } else if self.expires_on < today {
            CredentialStatus::Expired
        } else {
            CredentialStatus::Active
        }
    }

    pub fn info(&self, today: NaiveDate) -> CredentialInfo {
        CredentialInfo {
            credential: self.credential.clone(),
            expires_on: self.expires_on,
            status: self.status(today),
        }
    }
}

/// In-memory view of the credential collection, backed by one file.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    records: Vec<SubscriptionRecord>,
}

impl CredentialStore {
    /// Load the collection from disk. A missing file is an empty
    /// collection, not an error.
    pub fn load<P: Into<PathBuf>>(path: P) -> AppResult<Self> {
        let path = path.into();
        let records = read_records(&path)?;
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, credential: &str) -> Option<&SubscriptionRecord> {
        self.records.iter().find(|r| r.credential == credential)
    }

    /// Snapshot of all records with derived status, in insertion order.
    pub fn list(&self, today: NaiveDate) -> Vec<CredentialInfo> {
        self.records.iter().map(|r| r.info(today)).collect()
    }

    /// The set of credentials whose derived status is `active`.
    pub fn active_set(&self, today: NaiveDate) -> HashSet<String> {
        self.records
            .iter()
            .filter(|r| r.status(today) == CredentialStatus::Active)
            .map(|r| r.credential.clone())
            .collect()
    }

    /// Insert a new record expiring `days` from `today`.
    pub fn create(
        &mut self,
        credential: &str,
        days: u32,
        today: NaiveDate,
    ) -> AppResult<SubscriptionRecord> {
        if self.get(credential).is_some() {
            return Err(AppError::DuplicateCredential(credential.to_string()));
        }

        let expires_on = today
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| AppError::validation("duration out of range"))?;
        let record = SubscriptionRecord {
            credential: credential.to_string(),
            expires_on,
            locked: false,
        };

        let mut updated = self.records.clone();
        updated.push(record.clone());
        self.commit(updated)?;
        Ok(record)
    }

    /// Extend a record by `extra_days`. A lapsed record is renewed
    /// from `today`, not from its stale expiry, and renewal clears an
    /// administrative lock.
    pub fn renew(
        &mut self,
        credential: &str,
        extra_days: u32,
        today: NaiveDate,
    ) -> AppResult<SubscriptionRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.credential == credential)
            .ok_or_else(|| AppError::NotFound(credential.to_string()))?;

        let mut updated = self.records.clone();
        let record = &mut updated[index];
        let base = record.expires_on.max(today);
        record.expires_on = base
            .checked_add_days(Days::new(u64::from(extra_days)))
            .ok_or_else(|| AppError::validation("duration out of range"))?;
        record.locked = false;

        let renewed = record.clone();
        self.commit(updated)?;
        Ok(renewed)
    }

    /// Remove a record.
    pub fn delete(&mut self, credential: &str) -> AppResult<SubscriptionRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.credential == credential)
            .ok_or_else(|| AppError::NotFound(credential.to_string()))?;

        let mut updated = self.records.clone();
        let removed = updated.remove(index);
        self.commit(updated)?;
        Ok(removed)
    }

    /// Re-read the collection from disk, discarding in-memory state.
    /// Used after a restore replaces the underlying file.
    pub fn reload_from_disk(&mut self) -> AppResult<()> {
        self.records = read_records(&self.path)?;
        Ok(())
    }

    /// Persist first, commit to memory only on success, so a failed
    /// write leaves the in-memory collection matching the file.
    fn commit(&mut self, updated: Vec<SubscriptionRecord>) -> AppResult<()> {
        persist_records(&self.path, &updated)?;
        self.records = updated;
        Ok(())
    }
}

fn read_records(path: &Path) -> AppResult<Vec<SubscriptionRecord>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| AppError::persistence(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn persist_records(path: &Path, records: &[SubscriptionRecord]) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(records)?;
    atomic_write(path, &bytes)
}

/// Replace `path` atomically: write a sibling temp file, then rename.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| AppError::persistence(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::load(dir.path().join("credentials.json")).unwrap()
    }

    #[test]
    fn create_inserts_with_computed_expiry() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let record = store.create("alice", 30, day("2026-08-01")).unwrap();
        assert_eq!(record.expires_on, day("2026-08-31"));
        assert!(!record.locked);
        assert_eq!(record.status(day("2026-08-01")), CredentialStatus::Active);
    }

    #[test]
    fn duplicate_create_fails_and_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.create("alice", 30, day("2026-08-01")).unwrap();

        let err = store.create("alice", 5, day("2026-08-01")).unwrap_err();
        assert!(matches!(err, AppError::DuplicateCredential(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("alice").unwrap().expires_on, day("2026-08-31"));
    }

    #[test]
    fn duplicate_check_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.create("alice", 30, day("2026-08-01")).unwrap();
        store.create("Alice", 30, day("2026-08-01")).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn renew_extends_from_current_expiry_when_still_active() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.create("alice", 10, day("2026-08-01")).unwrap();

        let renewed = store.renew("alice", 5, day("2026-08-05")).unwrap();
        assert_eq!(renewed.expires_on, day("2026-08-16"));
    }

    #[test]
    fn renew_never_backdates_a_lapsed_record() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.create("alice", 10, day("2026-01-01")).unwrap();

        // Expired on 2026-01-11; renewal on 2026-08-01 starts from today.
        let renewed = store.renew("alice", 7, day("2026-08-01")).unwrap();
        assert_eq!(renewed.expires_on, day("2026-08-08"));
    }

    #[test]
    fn renew_clears_lock() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.create("alice", 10, day("2026-08-01")).unwrap();
        // Simulate an administrative lock persisted earlier.
        let mut records = store.list(day("2026-08-01"));
        assert_eq!(records.len(), 1);
        store.records[0].locked = true;
        assert_eq!(
            store.get("alice").unwrap().status(day("2026-08-01")),
            CredentialStatus::Locked
        );

        let renewed = store.renew("alice", 5, day("2026-08-01")).unwrap();
        assert!(!renewed.locked);
        records = store.list(day("2026-08-01"));
        assert_eq!(records[0].status, CredentialStatus::Active);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let err = store.delete("ghost").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn collection_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        {
            let mut store = CredentialStore::load(&path).unwrap();
            store.create("alice", 30, day("2026-08-01")).unwrap();
            store.create("bob", 5, day("2026-08-01")).unwrap();
            store.delete("bob").unwrap();
        }

        let store = CredentialStore::load(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("alice").unwrap().expires_on, day("2026-08-31"));
    }

    #[test]
    fn status_is_derived_from_date_and_lock() {
        let record = SubscriptionRecord {
            credential: "alice".into(),
            expires_on: day("2026-08-10"),
            locked: false,
        };
        assert_eq!(record.status(day("2026-08-10")), CredentialStatus::Active);
        assert_eq!(record.status(day("2026-08-11")), CredentialStatus::Expired);

        let locked = SubscriptionRecord {
            locked: true,
            ..record
        };
        // Locked wins regardless of date.
        assert_eq!(locked.status(day("2026-08-01")), CredentialStatus::Locked);
        assert_eq!(locked.status(day("2026-12-01")), CredentialStatus::Locked);
    }
}
