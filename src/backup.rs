//! Backup and restore of the persisted state set.
//!
//! A backup is a zip archive of the fixed resource set that exists on
//! disk. Restore honors only the allow-listed entry names — entry
//! paths are flattened to their base name first, so traversal-shaped
//! names in a hostile archive degrade to either an allowed name or a
//! discard. The file replacement and the in-memory state reload both
//! happen inside the store's exclusion domain; the service reload and
//! the delayed front-end restart fire after it is released.

use crate::config::PathsConfig;
use crate::error::{AppError, AppResult};
use crate::reload::SharedControl;
use crate::store::SharedCore;
use crate::store::credentials::atomic_write;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// The only resource names honored by backup and restore.
pub const BACKUP_RESOURCES: &[&str] = &["credentials.json", "access.json", "domain"];

/// Result of a restore.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Allow-listed entries that were applied, in archive order.
    pub applied: Vec<String>,
    /// Whether the service reload after the replacement succeeded.
    pub reload_ok: bool,
}

pub struct BackupRestoreManager {
    core: SharedCore,
    credentials_path: PathBuf,
    access_path: PathBuf,
    domain_path: PathBuf,
    control: SharedControl,
    restart_delay: Duration,
}

impl std::fmt::Debug for BackupRestoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRestoreManager")
            .field("credentials_path", &self.credentials_path)
            .field("access_path", &self.access_path)
            .field("domain_path", &self.domain_path)
            .finish_non_exhaustive()
    }
}

impl BackupRestoreManager {
    pub fn new(
        core: SharedCore,
        paths: &PathsConfig,
        control: SharedControl,
        restart_delay: Duration,
    ) -> Self {
        Self {
            core,
            credentials_path: paths.credentials.clone(),
            access_path: paths.access.clone(),
            domain_path: paths.domain.clone(),
            control,
            restart_delay,
        }
    }

    fn resource_path(&self, name: &str) -> Option<&Path> {
        match name {
            "credentials.json" => Some(&self.credentials_path),
            "access.json" => Some(&self.access_path),
            "domain" => Some(&self.domain_path),
            _ => None,
        }
    }

    /// Package the existing persisted resources into a zip archive.
    /// Absent resources are skipped silently. The store lock is held
    /// for the duration so the files form one consistent snapshot.
    pub async fn backup(&self) -> AppResult<Vec<u8>> {
        let _guard = self.core.lock().await;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for name in BACKUP_RESOURCES {
            let Some(path) = self.resource_path(name) else {
                continue;
            };
            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            writer
                .start_file(*name, options)
                .map_err(|e| AppError::internal(format!("backup archive: {}", e)))?;
            writer
                .write_all(&data)
                .map_err(|e| AppError::internal(format!("backup archive: {}", e)))?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| AppError::internal(format!("backup archive: {}", e)))?;
        info!("backup archive created");
        Ok(cursor.into_inner())
    }

    /// Replace the live resources with the archive's allow-listed
    /// entries, reload in-memory state, then fire the reload side
    /// effect and schedule the delayed front-end restart.
    pub async fn restore(&self, archive: &[u8]) -> AppResult<RestoreOutcome> {
        let accepted = extract_allowed(archive)?;

        if accepted.is_empty() {
            return Ok(RestoreOutcome {
                applied: Vec::new(),
                reload_ok: true,
            });
        }

        {
            let mut core = self.core.lock().await;
            for (name, data) in &accepted {
                let path = self
                    .resource_path(name)
                    .ok_or_else(|| AppError::internal("accepted entry without a path"))?;
                atomic_write(path, data)?;
            }
            core.restore_from_disk()?;
        }

        let applied: Vec<String> = accepted.into_iter().map(|(name, _)| name).collect();
        info!(entries = ?applied, "restore applied");

        let reload_ok = match self.control.reload().await {
            Ok(()) => true,
            Err(e) => {
                warn!("service reload after restore failed: {}", e);
                false
            }
        };

        // The front-end cannot restart itself while still answering
        // the request that triggered the restore.
        let control = self.control.clone();
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = control.restart_frontend().await {
                warn!("front-end restart after restore failed: {}", e);
            }
        });

        Ok(RestoreOutcome { applied, reload_ok })
    }
}

/// Parse the archive and keep only allow-listed entries. Entry names
/// are flattened to their base name; everything else is discarded,
/// not errored.
fn extract_allowed(archive: &[u8]) -> AppResult<Vec<(String, Vec<u8>)>> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| AppError::Archive(e.to_string()))?;

    let mut accepted = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| AppError::Archive(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let base = Path::new(&raw_name)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let Some(base) = base else {
            debug!(entry = %raw_name, "discarding unnamed archive entry");
            continue;
        };
        if !BACKUP_RESOURCES.contains(&base.as_str()) {
            debug!(entry = %raw_name, "discarding unrecognized archive entry");
            continue;
        }

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| AppError::Archive(e.to_string()))?;
        accepted.push((base, data));
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::reload::ServiceControl;
    use crate::store::{AccessConfig, AccessMode, AccessRoster, CoreState, CredentialStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use keywarden_types::ActorId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct CountingControl {
        reloads: AtomicUsize,
    }

    #[async_trait]
    impl ServiceControl for CountingControl {
        async fn reload(&self) -> AppResult<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restart_frontend(&self) -> AppResult<()> {
            Ok(())
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn paths(dir: &TempDir) -> PathsConfig {
        PathsConfig {
            credentials: dir.path().join("credentials.json"),
            access: dir.path().join("access.json"),
            domain: dir.path().join("domain"),
        }
    }

    fn build(dir: &TempDir) -> (BackupRestoreManager, SharedCore, Arc<CountingControl>) {
        let paths = paths(dir);
        let credentials = CredentialStore::load(&paths.credentials).unwrap();
        let access = AccessRoster::load_or_seed(
            &paths.access,
            AccessConfig {
                mode: AccessMode::Private,
                admin: ActorId::from("admin"),
                daily_price: 1000,
                min_price: 500,
                enabled: Vec::new(),
            },
        )
        .unwrap();
        let core = CoreState::new(credentials, access).into_shared();
        let control = Arc::new(CountingControl {
            reloads: AtomicUsize::new(0),
        });
        let manager = BackupRestoreManager::new(
            core.clone(),
            &paths,
            control.clone(),
            Duration::from_millis(1),
        );
        (manager, core, control)
    }

    #[tokio::test]
    async fn restore_of_backup_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let (manager, core, _) = build(&dir);

        {
            let mut core = core.lock().await;
            core.provision("alice", 30, day("2026-08-01")).unwrap();
            core.provision("bob", 7, day("2026-08-01")).unwrap();
        }
        let before = std::fs::read(dir.path().join("credentials.json")).unwrap();

        let archive = manager.backup().await.unwrap();

        // Mutate after the backup, then restore over it.
        {
            let mut core = core.lock().await;
            core.remove("bob").unwrap();
        }

        let outcome = manager.restore(&archive).await.unwrap();
        assert!(outcome.applied.contains(&"credentials.json".to_string()));
        assert!(outcome.reload_ok);

        let after = std::fs::read(dir.path().join("credentials.json")).unwrap();
        assert_eq!(before, after);

        // In-memory state was reloaded inside the same critical section.
        let core = core.lock().await;
        assert!(core.credentials.get("bob").is_some());
        assert!(core.access.contains("bob"));
    }

    #[tokio::test]
    async fn restore_skips_entries_outside_the_allow_list() {
        let dir = TempDir::new().unwrap();
        let (manager, core, _) = build(&dir);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("../../etc/shadow", options).unwrap();
        writer.write_all(b"nope").unwrap();
        writer.start_file("junk.txt", options).unwrap();
        writer.write_all(b"noise").unwrap();
        writer.start_file("nested/credentials.json", options).unwrap();
        writer
            .write_all(
                br#"[{"credential": "restored", "expires_on": "2027-01-01", "locked": false}]"#,
            )
            .unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let outcome = manager.restore(&archive).await.unwrap();
        assert_eq!(outcome.applied, vec!["credentials.json".to_string()]);

        let core = core.lock().await;
        assert!(core.credentials.get("restored").is_some());
        assert!(!dir.path().join("etc").exists());
        assert!(!dir.path().join("junk.txt").exists());
    }

    #[tokio::test]
    async fn empty_or_foreign_archive_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let (manager, _, control) = build(&dir);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("README.md", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let outcome = manager.restore(&archive).await.unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(control.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn garbage_bytes_are_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let (manager, _, _) = build(&dir);
        let err = manager.restore(b"not a zip").await.unwrap_err();
        assert!(matches!(err, AppError::Archive(_)));
    }
}
