//! Store backed by memory, optionally persisted to a JSON state file.
//!
//! With a state file every operation reloads the file under the store's
//! lock, so separate processes (a worker and a CLI submitting scans)
//! observe each other's writes. Writes go to a temporary file in the same
//! directory that is then renamed over the state file.

use super::{PaymentApplied, PaymentRecord, ScanStore, ScanUpdate, StoreState};
use crate::error::StoreError;
use crate::models::{ScanRequest, ScanStatus};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl StateStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// A store persisted at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> Result<R, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(ref path) = self.path {
            *state = load(path).await?;
        }
        Ok(f(&state))
    }

    async fn write<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(ref path) = self.path {
            *state = load(path).await?;
        }

        let mut next = state.clone();
        let result = f(&mut next)?;

        if let Some(ref path) = self.path {
            save(path, &next).await?;
        }
        *state = next;
        Ok(result)
    }
}

async fn load(path: &Path) -> Result<StoreState, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(StoreState::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreState::default()),
        Err(e) => Err(e.into()),
    }
}

async fn save(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        debug!("Persisted state to {}", path.display());
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[async_trait]
impl ScanStore for StateStore {
    async fn insert(&self, scan: ScanRequest) -> Result<(), StoreError> {
        self.write(|state| state.insert(scan)).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScanRequest>, StoreError> {
        self.read(|state| state.get(id).cloned()).await
    }

    async fn list_by_status(&self, status: ScanStatus) -> Result<Vec<ScanRequest>, StoreError> {
        self.read(|state| state.list_by_status(status)).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ScanRequest>, StoreError> {
        self.read(|state| state.recent(limit)).await
    }

    async fn children(&self, parent: Uuid) -> Result<Vec<ScanRequest>, StoreError> {
        self.read(|state| state.children(parent)).await
    }

    async fn update(&self, id: Uuid, update: ScanUpdate) -> Result<ScanRequest, StoreError> {
        self.write(|state| state.apply(id, update)).await
    }

    async fn consume_quota(&self, identity: &str, month: &str, limit: u32) -> Result<bool, StoreError> {
        self.write(|state| Ok(state.consume_quota(identity, month, limit)))
            .await
    }

    async fn apply_payment(&self, payment: &PaymentRecord) -> Result<PaymentApplied, StoreError> {
        self.write(|state| state.apply_payment(payment)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanTier;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = StateStore::in_memory();
        let scan = ScanRequest::new("a@example.com", "https://example.com", ScanTier::Quick);
        let id = scan.id;
        store.insert(scan.clone()).await.unwrap();

        assert_eq!(store.get(id).await.unwrap(), Some(scan));
        assert!(matches!(
            store.insert(store.get(id).await.unwrap().unwrap()).await,
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.list_by_status(ScanStatus::Pending).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_is_shared_between_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("nullscan-state.json");
        let writer = StateStore::open(&path);
        let reader = StateStore::open(&path);

        let scan = ScanRequest::new("a@example.com", "https://example.com", ScanTier::Pro);
        let id = scan.id;
        writer.insert(scan).await.unwrap();
        writer.update(id, ScanUpdate::Started).await.unwrap();

        let seen = reader.get(id).await.unwrap().unwrap();
        assert_eq!(seen.status, ScanStatus::Running);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("s.json"));
        let scan = ScanRequest::new("a@example.com", "https://example.com", ScanTier::Quick);
        let id = scan.id;
        store.insert(scan).await.unwrap();

        assert!(store.update(id, ScanUpdate::RetryScheduled).await.is_err());
        assert_eq!(store.get(id).await.unwrap().unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = StateStore::open(&path);
        assert!(matches!(store.get(Uuid::new_v4()).await, Err(StoreError::Serde(_))));
    }

    #[tokio::test]
    async fn test_missing_scan_update() {
        let store = StateStore::in_memory();
        let err = store.update(Uuid::new_v4(), ScanUpdate::Started).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
