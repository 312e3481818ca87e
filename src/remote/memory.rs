//! In-memory [`RemoteStore`] implementation for tests and dry runs.
//!
//! Files live in a `Vec` behind `std::sync::RwLock`. Failures can be
//! injected per file name to exercise retry and partial-failure paths, and
//! every create/update/delete is counted so callers can assert on remote
//! write volume.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::RemoteFileMeta;

use super::{RemoteError, RemoteStore, MIME_DOCUMENT};

struct StoredFile {
    folder_id: String,
    meta: RemoteFileMeta,
    content: Vec<u8>,
}

/// Failure to inject on writes for one file name.
#[derive(Debug, Clone, Copy)]
pub enum InjectedFailure {
    /// Fail the next `n` writes with a transient error.
    Transient(u32),
    /// Fail every write with a permanent error.
    Permanent,
    /// Fail every write with an authentication error.
    Auth,
}

/// In-memory remote store.
pub struct InMemoryStore {
    files: RwLock<Vec<StoredFile>>,
    failures: RwLock<HashMap<String, InjectedFailure>>,
    next_id: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(Vec::new()),
            failures: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            writes: AtomicU64::new(0),
        }
    }

    /// Seed a file directly, bypassing write accounting. Returns its id.
    pub fn insert_file(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
        modified_time: DateTime<Utc>,
    ) -> String {
        let id = self.allocate_id();
        self.files.write().unwrap().push(StoredFile {
            folder_id: folder_id.to_string(),
            meta: RemoteFileMeta {
                id: id.clone(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                modified_time,
                size: Some(content.len() as u64),
                checksum: None,
            },
            content: content.to_vec(),
        });
        id
    }

    pub fn fail_writes(&self, name: &str, failure: InjectedFailure) {
        self.failures
            .write()
            .unwrap()
            .insert(name.to_string(), failure);
    }

    /// Number of create, update, and delete calls that reached the store.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Names of every file in `folder_id`, sorted.
    pub fn names_in(&self, folder_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .read()
            .unwrap()
            .iter()
            .filter(|f| f.folder_id == folder_id)
            .map(|f| f.meta.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn content_of(&self, file_id: &str) -> Option<String> {
        self.files
            .read()
            .unwrap()
            .iter()
            .find(|f| f.meta.id == file_id)
            .map(|f| String::from_utf8_lossy(&f.content).to_string())
    }

    fn allocate_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_failure(&self, name: &str) -> Result<(), RemoteError> {
        let mut failures = self.failures.write().unwrap();
        let Some(failure) = failures.get(name).copied() else {
            return Ok(());
        };
        match failure {
            InjectedFailure::Permanent => Err(RemoteError::Permanent(format!(
                "injected failure for {}",
                name
            ))),
            InjectedFailure::Auth => Err(RemoteError::Auth("token rejected".to_string())),
            InjectedFailure::Transient(0) => {
                failures.remove(name);
                Ok(())
            }
            InjectedFailure::Transient(n) => {
                failures.insert(name.to_string(), InjectedFailure::Transient(n - 1));
                Err(RemoteError::Transient(format!(
                    "injected timeout for {}",
                    name
                )))
            }
        }
    }

    fn name_of(&self, file_id: &str) -> Result<String, RemoteError> {
        self.files
            .read()
            .unwrap()
            .iter()
            .find(|f| f.meta.id == file_id)
            .map(|f| f.meta.name.clone())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: Option<&str>,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError> {
        Ok(self
            .files
            .read()
            .unwrap()
            .iter()
            .filter(|f| f.folder_id == folder_id)
            .filter(|f| mime_type.map_or(true, |m| f.meta.mime_type == m))
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn get_metadata(&self, file_id: &str) -> Result<RemoteFileMeta, RemoteError> {
        self.files
            .read()
            .unwrap()
            .iter()
            .find(|f| f.meta.id == file_id)
            .map(|f| f.meta.clone())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        self.files
            .read()
            .unwrap()
            .iter()
            .find(|f| f.meta.id == file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn create_document(
        &self,
        folder_id: &str,
        name: &str,
        text: &str,
    ) -> Result<String, RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_failure(name)?;
        let id = self.allocate_id();
        self.files.write().unwrap().push(StoredFile {
            folder_id: folder_id.to_string(),
            meta: RemoteFileMeta {
                id: id.clone(),
                name: name.to_string(),
                mime_type: MIME_DOCUMENT.to_string(),
                modified_time: Utc::now(),
                size: None,
                checksum: None,
            },
            content: text.as_bytes().to_vec(),
        });
        Ok(id)
    }

    async fn update_document(&self, document_id: &str, text: &str) -> Result<(), RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let name = self.name_of(document_id)?;
        self.check_failure(&name)?;
        let mut files = self.files.write().unwrap();
        let file = files
            .iter_mut()
            .find(|f| f.meta.id == document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
        file.content = text.as_bytes().to_vec();
        file.meta.modified_time = Utc::now();
        Ok(())
    }

    async fn find_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> Result<Vec<RemoteFileMeta>, RemoteError> {
        Ok(self
            .files
            .read()
            .unwrap()
            .iter()
            .filter(|f| f.folder_id == folder_id && f.meta.name == name)
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.write().unwrap();
        let before = files.len();
        files.retain(|f| f.meta.id != file_id);
        if files.len() == before {
            return Err(RemoteError::NotFound(file_id.to_string()));
        }
        Ok(())
    }
}
