//! In-memory document store.
//!
//! Backs `--dry-run` and the test suite. Every call is recorded so callers can
//! assert on exactly what was sent.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DocumentStore, DocumentStoreError, DocumentUpsert, FolderUpsert};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    UpsertDocument(String),
    UpsertFolder(String),
    DeleteDocument(String),
    DeleteFolder(String),
}

#[derive(Default)]
struct State {
    documents: BTreeMap<String, DocumentUpsert>,
    folders: BTreeMap<String, FolderUpsert>,
    calls: Vec<StoreCall>,
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<State>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn document(&self, id: &str) -> Option<DocumentUpsert> {
        self.lock().documents.get(id).cloned()
    }

    pub fn folder(&self, id: &str) -> Option<FolderUpsert> {
        self.lock().folders.get(id).cloned()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.lock().documents.keys().cloned().collect()
    }

    pub fn folder_ids(&self) -> Vec<String> {
        self.lock().folders.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn upsert_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::UpsertDocument(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert_document(
        &self,
        _data_source_id: &str,
        doc: DocumentUpsert,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::UpsertDocument(doc.document_id.clone()));
        state.documents.insert(doc.document_id.clone(), doc);
        Ok(())
    }

    async fn upsert_folder(
        &self,
        _data_source_id: &str,
        folder: FolderUpsert,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::UpsertFolder(folder.folder_id.clone()));
        state.folders.insert(folder.folder_id.clone(), folder);
        Ok(())
    }

    async fn delete_document(
        &self,
        _data_source_id: &str,
        document_id: &str,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::DeleteDocument(document_id.to_string()));
        state.documents.remove(document_id);
        Ok(())
    }

    async fn delete_folder(
        &self,
        _data_source_id: &str,
        folder_id: &str,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::DeleteFolder(folder_id.to_string()));
        state.folders.remove(folder_id);
        Ok(())
    }
}
