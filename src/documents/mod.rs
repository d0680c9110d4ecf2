//! Document store accessor
//!
//! The document index is consumed through [`DocumentStore`]: idempotent
//! upserts and deletes keyed by internal id. Deleting an id that does not exist
//! succeeds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod memory;

pub use http::HttpDocumentStore;
pub use memory::{InMemoryDocumentStore, StoreCall};

/// MIME type attached to folders mirroring provider containers.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.provider-sync.folder";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentStoreError {
    #[error("document store returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("document store unreachable: {0}")]
    Network(String),
    #[error("invalid document store request: {0}")]
    Invalid(String),
}

impl DocumentStoreError {
    /// Server-side and connectivity failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DocumentStoreError::Http { status, .. } => *status == 429 || *status >= 500,
            DocumentStoreError::Network(_) => true,
            DocumentStoreError::Invalid(_) => false,
        }
    }
}

/// A leaf rendered for the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpsert {
    pub document_id: String,
    pub text: String,
    pub tags: Vec<String>,
    /// `[self, immediate parent, ..., scope root]`.
    pub parents: Vec<String>,
    pub parent_id: Option<String>,
    pub source_url: Option<String>,
    /// Upstream modification time in epoch milliseconds.
    pub timestamp: Option<i64>,
}

/// A scope, section or container folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderUpsert {
    pub folder_id: String,
    pub title: String,
    pub parents: Vec<String>,
    pub parent_id: Option<String>,
    pub mime_type: String,
    pub source_url: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_document(
        &self,
        data_source_id: &str,
        doc: DocumentUpsert,
    ) -> Result<(), DocumentStoreError>;
    async fn upsert_folder(
        &self,
        data_source_id: &str,
        folder: FolderUpsert,
    ) -> Result<(), DocumentStoreError>;
    async fn delete_document(
        &self,
        data_source_id: &str,
        document_id: &str,
    ) -> Result<(), DocumentStoreError>;
    async fn delete_folder(
        &self,
        data_source_id: &str,
        folder_id: &str,
    ) -> Result<(), DocumentStoreError>;
}
