//! HTTP document store client.
//!
//! `POST|DELETE {base}/data_sources/{ds}/documents/{id}` and the same under
//! `folders/`. A 404 on delete means the entry is already gone.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{DocumentStore, DocumentStoreError, DocumentUpsert, FolderUpsert};

pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DocumentStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocumentStoreError::Invalid(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(
        &self,
        data_source_id: &str,
        collection: &str,
        id: &str,
    ) -> Result<Url, DocumentStoreError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DocumentStoreError::Invalid(format!("base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| DocumentStoreError::Invalid("base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["data_sources", data_source_id, collection, id]);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<(), DocumentStoreError> {
        let is_delete = method == Method::DELETE;
        let mut request = self.client.request(method, url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DocumentStoreError::Network(e.to_string()))?;
        let status = response.status();

        if status.is_success() || (is_delete && status == StatusCode::NOT_FOUND) {
            debug!(%url, status = status.as_u16(), "Document store call applied");
            return Ok(());
        }
        Err(DocumentStoreError::Http {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn upsert_document(
        &self,
        data_source_id: &str,
        doc: DocumentUpsert,
    ) -> Result<(), DocumentStoreError> {
        let url = self.url(data_source_id, "documents", &doc.document_id)?;
        let body = json!({
            "text": doc.text,
            "tags": doc.tags,
            "parents": doc.parents,
            "parent_id": doc.parent_id,
            "source_url": doc.source_url,
            "timestamp": doc.timestamp,
        });
        self.send(Method::POST, url, Some(body)).await
    }

    async fn upsert_folder(
        &self,
        data_source_id: &str,
        folder: FolderUpsert,
    ) -> Result<(), DocumentStoreError> {
        let url = self.url(data_source_id, "folders", &folder.folder_id)?;
        let body = json!({
            "title": folder.title,
            "parents": folder.parents,
            "parent_id": folder.parent_id,
            "mime_type": folder.mime_type,
            "source_url": folder.source_url,
        });
        self.send(Method::POST, url, Some(body)).await
    }

    async fn delete_document(
        &self,
        data_source_id: &str,
        document_id: &str,
    ) -> Result<(), DocumentStoreError> {
        let url = self.url(data_source_id, "documents", document_id)?;
        self.send(Method::DELETE, url, None).await
    }

    async fn delete_folder(
        &self,
        data_source_id: &str,
        folder_id: &str,
    ) -> Result<(), DocumentStoreError> {
        let url = self.url(data_source_id, "folders", folder_id)?;
        self.send(Method::DELETE, url, None).await
    }
}
