//! Record store collaborator
//!
//! The application workflows persist users, report documents and sent emails
//! through this trait. Production deployments back it with their database;
//! the in-memory implementation serves tests and the demo binary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Errors from the record store
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Transient backend failure
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

/// Email kinds the signup workflow sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Welcome,
    Onboarding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentEmail {
    pub user_id: String,
    pub kind: EmailKind,
    pub sent_at: DateTime<Utc>,
}

/// A new report document row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub report_id: String,
    pub storage_path: String,
    pub original_filename: String,
    pub document_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub report_id: String,
    pub storage_path: String,
    pub original_filename: String,
    pub document_type: String,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Persistence used by the application workflows
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn create_user(&self, email: &str) -> Result<User, RecordError>;

    async fn record_email(&self, user_id: &str, kind: EmailKind) -> Result<(), RecordError>;

    async fn sent_emails(&self, user_id: &str) -> Result<Vec<SentEmail>, RecordError>;

    async fn insert_document(&self, document: NewDocument) -> Result<Document, RecordError>;

    /// Replace a document's metadata and return the updated row
    async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<Document, RecordError>;

    async fn list_documents(&self) -> Result<Vec<Document>, RecordError>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    emails: Vec<SentEmail>,
    documents: HashMap<String, Document>,
}

/// In-memory record store
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<Tables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.tables.read().users.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_user(&self, email: &str) -> Result<User, RecordError> {
        let user = User {
            id: Uuid::now_v7().to_string(),
            email: email.to_string(),
        };
        self.tables
            .write()
            .users
            .insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn record_email(&self, user_id: &str, kind: EmailKind) -> Result<(), RecordError> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(user_id) {
            return Err(RecordError::NotFound(format!("user {user_id}")));
        }
        tables.emails.push(SentEmail {
            user_id: user_id.to_string(),
            kind,
            sent_at: Utc::now(),
        });
        Ok(())
    }

    async fn sent_emails(&self, user_id: &str) -> Result<Vec<SentEmail>, RecordError> {
        Ok(self
            .tables
            .read()
            .emails
            .iter()
            .filter(|email| email.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_document(&self, document: NewDocument) -> Result<Document, RecordError> {
        let document = Document {
            id: Uuid::now_v7().to_string(),
            report_id: document.report_id,
            storage_path: document.storage_path,
            original_filename: document.original_filename,
            document_type: document.document_type,
            metadata: document.metadata,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<Document, RecordError> {
        let mut tables = self.tables.write();
        let document = tables
            .documents
            .get_mut(document_id)
            .ok_or_else(|| RecordError::NotFound(format!("document {document_id}")))?;
        document.metadata = metadata;
        Ok(document.clone())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, RecordError> {
        let mut documents: Vec<Document> =
            self.tables.read().documents.values().cloned().collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emails_require_existing_user() {
        let store = InMemoryRecordStore::new();

        let err = store
            .record_email("ghost", EmailKind::Welcome)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::NotFound(_)));

        let user = store.create_user("a@b.com").await.unwrap();
        store.record_email(&user.id, EmailKind::Welcome).await.unwrap();

        let sent = store.sent_emails(&user.id).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EmailKind::Welcome);
    }

    #[tokio::test]
    async fn test_update_document_metadata() {
        let store = InMemoryRecordStore::new();
        let document = store
            .insert_document(NewDocument {
                report_id: "r1".into(),
                storage_path: "reports/r1/q3.xlsx".into(),
                original_filename: "q3.xlsx".into(),
                document_type: "spreadsheet".into(),
                metadata: Map::new(),
            })
            .await
            .unwrap();

        let mut metadata = Map::new();
        metadata.insert("pages".into(), json!(3));
        let updated = store
            .update_document_metadata(&document.id, metadata)
            .await
            .unwrap();
        assert_eq!(updated.metadata.get("pages"), Some(&json!(3)));

        let missing = store.update_document_metadata("nope", Map::new()).await;
        assert!(matches!(missing, Err(RecordError::NotFound(_))));
    }
}
