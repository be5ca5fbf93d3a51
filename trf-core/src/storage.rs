use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::record::{CanonicalRecord, DocumentRecord};

/// Key-value document store the pipeline persists through. Last-write-wins
/// durability; no cross-document transactions are required of
/// implementations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>>;
    async fn put(&self, record: DocumentRecord) -> Result<()>;
    async fn get_case(&self, case_id: &str) -> Result<Option<CanonicalRecord>>;
    async fn put_case(&self, record: CanonicalRecord) -> Result<()>;
}

/// In-memory implementation of [`DocumentStore`], for tests and
/// single-process deployments.
pub struct InMemoryDocumentStore {
    documents: Arc<DashMap<String, DocumentRecord>>,
    cases: Arc<DashMap<String, CanonicalRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(DashMap::new()),
            cases: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.documents.get(document_id).map(|entry| entry.clone()))
    }

    async fn put(&self, record: DocumentRecord) -> Result<()> {
        self.documents.insert(record.document_id.clone(), record);
        Ok(())
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<CanonicalRecord>> {
        Ok(self.cases.get(case_id).map(|entry| entry.clone()))
    }

    async fn put_case(&self, record: CanonicalRecord) -> Result<()> {
        self.cases.insert(record.case_id.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DocumentStatus;

    #[tokio::test]
    async fn round_trips_documents_and_cases() {
        let store = InMemoryDocumentStore::new();

        let mut record = DocumentRecord::new("doc-1", "case-1");
        record.advance_to(DocumentStatus::OcrDone);
        store.put(record).await.unwrap();

        let loaded = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::OcrDone);
        assert!(store.get("doc-2").await.unwrap().is_none());

        store.put_case(CanonicalRecord::new("case-1")).await.unwrap();
        assert!(store.get_case("case-1").await.unwrap().is_some());
        assert!(store.get_case("case-2").await.unwrap().is_none());
    }
}
