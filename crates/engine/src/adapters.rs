//! External collaborator seams.
//!
//! The engine consumes the document store and credential storage through
//! these traits only. The in-memory implementations ship for embedding and
//! tests; production wires real backends.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use opsflow_core::WorkflowId;
use opsflow_execution::ExecutionSnapshot;
use opsflow_workflow::WorkflowDocument;
use serde_json::{Map, Value};

use crate::error::EngineError;

/// Key/value document storage for workflow definitions and terminal
/// execution snapshots.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a workflow document.
    async fn get(&self, workflow_id: WorkflowId) -> Result<WorkflowDocument, EngineError>;

    /// Persist a terminal execution snapshot.
    async fn put_execution(&self, snapshot: &ExecutionSnapshot) -> Result<(), EngineError>;
}

/// A decrypted credential returned by the resolver.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    /// Login name.
    pub username: String,
    /// Password, if set.
    pub password: Option<String>,
    /// Private key material, if set.
    pub private_key: Option<String>,
}

impl Credential {
    /// The fields this credential contributes to a resolved parameter map.
    #[must_use]
    pub fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("username".into(), Value::String(self.username.clone()));
        if let Some(password) = &self.password {
            map.insert("password".into(), Value::String(password.clone()));
        }
        if let Some(key) = &self.private_key {
            map.insert("private_key".into(), Value::String(key.clone()));
        }
        map
    }
}

/// Resolver returning decrypted secrets by id.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve a credential id to its decrypted fields.
    async fn resolve(&self, credential_id: &str) -> Result<Credential, EngineError>;
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<WorkflowId, WorkflowDocument>,
    executions: DashMap<opsflow_core::ExecutionId, ExecutionSnapshot>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workflow document.
    pub fn put(&self, document: WorkflowDocument) {
        self.documents.insert(document.id, document);
    }

    /// A persisted execution snapshot, if present.
    #[must_use]
    pub fn execution(&self, id: opsflow_core::ExecutionId) -> Option<ExecutionSnapshot> {
        self.executions.get(&id).map(|e| e.value().clone())
    }

    /// Number of persisted execution snapshots.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, workflow_id: WorkflowId) -> Result<WorkflowDocument, EngineError> {
        self.documents
            .get(&workflow_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| EngineError::DocumentStore(format!("workflow not found: {workflow_id}")))
    }

    async fn put_execution(&self, snapshot: &ExecutionSnapshot) -> Result<(), EngineError> {
        self.executions.insert(snapshot.id, snapshot.clone());
        Ok(())
    }
}

/// Credential resolver backed by a fixed map.
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
    credentials: DashMap<String, Credential>,
}

impl StaticCredentialResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential under an id.
    pub fn insert(&self, id: impl Into<String>, credential: Credential) {
        self.credentials.insert(id.into(), credential);
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, credential_id: &str) -> Result<Credential, EngineError> {
        self.credentials
            .get(credential_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| EngineError::CredentialResolution {
                credential_id: credential_id.to_string(),
                message: "not found".into(),
            })
    }
}

/// Convenience alias used across the engine.
pub type SharedDocumentStore = Arc<dyn DocumentStore>;
