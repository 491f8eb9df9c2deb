//! Collaborators that apply an approved payload to its target collection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::requests::RequestPayload;

#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    #[error("resource {0} not found")]
    NotFound(String),

    #[error("resource service rejected the change: {0}")]
    Rejected(String),

    #[error("resource service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no mutator registered for collection '{0}'")]
    Unsupported(String),
}

/// Identifies one application of a request. `request_id` doubles as the
/// idempotency key: applying the same request twice must yield the same
/// resource id.
#[derive(Debug, Clone)]
pub struct MutationContext {
    pub request_id: Uuid,
    pub collection: String,
}

#[async_trait]
pub trait ResourceMutator: Send + Sync {
    /// Perform the change and return the id of the affected resource.
    async fn apply(&self, ctx: &MutationContext, payload: &RequestPayload) -> Result<String, MutatorError>;
}

/// Mutators keyed by target collection.
#[derive(Clone, Default)]
pub struct MutatorRegistry {
    by_collection: HashMap<String, Arc<dyn ResourceMutator>>,
}

impl MutatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, collection: impl Into<String>, mutator: Arc<dyn ResourceMutator>) -> Self {
        self.by_collection.insert(collection.into(), mutator);
        self
    }

    pub fn get(&self, collection: &str) -> Option<Arc<dyn ResourceMutator>> {
        self.by_collection.get(collection).cloned()
    }
}

/// Checkpost accounts in Postgres.
pub struct PgCheckpostMutator {
    pool: PgPool,
}

impl PgCheckpostMutator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceMutator for PgCheckpostMutator {
    async fn apply(&self, ctx: &MutationContext, payload: &RequestPayload) -> Result<String, MutatorError> {
        match payload {
            RequestPayload::CheckpostCreate(p) => {
                // A replay for the same request returns the row it created the first time.
                let id: String = sqlx::query_scalar(
                    r#"
                    INSERT INTO checkposts (id, name, location, contact_email, contact_phone, source_request_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (source_request_id) DO UPDATE SET source_request_id = EXCLUDED.source_request_id
                    RETURNING id
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&p.name)
                .bind(&p.location)
                .bind(&p.contact_email)
                .bind(&p.contact_phone)
                .bind(ctx.request_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(id)
            }
            RequestPayload::CheckpostDelete(p) => {
                let deleted: Option<String> = sqlx::query_scalar(
                    r#"
                    UPDATE checkposts
                    SET deleted_at = COALESCE(deleted_at, now()), deleted_by_request_id = $2
                    WHERE id = $1 AND (deleted_at IS NULL OR deleted_by_request_id = $2)
                    RETURNING id
                    "#,
                )
                .bind(&p.checkpost_id)
                .bind(ctx.request_id)
                .fetch_optional(&self.pool)
                .await?;
                deleted.ok_or_else(|| MutatorError::NotFound(p.checkpost_id.clone()))
            }
        }
    }
}

#[derive(Deserialize)]
struct CreatedResource {
    id: Value,
}

/// Forwards changes to an upstream CRUD service:
/// `POST {base}/{collection}` for creations, `DELETE {base}/{collection}/{id}` for deletions.
pub struct HttpResourceMutator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceMutator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check(response: reqwest::Response, resource: &str) -> Result<reqwest::Response, MutatorError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MutatorError::NotFound(resource.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MutatorError::Rejected(format!("{}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl ResourceMutator for HttpResourceMutator {
    async fn apply(&self, ctx: &MutationContext, payload: &RequestPayload) -> Result<String, MutatorError> {
        let idempotency_key = ctx.request_id.to_string();
        match payload {
            RequestPayload::CheckpostCreate(p) => {
                let url = format!("{}/{}", self.base_url, ctx.collection);
                let response = self
                    .client
                    .post(&url)
                    .header("Idempotency-Key", &idempotency_key)
                    .json(p)
                    .send()
                    .await?;
                let created: CreatedResource = Self::check(response, &ctx.collection).await?.json().await?;
                match created.id {
                    Value::String(id) => Ok(id),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(MutatorError::Rejected(format!("unexpected id in response: {}", other))),
                }
            }
            RequestPayload::CheckpostDelete(p) => {
                let url = format!("{}/{}/{}", self.base_url, ctx.collection, p.checkpost_id);
                let response = self
                    .client
                    .delete(&url)
                    .header("Idempotency-Key", &idempotency_key)
                    .send()
                    .await?;
                Self::check(response, &p.checkpost_id).await?;
                Ok(p.checkpost_id.clone())
            }
        }
    }
}

#[derive(Default)]
struct MemoryCollection {
    documents: HashMap<String, Value>,
    applied: HashMap<Uuid, String>,
}

/// An in-process collection for development without a resource backend.
#[derive(Default)]
pub struct MemoryMutator {
    inner: Mutex<MemoryCollection>,
}

impl MemoryMutator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.documents.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.documents.len()
    }

    pub async fn insert(&self, id: impl Into<String>, document: Value) {
        self.inner.lock().await.documents.insert(id.into(), document);
    }
}

#[async_trait]
impl ResourceMutator for MemoryMutator {
    async fn apply(&self, ctx: &MutationContext, payload: &RequestPayload) -> Result<String, MutatorError> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.applied.get(&ctx.request_id) {
            return Ok(id.clone());
        }
        let id = match payload {
            RequestPayload::CheckpostCreate(_) => {
                let id = Uuid::new_v4().to_string();
                inner.documents.insert(id.clone(), payload.body());
                id
            }
            RequestPayload::CheckpostDelete(p) => {
                inner
                    .documents
                    .remove(&p.checkpost_id)
                    .ok_or_else(|| MutatorError::NotFound(p.checkpost_id.clone()))?;
                p.checkpost_id.clone()
            }
        };
        inner.applied.insert(ctx.request_id, id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::requests::{CheckpostCreatePayload, CheckpostDeletePayload};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> MutationContext {
        MutationContext { request_id: Uuid::new_v4(), collection: "checkposts".into() }
    }

    fn create() -> RequestPayload {
        RequestPayload::CheckpostCreate(CheckpostCreatePayload {
            name: "River Bridge".into(),
            location: "SH-12 km 40".into(),
            contact_email: "bridge@transit.example".into(),
            contact_phone: None,
        })
    }

    #[tokio::test]
    async fn memory_mutator_is_idempotent_per_request() {
        let mutator = MemoryMutator::new();
        let ctx = ctx();
        let first = mutator.apply(&ctx, &create()).await.unwrap();
        let second = mutator.apply(&ctx, &create()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mutator.len().await, 1);
    }

    #[tokio::test]
    async fn memory_delete_of_missing_document_fails() {
        let mutator = MemoryMutator::new();
        let payload = RequestPayload::CheckpostDelete(CheckpostDeletePayload { checkpost_id: "cp-9".into() });
        let err = mutator.apply(&ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, MutatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn http_create_returns_upstream_id() {
        let server = MockServer::start().await;
        let ctx = ctx();
        Mock::given(method("POST"))
            .and(path("/checkposts"))
            .and(header("Idempotency-Key", ctx.request_id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "cp-100" })))
            .expect(1)
            .mount(&server)
            .await;

        let mutator = HttpResourceMutator::new(reqwest::Client::new(), server.uri());
        assert_eq!(mutator.apply(&ctx, &create()).await.unwrap(), "cp-100");
    }

    #[tokio::test]
    async fn http_delete_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/checkposts/cp-7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mutator = HttpResourceMutator::new(reqwest::Client::new(), format!("{}/", server.uri()));
        let payload = RequestPayload::CheckpostDelete(CheckpostDeletePayload { checkpost_id: "cp-7".into() });
        let err = mutator.apply(&ctx(), &payload).await.unwrap_err();
        assert!(matches!(err, MutatorError::NotFound(id) if id == "cp-7"));
    }

    #[tokio::test]
    async fn http_server_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkposts"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mutator = HttpResourceMutator::new(reqwest::Client::new(), server.uri());
        let err = mutator.apply(&ctx(), &create()).await.unwrap_err();
        assert!(matches!(err, MutatorError::Rejected(msg) if msg.contains("boom")));
    }
}
