// src/db/queries/requests.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::requests::{ActorRef, Decision, Request, RequestPayload, RequestStatus, RequestType};
use crate::db::store::{ClaimOutcome, RequestStore, StoreError, StoreResult};

const REQUEST_COLUMNS: &str = r#"
    id, request_type, payload, status,
    requested_by_id, requested_by_name, decided_by_id, decided_by_name,
    approved_document_id, created_at, decided_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    request_type: String,
    payload: serde_json::Value,
    status: String,
    requested_by_id: String,
    requested_by_name: String,
    decided_by_id: Option<String>,
    decided_by_name: Option<String>,
    approved_document_id: Option<String>,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl TryFrom<RequestRow> for Request {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let request_type: RequestType = row
            .request_type
            .parse()
            .map_err(|_| StoreError::Backend(format!("unknown request type '{}' in row {}", row.request_type, row.id)))?;
        let payload: RequestPayload = serde_json::from_value(json!({
            "requestType": request_type,
            "payload": row.payload,
        }))
        .map_err(|e| StoreError::Backend(format!("corrupt payload in row {}: {}", row.id, e)))?;
        let status = RequestStatus::from_db(&row.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown status '{}' in row {}", row.status, row.id)))?;
        let decided_by = match (row.decided_by_id, row.decided_by_name) {
            (Some(id), Some(display_name)) => Some(ActorRef { id, display_name }),
            _ => None,
        };

        Ok(Request {
            id: row.id,
            payload,
            status,
            requested_by: ActorRef {
                id: row.requested_by_id,
                display_name: row.requested_by_name,
            },
            decided_by,
            approved_document_id: row.approved_document_id,
            created_at: row.created_at,
            decided_at: row.decided_at,
        })
    }
}

fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

/// Postgres-backed request store over the `approval_requests` table.
#[derive(Clone)]
pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> StoreResult<Option<Request>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Request::try_from).transpose()
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn insert(&self, request: &Request, claim: Option<(Uuid, Duration)>) -> StoreResult<()> {
        let (claim_token, claim_expires_at) = match claim {
            Some((token, lease)) => (Some(token), Some(lease_deadline(lease))),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO approval_requests (
                id, request_type, payload, status,
                requested_by_id, requested_by_name, decided_by_id, decided_by_name,
                approved_document_id, created_at, decided_at,
                claim_token, claim_expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(request.id)
        .bind(request.request_type().as_str())
        .bind(request.payload.body())
        .bind(request.status.as_str())
        .bind(&request.requested_by.id)
        .bind(&request.requested_by.display_name)
        .bind(request.decided_by.as_ref().map(|a| a.id.clone()))
        .bind(request.decided_by.as_ref().map(|a| a.display_name.clone()))
        .bind(&request.approved_document_id)
        .bind(request.created_at)
        .bind(request.decided_at)
        .bind(claim_token)
        .bind(claim_expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Request>> {
        self.fetch(id).await
    }

    async fn try_claim(&self, id: Uuid, claim: Uuid, lease: Duration) -> StoreResult<ClaimOutcome> {
        let claimed = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            UPDATE approval_requests
            SET claim_token = $2, claim_expires_at = $3
            WHERE id = $1
              AND status = 'pending'
              AND (claim_token IS NULL OR claim_token = $2 OR claim_expires_at < $4)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(claim)
        .bind(lease_deadline(lease))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(row.try_into()?));
        }

        Ok(match self.fetch(id).await? {
            None => ClaimOutcome::NotFound,
            Some(current) if current.status.is_terminal() => ClaimOutcome::Decided(current),
            Some(current) => ClaimOutcome::Busy(current),
        })
    }

    async fn release_claim(&self, id: Uuid, claim: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE approval_requests
            SET claim_token = NULL, claim_expires_at = NULL
            WHERE id = $1 AND claim_token = $2
            "#,
        )
        .bind(id)
        .bind(claim)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn commit_decision(
        &self,
        id: Uuid,
        claim: Uuid,
        decision: &Decision,
    ) -> StoreResult<Option<Request>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            UPDATE approval_requests
            SET status = $3,
                decided_by_id = $4,
                decided_by_name = $5,
                approved_document_id = $6,
                decided_at = $7,
                claim_token = NULL,
                claim_expires_at = NULL
            WHERE id = $1 AND status = 'pending' AND claim_token = $2
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(claim)
        .bind(decision.status.as_str())
        .bind(&decision.decided_by.id)
        .bind(&decision.decided_by.display_name)
        .bind(&decision.approved_document_id)
        .bind(decision.decided_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Request::try_from).transpose()
    }

    async fn list_pending(&self) -> StoreResult<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM approval_requests
            WHERE status = 'pending'
              AND (claim_token IS NULL OR claim_expires_at < $1)
            ORDER BY created_at DESC, seq DESC
            "#
        ))
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Request::try_from).collect()
    }

    async fn list_history(&self, offset: u64, limit: u32) -> StoreResult<(Vec<Request>, u64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM approval_requests WHERE status <> 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM approval_requests
            WHERE status <> 'pending'
            ORDER BY created_at DESC, seq DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let items = rows.into_iter().map(Request::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((items, total.max(0) as u64))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}
