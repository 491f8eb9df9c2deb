// src/db/queries/policies.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::db::models::policy::RequestTypePolicy;
use crate::db::models::requests::RequestType;
use crate::db::store::{PolicyStore, StoreResult};

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    request_type: String,
    target_collection: String,
    is_auto_approved: bool,
    updated_at: DateTime<Utc>,
}

impl PolicyRow {
    fn into_policy(self) -> Option<RequestTypePolicy> {
        match self.request_type.parse::<RequestType>() {
            Ok(request_type) => Some(RequestTypePolicy {
                request_type,
                target_collection: self.target_collection,
                is_auto_approved: self.is_auto_approved,
                updated_at: self.updated_at,
            }),
            Err(_) => {
                warn!("Ignoring policy for unknown request type '{}'", self.request_type);
                None
            }
        }
    }
}

/// Postgres-backed policy store over `request_type_policies`.
#[derive(Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn get(&self, request_type: RequestType) -> StoreResult<Option<RequestTypePolicy>> {
        let row = sqlx::query_as::<_, PolicyRow>(
            r#"
            SELECT request_type, target_collection, is_auto_approved, updated_at
            FROM request_type_policies
            WHERE request_type = $1
            "#,
        )
        .bind(request_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(PolicyRow::into_policy))
    }

    async fn list(&self) -> StoreResult<Vec<RequestTypePolicy>> {
        let rows = sqlx::query_as::<_, PolicyRow>(
            r#"
            SELECT request_type, target_collection, is_auto_approved, updated_at
            FROM request_type_policies
            ORDER BY request_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(PolicyRow::into_policy).collect())
    }

    async fn set_auto_approved(
        &self,
        request_type: RequestType,
        enabled: bool,
    ) -> StoreResult<Option<RequestTypePolicy>> {
        let row = sqlx::query_as::<_, PolicyRow>(
            r#"
            UPDATE request_type_policies
            SET is_auto_approved = $2, updated_at = $3
            WHERE request_type = $1
            RETURNING request_type, target_collection, is_auto_approved, updated_at
            "#,
        )
        .bind(request_type.as_str())
        .bind(enabled)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(PolicyRow::into_policy))
    }

    async fn ensure(&self, policy: &RequestTypePolicy) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO request_type_policies (request_type, target_collection, is_auto_approved, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (request_type) DO NOTHING
            "#,
        )
        .bind(policy.request_type.as_str())
        .bind(&policy.target_collection)
        .bind(policy.is_auto_approved)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
