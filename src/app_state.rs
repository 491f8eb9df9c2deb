use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::db::memory::{MemoryPolicyStore, MemoryRequestStore};
use crate::db::queries::policies::PgPolicyStore;
use crate::db::queries::requests::PgRequestStore;
use crate::db::retry::{RetryingPolicyStore, RetryingRequestStore};
use crate::db::store::{PolicyStore, RequestStore};
use crate::middleware::auth::{create_token_cache, TokenCache};
use crate::utils::notification::NotificationBus;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::mutator::{HttpResourceMutator, MemoryMutator, MutatorRegistry, PgCheckpostMutator, ResourceMutator};
use crate::workflow::policy::PolicyRegistry;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub config: Arc<Config>,
    pub token_cache: TokenCache,
}

impl AppState {
    /// Wire the engine against Postgres when a pool is given, in-memory otherwise.
    pub async fn build(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        let (requests, policies, checkposts): (Arc<dyn RequestStore>, Arc<dyn PolicyStore>, Arc<dyn ResourceMutator>) =
            match &pool {
                Some(pool) => (
                    Arc::new(PgRequestStore::new(pool.clone())),
                    Arc::new(PgPolicyStore::new(pool.clone())),
                    Arc::new(PgCheckpostMutator::new(pool.clone())),
                ),
                None => (
                    Arc::new(MemoryRequestStore::new()),
                    Arc::new(MemoryPolicyStore::new()),
                    Arc::new(MemoryMutator::new()),
                ),
            };

        let checkposts: Arc<dyn ResourceMutator> = match &config.resource_service_url {
            Some(url) => Arc::new(HttpResourceMutator::new(reqwest::Client::new(), url.clone())),
            None => checkposts,
        };
        let mutators = MutatorRegistry::new().register("checkposts", checkposts);

        Self::with_parts(config, requests, policies, mutators).await
    }

    /// Assemble from explicit stores and mutators; wraps the stores in retries
    /// and seeds the policy registry.
    pub async fn with_parts(
        config: Config,
        requests: Arc<dyn RequestStore>,
        policies: Arc<dyn PolicyStore>,
        mutators: MutatorRegistry,
    ) -> anyhow::Result<Self> {
        let requests: Arc<dyn RequestStore> =
            Arc::new(RetryingRequestStore::new(requests, config.store_retry.clone()));
        let policies = PolicyRegistry::new(Arc::new(RetryingPolicyStore::new(
            policies,
            config.store_retry.clone(),
        )));
        policies.seed(&config.auto_approve_types).await?;

        let engine = WorkflowEngine::new(
            requests,
            policies,
            mutators,
            NotificationBus::new(config.event_channel_capacity),
            config.engine_settings(),
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            token_cache: create_token_cache(),
        })
    }
}
