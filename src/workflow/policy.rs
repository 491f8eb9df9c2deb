use std::sync::Arc;

use tracing::info;

use crate::db::models::policy::RequestTypePolicy;
use crate::db::models::requests::RequestType;
use crate::db::store::PolicyStore;
use crate::workflow::error::{WorkflowError, WorkflowResult};

/// Per-type auto-approval settings.
///
/// Reads always go through to the store, so a toggle is visible to the very
/// next `submit` in any process sharing that store.
#[derive(Clone)]
pub struct PolicyRegistry {
    store: Arc<dyn PolicyStore>,
}

impl PolicyRegistry {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Register every known request type. Existing settings are kept.
    pub async fn seed(&self, auto_approved: &[RequestType]) -> WorkflowResult<()> {
        for request_type in RequestType::ALL {
            let policy = RequestTypePolicy::new(request_type, auto_approved.contains(&request_type));
            self.store.ensure(&policy).await?;
        }
        Ok(())
    }

    pub async fn get(&self, request_type: RequestType) -> WorkflowResult<RequestTypePolicy> {
        self.store
            .get(request_type)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("policy for {}", request_type)))
    }

    pub async fn list_all(&self) -> WorkflowResult<Vec<RequestTypePolicy>> {
        Ok(self.store.list().await?)
    }

    pub async fn set_auto_approved(
        &self,
        request_type: RequestType,
        enabled: bool,
    ) -> WorkflowResult<RequestTypePolicy> {
        let policy = self
            .store
            .set_auto_approved(request_type, enabled)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("policy for {}", request_type)))?;
        info!(request_type = %request_type, enabled, "Auto-approval policy updated");
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryPolicyStore;

    #[tokio::test]
    async fn seed_registers_every_type() {
        let registry = PolicyRegistry::new(Arc::new(MemoryPolicyStore::new()));
        registry.seed(&[RequestType::CheckpostDelete]).await.unwrap();

        let all = registry.list_all().await.unwrap();
        assert_eq!(all.len(), RequestType::ALL.len());
        assert!(!registry.get(RequestType::CheckpostCreate).await.unwrap().is_auto_approved);
        assert!(registry.get(RequestType::CheckpostDelete).await.unwrap().is_auto_approved);
        assert_eq!(all[0].target_collection, "checkposts");
    }

    #[tokio::test]
    async fn toggle_is_read_back_immediately() {
        let registry = PolicyRegistry::new(Arc::new(MemoryPolicyStore::new()));
        registry.seed(&[]).await.unwrap();

        let updated = registry.set_auto_approved(RequestType::CheckpostCreate, true).await.unwrap();
        assert!(updated.is_auto_approved);
        assert!(registry.get(RequestType::CheckpostCreate).await.unwrap().is_auto_approved);
    }

    #[tokio::test]
    async fn unseeded_type_is_not_found() {
        let registry = PolicyRegistry::new(Arc::new(MemoryPolicyStore::new()));
        let err = registry.set_auto_approved(RequestType::CheckpostCreate, true).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }
}
