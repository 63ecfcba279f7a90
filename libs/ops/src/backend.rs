use crate::error::{Error, Result};
use crate::operation::Operation;

use std::collections::HashMap;

use orbit_cluster::server::ProvisionedServer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteState {
    Active,
    Installing,
    Expanding,
    Updating,
    Failed,
}

/// Cluster record in the backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Site {
    pub domain: String,
    pub state: SiteState,
    pub servers: Vec<ProvisionedServer>,
}

impl Site {
    pub fn new(domain: &str) -> Self {
        Site {
            domain: domain.to_string(),
            state: SiteState::Active,
            servers: Vec::new(),
        }
    }
}

/// Cluster-state store the orchestrator records progress into.
#[allow(async_fn_in_trait)]
pub trait ClusterBackend {
    async fn get_site(&self, domain: &str) -> Result<Site>;
    async fn create_site(&self, site: Site) -> Result<()>;
    async fn update_site(&self, site: Site) -> Result<()>;
    async fn get_site_operation(&self, domain: &str, id: Uuid) -> Result<Operation>;
    async fn upsert_site_operation(&self, domain: &str, operation: Operation) -> Result<()>;
    /// Mint a single-use token a joining node authenticates with.
    async fn create_provisioning_token(&self, domain: &str, operation_id: Uuid)
        -> Result<String>;
}

/// In-memory backend used by tests and single-shot runs.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sites: HashMap<String, Site>,
    operations: HashMap<(String, Uuid), Operation>,
    tokens: HashMap<(String, Uuid), String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }
}

impl ClusterBackend for MemoryBackend {
    async fn get_site(&self, domain: &str) -> Result<Site> {
        self.inner
            .lock()
            .sites
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("site {domain}")))
    }

    async fn create_site(&self, site: Site) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.sites.contains_key(&site.domain) {
            return Err(Error::BadParameter(format!(
                "site {} already exists",
                site.domain
            )));
        }
        inner.sites.insert(site.domain.clone(), site);
        Ok(())
    }

    async fn update_site(&self, site: Site) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.sites.contains_key(&site.domain) {
            return Err(Error::NotFound(format!("site {}", site.domain)));
        }
        inner.sites.insert(site.domain.clone(), site);
        Ok(())
    }

    async fn get_site_operation(&self, domain: &str, id: Uuid) -> Result<Operation> {
        self.inner
            .lock()
            .operations
            .get(&(domain.to_string(), id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("operation {id} in {domain}")))
    }

    async fn upsert_site_operation(&self, domain: &str, operation: Operation) -> Result<()> {
        self.inner
            .lock()
            .operations
            .insert((domain.to_string(), operation.id), operation);
        Ok(())
    }

    async fn create_provisioning_token(
        &self,
        domain: &str,
        operation_id: Uuid,
    ) -> Result<String> {
        let mut inner = self.inner.lock();
        let token = inner
            .tokens
            .entry((domain.to_string(), operation_id))
            .or_insert_with(|| Uuid::new_v4().simple().to_string());
        Ok(token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_site_round_trip() {
        let backend = MemoryBackend::new();
        backend
            .create_site(Site::new("c.example.com"))
            .await
            .unwrap();
        let mut site = backend.get_site("c.example.com").await.unwrap();
        assert_eq!(site.state, SiteState::Active);

        site.state = SiteState::Installing;
        backend.update_site(site).await.unwrap();
        assert_eq!(
            backend.get_site("c.example.com").await.unwrap().state,
            SiteState::Installing
        );
    }

    #[tokio::test]
    async fn test_duplicate_site_rejected() {
        let backend = MemoryBackend::new();
        backend
            .create_site(Site::new("c.example.com"))
            .await
            .unwrap();
        assert!(backend
            .create_site(Site::new("c.example.com"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_missing_site_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .update_site(Site::new("c.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_operation_round_trip() {
        let backend = MemoryBackend::new();
        let operation = Operation::install(vec![], "agent");
        let id = operation.id;
        backend
            .upsert_site_operation("c.example.com", operation)
            .await
            .unwrap();
        let read = backend
            .get_site_operation("c.example.com", id)
            .await
            .unwrap();
        assert_eq!(read.id, id);
    }

    #[tokio::test]
    async fn test_provisioning_token_is_stable_per_operation() {
        let backend = MemoryBackend::new();
        let operation_id = Uuid::new_v4();
        let first = backend
            .create_provisioning_token("c.example.com", operation_id)
            .await
            .unwrap();
        let second = backend
            .create_provisioning_token("c.example.com", operation_id)
            .await
            .unwrap();
        assert_eq!(first, second);
        let other = backend
            .create_provisioning_token("c.example.com", Uuid::new_v4())
            .await
            .unwrap();
        assert_ne!(first, other);
    }
}
