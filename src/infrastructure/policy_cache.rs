use crate::domain::policy::{TenantCatalogue, TenantPolicy};
use crate::domain::ports::{PolicyCatalogue, PolicyCatalogueBox, TenantPolicyStore};
use crate::error::{Result, ScreeningError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Tenant policies indexed by tenant id, loaded from a [`PolicyCatalogue`].
///
/// Lookups never touch the catalogue. Changes to the catalogue become visible
/// after [`PolicyCache::refresh`]; [`PolicyCache::invalidate`] drops a single
/// tenant so it is reported as unknown until the next refresh.
#[derive(Clone)]
pub struct PolicyCache {
    catalogue: Arc<dyn PolicyCatalogue>,
    policies: Arc<RwLock<HashMap<String, TenantPolicy>>>,
}

impl PolicyCache {
    /// Reads the whole catalogue once and builds the index.
    pub async fn load(catalogue: PolicyCatalogueBox) -> Result<Self> {
        let cache = Self {
            catalogue: Arc::from(catalogue),
            policies: Arc::new(RwLock::new(HashMap::new())),
        };
        cache.refresh().await?;
        Ok(cache)
    }

    /// Rebuilds the index from the catalogue and returns the tenant count.
    /// On failure the previous index stays in place.
    pub async fn refresh(&self) -> Result<usize> {
        let loaded = self.catalogue.load_all().await?;
        let mut index = HashMap::with_capacity(loaded.len());
        for policy in loaded {
            if index.contains_key(&policy.tenant_id) {
                warn!(tenant_id = %policy.tenant_id, "duplicate tenant in policy catalogue, keeping the first entry");
                continue;
            }
            index.insert(policy.tenant_id.clone(), policy);
        }
        let count = index.len();
        *self.policies.write().await = index;
        info!(tenants = count, "policy cache loaded");
        Ok(count)
    }

    pub async fn invalidate(&self, tenant_id: &str) {
        if self.policies.write().await.remove(tenant_id).is_some() {
            debug!(tenant_id, "policy invalidated");
        }
    }
}

#[async_trait]
impl TenantPolicyStore for PolicyCache {
    async fn get_policy(&self, tenant_id: &str) -> Result<TenantPolicy> {
        self.policies
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| ScreeningError::NotFound(format!("no policy for tenant {}", tenant_id)))
    }
}

/// A policy catalogue stored as a JSON document of the form
/// `{"tenantsettings": [...]}`.
pub struct JsonPolicyCatalogue {
    path: PathBuf,
}

impl JsonPolicyCatalogue {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl PolicyCatalogue for JsonPolicyCatalogue {
    async fn load_all(&self) -> Result<Vec<TenantPolicy>> {
        let bytes = tokio::fs::read(&self.path).await?;
        let catalogue: TenantCatalogue = serde_json::from_slice(&bytes).map_err(|e| {
            ScreeningError::ValidationError(format!(
                "invalid policy catalogue {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(catalogue.tenant_settings)
    }
}
