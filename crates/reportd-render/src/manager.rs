//! Per-tenant backend cache.
//!
//! At most one live backend per tenant. The cached instance is reused while
//! its name matches the configured variant; otherwise it is released and
//! replaced. Lookups for one tenant are serialised by that tenant's async
//! mutex, so two executions never race to build the same backend.

use std::collections::HashMap;
use std::sync::Arc;

use reportd_core::error::Result;
use reportd_core::{RendererSettings, TenantId};
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendKind};

type Slot = Arc<Mutex<Option<Arc<Backend>>>>;

pub struct BackendManager {
    platform_url: String,
    slots: std::sync::Mutex<HashMap<TenantId, Slot>>,
}

impl BackendManager {
    pub fn new(platform_url: impl Into<String>) -> Self {
        Self {
            platform_url: platform_url.into(),
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, tenant: TenantId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(tenant).or_default().clone()
    }

    /// Backend for `tenant` matching `settings.backend`, built on first use.
    pub async fn acquire(&self, tenant: TenantId, settings: &RendererSettings) -> Result<Arc<Backend>> {
        let kind: BackendKind = settings.backend.parse()?;
        let slot = self.slot(tenant);
        let mut current = slot.lock().await;

        if let Some(backend) = current.as_ref() {
            if backend.name() == kind.name() {
                return Ok(backend.clone());
            }
        }
        if let Some(old) = current.take() {
            tracing::info!(
                "♻️ Tenant {tenant}: replacing {} backend with {}",
                old.name(),
                kind.name()
            );
            old.release().await;
        } else {
            tracing::info!("🖥️ Tenant {tenant}: creating {} backend", kind.name());
        }

        let backend = Arc::new(Backend::new(kind, self.platform_url.clone()));
        *current = Some(backend.clone());
        Ok(backend)
    }

    /// Variant currently cached for `tenant`.
    pub async fn cached(&self, tenant: TenantId) -> Option<BackendKind> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(&tenant).cloned()
        }?;
        let current = slot.lock().await;
        current.as_ref().map(|b| b.kind())
    }

    /// Release and forget every cached backend.
    pub async fn release_all(&self) {
        let slots: Vec<(TenantId, Slot)> = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.drain().collect()
        };
        for (tenant, slot) in slots {
            if let Some(backend) = slot.lock().await.take() {
                tracing::debug!("Releasing {} backend of tenant {tenant}", backend.name());
                backend.release().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> RendererSettings {
        RendererSettings {
            backend: backend.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reuse_while_variant_unchanged() {
        let manager = BackendManager::new("http://localhost:3000");
        let a = manager.acquire(1, &settings("image-renderer")).await.unwrap();
        let b = manager.acquire(1, &settings("image-renderer")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.acquire(2, &settings("image-renderer")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_variant_change_replaces_backend() {
        let manager = BackendManager::new("http://localhost:3000");
        let first = manager.acquire(1, &settings("image-renderer")).await.unwrap();
        let second = manager.acquire(1, &settings("native")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.cached(1).await, Some(BackendKind::Document));
    }

    #[tokio::test]
    async fn test_unknown_variant_leaves_cache_alone() {
        let manager = BackendManager::new("http://localhost:3000");
        manager.acquire(1, &settings("native")).await.unwrap();
        assert!(manager.acquire(1, &settings("flash")).await.is_err());
        assert_eq!(manager.cached(1).await, Some(BackendKind::Document));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_builds_one() {
        let manager = Arc::new(BackendManager::new("http://localhost:3000"));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.acquire(7, &settings("image-renderer")).await.unwrap()
            }));
        }
        let mut backends = Vec::new();
        for h in handles {
            backends.push(h.await.unwrap());
        }
        assert!(backends.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_release_all_empties_cache() {
        let manager = BackendManager::new("http://localhost:3000");
        manager.acquire(1, &settings("chromium")).await.unwrap();
        manager.acquire(2, &settings("image-renderer")).await.unwrap();
        manager.release_all().await;
        assert_eq!(manager.cached(1).await, None);
        assert_eq!(manager.cached(2).await, None);
    }
}
