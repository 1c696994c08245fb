//! Service registration.
//!
//! The orchestrator registers every server right before it starts and
//! unregisters it once `start` returns. Failures are logged, never fatal.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::BoxError;
use crate::server::ServiceInfo;

/// Service-discovery client.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register_service(&self, info: &ServiceInfo) -> Result<(), BoxError>;
    async fn unregister_service(&self, info: &ServiceInfo) -> Result<(), BoxError>;
}

#[async_trait]
impl<T: Registrar + ?Sized> Registrar for std::sync::Arc<T> {
    async fn register_service(&self, info: &ServiceInfo) -> Result<(), BoxError> {
        (**self).register_service(info).await
    }

    async fn unregister_service(&self, info: &ServiceInfo) -> Result<(), BoxError> {
        (**self).unregister_service(info).await
    }
}

/// Default registrar: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

#[async_trait]
impl Registrar for NoopRegistrar {
    async fn register_service(&self, _info: &ServiceInfo) -> Result<(), BoxError> {
        Ok(())
    }

    async fn unregister_service(&self, _info: &ServiceInfo) -> Result<(), BoxError> {
        Ok(())
    }
}

/// In-process registrar, handy for tests and single-host setups.
#[derive(Debug, Default)]
pub struct MemoryRegistrar {
    services: DashMap<String, ServiceInfo>,
}

impl MemoryRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently registered services, sorted by key.
    pub fn services(&self) -> Vec<ServiceInfo> {
        let mut entries: Vec<_> = self
            .services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, info)| info).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.iter().any(|entry| entry.value().name == name)
    }
}

#[async_trait]
impl Registrar for MemoryRegistrar {
    async fn register_service(&self, info: &ServiceInfo) -> Result<(), BoxError> {
        self.services.insert(info.registry_key(), info.clone());
        Ok(())
    }

    async fn unregister_service(&self, info: &ServiceInfo) -> Result<(), BoxError> {
        self.services.remove(&info.registry_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServiceKind;

    #[tokio::test]
    async fn memory_registrar_round_trip() {
        let registrar = MemoryRegistrar::new();
        let info = ServiceInfo::new("api", "http", "127.0.0.1:9090", ServiceKind::Http);

        registrar.register_service(&info).await.unwrap();
        assert!(registrar.contains("api"));
        assert_eq!(registrar.services(), vec![info.clone()]);

        registrar.unregister_service(&info).await.unwrap();
        assert!(registrar.services().is_empty());
    }
}
