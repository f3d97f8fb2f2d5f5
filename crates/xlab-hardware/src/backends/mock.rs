//! Backend serving scripted [`MockInterface`]s.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use xlab_core::mock::MockInterface;
use xlab_core::{Interface, Result, XlabError};

use super::Backend;

/// Serves mock interfaces registered with [`MockBackend::add`].
///
/// Opening a resource returns a clone of the registered mock, so tests keep
/// a handle to inspect what the driver wrote.
#[derive(Debug, Default)]
pub struct MockBackend {
    interfaces: DashMap<String, MockInterface>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mock under its resource name. Build it with backend
    /// `"mock"` so its interface id matches the registry's.
    pub fn add(&self, mock: MockInterface) {
        self.interfaces.insert(mock.resource().to_string(), mock);
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(self, mock: MockInterface) -> Self {
        self.add(mock);
        self
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut resources: Vec<String> = self
            .interfaces
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        resources.sort();
        Ok(resources)
    }

    async fn open(&self, resource: &str) -> Result<Arc<dyn Interface>> {
        self.interfaces
            .get(resource)
            .map(|entry| Arc::new(entry.value().clone()) as Arc<dyn Interface>)
            .ok_or_else(|| XlabError::NotAvailable(format!("no mock resource '{}'", resource)))
    }
}
