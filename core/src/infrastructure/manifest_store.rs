// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Read access to survey manifests.
//!
//! Manifests live wherever the deployment keeps them; the core only needs
//! `fetch(guid)`. The default implementation reads them off the stream bus
//! under `<guid>/manifest.json`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::infrastructure::stream_bus::{BusError, StreamBus};

#[derive(Debug, Error)]
pub enum ManifestStoreError {
    #[error("no manifest for guid {0}")]
    NotFound(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn fetch(&self, guid: &str) -> Result<Vec<u8>, ManifestStoreError>;
}

pub struct BusManifestStore {
    bus: Arc<dyn StreamBus>,
}

impl BusManifestStore {
    pub fn new(bus: Arc<dyn StreamBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ManifestStore for BusManifestStore {
    async fn fetch(&self, guid: &str) -> Result<Vec<u8>, ManifestStoreError> {
        self.bus
            .get(&format!("{guid}/manifest.json"))
            .await?
            .ok_or_else(|| ManifestStoreError::NotFound(guid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::stream_bus::MemoryBus;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_known_guid() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_with_ttl("survey-1/manifest.json", b"{}", Duration::from_secs(60))
            .await
            .unwrap();

        let store = BusManifestStore::new(bus);
        assert_eq!(store.fetch("survey-1").await.unwrap(), b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_unknown_guid_is_not_found() {
        let store = BusManifestStore::new(Arc::new(MemoryBus::new()));
        assert!(matches!(
            store.fetch("missing").await,
            Err(ManifestStoreError::NotFound(guid)) if guid == "missing"
        ));
    }
}
