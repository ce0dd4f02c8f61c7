// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static in-memory provider.
//!
//! Wraps a fixed outbound list so group outbounds can treat statically
//! configured members and subscription members uniformly.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapter::{Outbound, Provider};
use crate::Result;

pub struct MemoryProvider {
    tag: String,
    created: SystemTime,
    outbounds: Mutex<Vec<Arc<dyn Outbound>>>,
}

impl MemoryProvider {
    pub fn new(tag: impl Into<String>, outbounds: Vec<Arc<dyn Outbound>>) -> Self {
        MemoryProvider {
            tag: tag.into(),
            created: SystemTime::now(),
            outbounds: Mutex::new(outbounds),
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn kind(&self) -> &str {
        "memory"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn updated_at(&self) -> Option<SystemTime> {
        Some(self.created)
    }

    fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.outbounds.lock().clone()
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.outbounds.lock().iter().find(|o| o.tag() == tag).cloned()
    }

    async fn wait(&self) {}

    async fn update(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.outbounds.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::BlockOutbound;

    #[tokio::test]
    async fn test_memory_provider() {
        let provider = MemoryProvider::new(
            "static",
            vec![Arc::new(BlockOutbound::new("a")) as Arc<dyn Outbound>],
        );
        provider.wait().await;
        assert_eq!(provider.outbounds().len(), 1);
        assert!(provider.outbound("a").is_some());
        assert!(provider.outbound("b").is_none());
        provider.close().await.unwrap();
        assert!(provider.outbounds().is_empty());
    }
}
