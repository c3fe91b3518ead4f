//! Middleware implementation for reqwest.

use crate::config::RacerConfig;
use crate::racer::Racer;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that races every request through a pool of proxies.
///
/// The wrapped client is not used: each attempt goes out through the
/// racer's own transport, bound to one proxy.
#[derive(Clone)]
pub struct ProxyRacerMiddleware {
    racer: Arc<Racer>,
}

impl ProxyRacerMiddleware {
    /// Create a new middleware with the given configuration.
    pub fn new(config: RacerConfig) -> Self {
        Self::from_racer(Arc::new(Racer::new(config)))
    }

    /// Share an existing racer, e.g. one built with a custom transport.
    pub fn from_racer(racer: Arc<Racer>) -> Self {
        let stats = racer.stats();
        info!("Proxy racer middleware ready with {} proxies", stats.total);
        if stats.total == 0 && racer.config().sources.is_empty() {
            warn!("Proxy pool is empty and no source is configured");
        }
        Self { racer }
    }

    pub fn racer(&self) -> &Arc<Racer> {
        &self.racer
    }
}

#[async_trait]
impl Middleware for ProxyRacerMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let url = req.url().clone();
        self.racer.race(req).await.map_err(|e| {
            warn!("Race for {} failed: {}", url, e);
            Error::Middleware(anyhow!(e))
        })
    }
}
