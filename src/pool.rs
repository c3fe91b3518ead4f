//! Core proxy pool implementation.

use crate::error::EmptyPool;
use crate::proxy::{ProxyAddress, ProxyId, ProxyRecord};

use log::{debug, info};

/// Snapshot of the pool's size and quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Proxies in the pool.
    pub total: usize,
    /// Proxies never used so far.
    pub untested: usize,
    /// Proxies with at least one valid response.
    pub proven: usize,
}

/// A rotating pool of proxies with their quality counters.
///
/// The pool does no locking of its own; the racer owns it behind a single
/// mutex so every mutation goes through one coordination point.
#[derive(Debug)]
pub struct ProxyPool {
    /// All proxies in the pool, in rotation order.
    proxies: Vec<ProxyRecord>,
    /// Index of the next proxy handed out.
    cursor: usize,
    next_id: u64,
    min_proxies: usize,
    max_proxies: usize,
    sample_threshold: u64,
    rate_threshold: f64,
}

impl ProxyPool {
    /// Create an empty pool.
    pub fn new(
        min_proxies: usize,
        max_proxies: usize,
        sample_threshold: u64,
        rate_threshold: f64,
    ) -> Self {
        Self {
            proxies: Vec::new(),
            cursor: 0,
            next_id: 0,
            min_proxies,
            max_proxies,
            sample_threshold,
            rate_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Hand out the proxy at the cursor and advance the cursor.
    pub fn select(&mut self) -> Result<ProxyRecord, EmptyPool> {
        let record = self.proxies.get(self.cursor).cloned().ok_or(EmptyPool)?;
        self.cursor = (self.cursor + 1) % self.proxies.len();
        Ok(record)
    }

    /// Count one attempt through the proxy, and one success if it was valid.
    pub fn record_outcome(&mut self, id: ProxyId, was_valid: bool) {
        match self.proxies.iter_mut().find(|p| p.id == id) {
            Some(record) => record.record(was_valid),
            None => debug!("Outcome for proxy {:?} dropped, it left the pool", id),
        }
    }

    /// Remove every sampled proxy whose failure rate is above the threshold.
    ///
    /// Returns the number of proxies removed.
    pub fn reap(&mut self) -> usize {
        let sample_threshold = self.sample_threshold;
        let rate_threshold = self.rate_threshold;
        let is_unreliable = |p: &ProxyRecord| {
            p.total_uses > sample_threshold && p.failure_rate() > rate_threshold
        };

        // Keep the cursor on the same upcoming proxy where possible.
        let removed_before_cursor = self.proxies[..self.cursor]
            .iter()
            .filter(|p| is_unreliable(p))
            .count();

        let before = self.proxies.len();
        for p in self.proxies.iter().filter(|p| is_unreliable(p)) {
            info!(
                "Reaping proxy {}: {} failures in {} uses",
                p.address,
                p.total_uses - p.successes,
                p.total_uses
            );
        }
        self.proxies.retain(|p| !is_unreliable(p));
        let removed = before - self.proxies.len();

        self.cursor -= removed_before_cursor;
        if self.cursor >= self.proxies.len() {
            self.cursor = 0;
        }

        removed
    }

    /// Number of proxies to fetch to get back to `max_proxies`, or 0 while
    /// the pool still holds at least `min_proxies`.
    pub fn needs_replenishment(&self) -> usize {
        if self.proxies.len() < self.min_proxies {
            self.max_proxies.saturating_sub(self.proxies.len())
        } else {
            0
        }
    }

    /// Append fresh records for the given addresses. Duplicates are kept.
    pub fn absorb(&mut self, addresses: impl IntoIterator<Item = ProxyAddress>) -> usize {
        let before = self.proxies.len();
        for address in addresses {
            let id = ProxyId(self.next_id);
            self.next_id += 1;
            self.proxies.push(ProxyRecord::new(id, address));
        }
        self.proxies.len() - before
    }

    /// Snapshot of every record, in rotation order.
    pub fn records(&self) -> Vec<ProxyRecord> {
        self.proxies.clone()
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.proxies.len(),
            untested: self.proxies.iter().filter(|p| p.total_uses == 0).count(),
            proven: self.proxies.iter().filter(|p| p.successes > 0).count(),
        }
    }
}
