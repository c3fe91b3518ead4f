//! Racing a request through several proxies at once.

use crate::config::{RaceOptions, RacerConfig};
use crate::error::RaceError;
use crate::fetcher::{Fetcher, Outcome, ReqwestTransport, Transport};
use crate::policy::ValidityPolicy;
use crate::pool::{PoolStats, ProxyPool};
use crate::proxy::{ProxyAddress, ProxyId, ProxyKind, ProxyRecord};
use crate::source::{ListSource, ProxySource};

use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use reqwest::{Method, Request, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use url::Url;

/// Sends a request through a pool of proxies concurrently and keeps the
/// first acceptable response.
pub struct Racer {
    config: RacerConfig,
    /// The only shared mutable state; never locked across an await.
    pool: Mutex<ProxyPool>,
    fetcher: Fetcher,
    source: Option<Arc<dyn ProxySource>>,
    /// Serializes replenishment between concurrent races.
    replenish_gate: tokio::sync::Mutex<()>,
}

impl Racer {
    /// Create a racer using reqwest as transport.
    ///
    /// Proxies are replenished from `config.sources` when any are configured.
    pub fn new(config: RacerConfig) -> Self {
        let mut transport = ReqwestTransport::new().connect_timeout(config.attempt_timeout);
        if let Some(user_agent) = &config.user_agent {
            transport = transport.user_agent(user_agent.clone());
        }

        let source = (!config.sources.is_empty()).then(|| {
            let default_kind = config.proxy_kinds.first().copied().unwrap_or(ProxyKind::Http);
            Arc::new(ListSource::new(config.sources.clone()).default_kind(default_kind))
                as Arc<dyn ProxySource>
        });

        let racer = Self::with_transport(config, Arc::new(transport));
        match source {
            Some(source) => racer.with_source(source),
            None => racer,
        }
    }

    /// Create a racer on top of a custom transport, without a proxy source.
    pub fn with_transport(config: RacerConfig, transport: Arc<dyn Transport>) -> Self {
        let mut pool = ProxyPool::new(
            config.min_proxies,
            config.max_proxies,
            config.proxy_sample_threshold,
            config.proxy_rate_threshold,
        );

        let seeds = config.proxies.iter().filter_map(|s| match s.parse::<ProxyAddress>() {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Ignoring seed proxy {:?}: {}", s, e);
                None
            }
        });
        let seeded = pool.absorb(seeds);
        info!("Proxy pool seeded with {} proxies", seeded);

        Self {
            fetcher: Fetcher::new(transport, config.attempt_timeout),
            pool: Mutex::new(pool),
            source: None,
            replenish_gate: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Replenish the pool from `source` whenever it runs low.
    pub fn with_source(mut self, source: Arc<dyn ProxySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn config(&self) -> &RacerConfig {
        &self.config
    }

    /// Race `request` with the configured policy, pool size and timeout.
    pub async fn race(&self, request: Request) -> Result<Response, RaceError> {
        let options = self.config.race_options();
        self.race_with(request, &options).await
    }

    /// Race a GET of `url`.
    pub async fn get(&self, url: Url) -> Result<Response, RaceError> {
        self.race(Request::new(Method::GET, url)).await
    }

    /// Race `request` with explicit options.
    pub async fn race_with(&self, request: Request, options: &RaceOptions) -> Result<Response, RaceError> {
        if request.try_clone().is_none() {
            return Err(RaceError::UncloneableRequest);
        }

        let deadline = Instant::now() + options.timeout;
        let mut session = RaceSession::new(self, request, options, deadline);

        session.transition(SessionState::Priming);
        self.prime().await?;
        session.run().await
    }

    /// Reap unreliable proxies and top the pool up from the source.
    async fn prime(&self) -> Result<(), RaceError> {
        let _gate = self.replenish_gate.lock().await;

        let needed = {
            let mut pool = self.pool.lock();
            pool.reap();
            pool.needs_replenishment()
        };

        if needed > 0 {
            match &self.source {
                Some(source) => {
                    info!("Attempting to acquire {} proxies", needed);
                    let fresh = self.acquire(source.as_ref(), needed).await;
                    let added = self.pool.lock().absorb(fresh);
                    info!("Acquired {}/{} proxies", added, needed);
                }
                None => debug!("Pool is {} proxies short and has no source", needed),
            }
        }

        if self.pool.lock().is_empty() {
            return Err(RaceError::EmptyPool);
        }
        Ok(())
    }

    /// Collect up to `count` addresses, keeping whatever arrived before the
    /// replenish timeout.
    async fn acquire(&self, source: &dyn ProxySource, count: usize) -> Vec<ProxyAddress> {
        let mut fresh = Vec::with_capacity(count);
        let mut stream = source.acquire(count, &self.config.proxy_kinds).take(count);

        let collect = async {
            while let Some(address) = stream.next().await {
                debug!("Acquired proxy {}", address);
                fresh.push(address);
            }
        };
        let timed_out = tokio::time::timeout(self.config.replenish_timeout, collect)
            .await
            .is_err();

        if timed_out {
            warn!(
                "Proxy source timed out after {:?} with {}/{} proxies",
                self.config.replenish_timeout,
                fresh.len(),
                count
            );
        }
        fresh
    }

    /// Add proxies to the pool by hand.
    pub fn add_proxies(&self, addresses: impl IntoIterator<Item = ProxyAddress>) -> usize {
        self.pool.lock().absorb(addresses)
    }

    /// Snapshot of every proxy and its counters.
    pub fn proxies(&self) -> Vec<ProxyRecord> {
        self.pool.lock().records()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.lock().stats()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Priming,
    Racing,
    Arbitrating,
    Done,
    TimedOut,
}

struct InFlight {
    proxy: ProxyId,
    address: ProxyAddress,
    abort: AbortHandle,
}

struct Completion {
    attempt: u64,
    outcome: Outcome,
}

/// State of one race. Completions arrive on `inbox` and are handled one at
/// a time, so pool bookkeeping never runs concurrently.
struct RaceSession<'a> {
    pool: &'a Mutex<ProxyPool>,
    fetcher: Fetcher,
    request: Request,
    policy: &'a ValidityPolicy,
    pool_size: usize,
    deadline: Instant,
    state: SessionState,
    outstanding: HashMap<u64, InFlight>,
    spawned: u64,
    outbox: UnboundedSender<Completion>,
    inbox: UnboundedReceiver<Completion>,
}

impl<'a> RaceSession<'a> {
    fn new(racer: &'a Racer, request: Request, options: &'a RaceOptions, deadline: Instant) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            pool: &racer.pool,
            fetcher: racer.fetcher.clone(),
            request,
            policy: &options.policy,
            pool_size: options.pool_size.max(1),
            deadline,
            state: SessionState::Idle,
            outstanding: HashMap::new(),
            spawned: 0,
            outbox,
            inbox,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Race {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn run(mut self) -> Result<Response, RaceError> {
        self.transition(SessionState::Racing);
        for _ in 0..self.pool_size {
            if !self.spawn()? {
                break;
            }
        }

        let mut pool_exhausted = false;
        while !self.outstanding.is_empty() {
            let Some(completion) = self.inbox.recv().await else {
                break;
            };
            let Some(attempt) = self.outstanding.remove(&completion.attempt) else {
                continue;
            };

            match completion.outcome {
                Outcome::Cancelled => continue,
                Outcome::Completed(response) => {
                    let status = response.status().as_u16();
                    if self.policy.accepts(status) {
                        self.pool.lock().record_outcome(attempt.proxy, true);
                        return Ok(self.arbitrate(response, &attempt.address).await);
                    }
                    debug!("Proxy {} answered with rejected status {}", attempt.address, status);
                }
                Outcome::TimedOut => debug!("Proxy {} timed out", attempt.address),
                Outcome::TransportError(e) => debug!("Proxy {} failed: {}", attempt.address, e),
            }

            self.pool.lock().record_outcome(attempt.proxy, false);
            match self.spawn() {
                // the pool may have been refilled by a concurrent race
                Ok(_) => pool_exhausted = false,
                Err(RaceError::EmptyPool) => {
                    warn!("No proxy left to replace the failed attempt");
                    pool_exhausted = true;
                }
                Err(e) => return Err(e),
            }
        }

        self.transition(SessionState::TimedOut);
        if pool_exhausted {
            return Err(RaceError::EmptyPool);
        }
        info!("Race timed out after {} attempts", self.spawned);
        Err(RaceError::Timeout {
            attempts: self.spawned as usize,
        })
    }

    /// Start one attempt on the next proxy. Returns `false` once the deadline
    /// has passed.
    fn spawn(&mut self) -> Result<bool, RaceError> {
        if Instant::now() > self.deadline {
            debug!("Deadline passed, not spawning");
            return Ok(false);
        }

        let proxy = self.pool.lock().select()?;
        let request = self.request.try_clone().ok_or(RaceError::UncloneableRequest)?;
        let (abort, registration) = AbortHandle::new_pair();

        let attempt = self.spawned;
        self.spawned += 1;

        let fetcher = self.fetcher.clone();
        let outbox = self.outbox.clone();
        let address = proxy.address.clone();
        debug!("Spawning attempt {} through {}", attempt, address);
        tokio::spawn(async move {
            let outcome = match Abortable::new(fetcher.attempt(&address, request), registration).await {
                Ok(outcome) => outcome,
                Err(_aborted) => Outcome::Cancelled,
            };
            // The session is gone only if the race itself was dropped.
            let _ = outbox.send(Completion { attempt, outcome });
        });

        self.outstanding.insert(
            attempt,
            InFlight {
                proxy: proxy.id,
                address: proxy.address,
                abort,
            },
        );
        Ok(true)
    }

    /// Cancel every other attempt and wait until all of them reported back.
    async fn arbitrate(&mut self, response: Response, winner: &ProxyAddress) -> Response {
        self.transition(SessionState::Arbitrating);
        for attempt in self.outstanding.values() {
            attempt.abort.abort();
        }

        // Late results, valid or not, are discarded without bookkeeping.
        while !self.outstanding.is_empty() {
            match self.inbox.recv().await {
                Some(completion) => {
                    self.outstanding.remove(&completion.attempt);
                }
                None => break,
            }
        }

        self.transition(SessionState::Done);
        info!("Race won by {} after {} attempts", winner, self.spawned);
        response
    }
}

impl Drop for RaceSession<'_> {
    fn drop(&mut self) {
        for attempt in self.outstanding.values() {
            attempt.abort.abort();
        }
    }
}
