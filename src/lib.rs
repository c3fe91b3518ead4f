//! # reqwest-proxy-racer
//!
//! Race HTTP requests through a rotating pool of untrusted proxies.
//!
//! Every request is sent through several proxies at once. The first response
//! whose status matches the validity policy wins and the other attempts are
//! cancelled. Proxies that keep failing are reaped from the pool, which is
//! topped up again from a [`ProxySource`] when it runs low.
//!
//! The racer can be used directly or as a middleware for `reqwest-middleware`.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod middleware;
pub mod policy;
pub mod pool;
pub mod proxy;
pub mod racer;
pub mod source;

pub use config::{RaceOptions, RacerConfig, RacerConfigBuilder};
pub use error::{AddressError, EmptyPool, RaceError, TransportError};
pub use fetcher::{Fetcher, Outcome, ReqwestTransport, Transport};
pub use middleware::ProxyRacerMiddleware;
pub use policy::{StatusRule, ValidityPolicy};
pub use pool::{PoolStats, ProxyPool};
pub use proxy::{ProxyAddress, ProxyId, ProxyKind, ProxyRecord};
pub use racer::Racer;
pub use source::{ListSource, ProxySource, StaticSource};
