//! A single request attempt through a single proxy.

use crate::error::TransportError;
use crate::proxy::ProxyAddress;

use async_trait::async_trait;
use futures::FutureExt;
use log::debug;
use reqwest::{Request, Response};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Issues a request bound to a given proxy.
///
/// Dropping the returned future must abort the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(&self, request: Request, proxy: &ProxyAddress) -> Result<Response, TransportError>;
}

/// Default transport: a reqwest client routed through the proxy.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn client_for(&self, proxy: &ProxyAddress) -> Result<reqwest::Client, TransportError> {
        let reqwest_proxy = proxy
            .to_reqwest_proxy()
            .map_err(|source| TransportError::InvalidProxy {
                proxy: proxy.to_string(),
                source,
            })?;

        let mut builder = reqwest::Client::builder().proxy(reqwest_proxy);
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn issue(&self, request: Request, proxy: &ProxyAddress) -> Result<Response, TransportError> {
        let client = self.client_for(proxy)?;
        Ok(client.execute(request).await?)
    }
}

/// How an attempt ended.
#[derive(Debug)]
pub enum Outcome {
    /// The transport returned a response; the racer judges its status.
    Completed(Response),
    /// The attempt ran out of time.
    TimedOut,
    /// The racer cancelled the attempt before it finished.
    Cancelled,
    /// Connection failure, unreachable proxy, malformed response, ...
    TransportError(TransportError),
}

/// Runs attempts on a shared transport.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    attempt_timeout: Duration,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            attempt_timeout,
        }
    }

    /// Issue one request through `proxy` and classify the result.
    pub async fn attempt(&self, proxy: &ProxyAddress, request: Request) -> Outcome {
        let call = AssertUnwindSafe(self.transport.issue(request, proxy)).catch_unwind();

        match tokio::time::timeout(self.attempt_timeout, call).await {
            Err(_) => Outcome::TimedOut,
            Ok(Err(panic)) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic in transport".to_string());
                debug!("Attempt through {} panicked: {}", proxy, detail);
                Outcome::TransportError(TransportError::Unexpected(detail))
            }
            Ok(Ok(Ok(response))) => Outcome::Completed(response),
            Ok(Ok(Err(TransportError::Request(e)))) if e.is_timeout() => Outcome::TimedOut,
            Ok(Ok(Err(e))) => Outcome::TransportError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        status: u16,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn issue(&self, _request: Request, _proxy: &ProxyAddress) -> Result<Response, TransportError> {
            tokio::time::sleep(self.delay).await;
            if self.status == 0 {
                panic!("transport blew up");
            }
            let response = http::Response::builder()
                .status(self.status)
                .body(String::new())
                .unwrap();
            Ok(Response::from(response))
        }
    }

    fn request() -> Request {
        reqwest::Client::new().get("http://example.com/").build().unwrap()
    }

    fn proxy() -> ProxyAddress {
        "127.0.0.1:3128".parse().unwrap()
    }

    fn fetcher(status: u16, delay: Duration) -> Fetcher {
        Fetcher::new(Arc::new(Scripted { status, delay }), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn completed_response_is_passed_through() {
        let outcome = fetcher(404, Duration::from_millis(10)).attempt(&proxy(), request()).await;
        match outcome {
            Outcome::Completed(response) => assert_eq!(response.status().as_u16(), 404),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let outcome = fetcher(200, Duration::from_secs(5)).attempt(&proxy(), request()).await;
        assert!(matches!(outcome, Outcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_is_classified_as_transport_error() {
        let outcome = fetcher(0, Duration::ZERO).attempt(&proxy(), request()).await;
        match outcome {
            Outcome::TransportError(TransportError::Unexpected(detail)) => {
                assert!(detail.contains("blew up"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn reqwest_transport_reports_unreachable_proxy() {
        let transport = ReqwestTransport::new().connect_timeout(Duration::from_secs(2));
        // nothing listens on the discard port
        let proxy: ProxyAddress = "127.0.0.1:9".parse().unwrap();
        let fetcher = Fetcher::new(Arc::new(transport), Duration::from_secs(5));
        let outcome = fetcher.attempt(&proxy, request()).await;
        assert!(matches!(
            outcome,
            Outcome::TransportError(TransportError::Request(_)) | Outcome::TimedOut
        ));
    }
}
