//! Sources of fresh proxies used to replenish the pool.

use crate::proxy::{ProxyAddress, ProxyKind};

use futures::stream::{self, BoxStream, StreamExt};
use log::{info, warn};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::{HashSet, VecDeque};

/// Something that can discover candidate proxies.
///
/// The returned stream yields at most `count` addresses whose kind is one of
/// `kinds`; its end means the source has nothing more to offer right now.
pub trait ProxySource: Send + Sync {
    fn acquire<'a>(&'a self, count: usize, kinds: &'a [ProxyKind]) -> BoxStream<'a, ProxyAddress>;
}

/// Hands out proxies from a fixed list, each one at most once.
#[derive(Debug, Default)]
pub struct StaticSource {
    remaining: Mutex<VecDeque<ProxyAddress>>,
}

impl StaticSource {
    pub fn new(addresses: impl IntoIterator<Item = ProxyAddress>) -> Self {
        Self {
            remaining: Mutex::new(addresses.into_iter().collect()),
        }
    }

    /// Number of addresses not handed out yet.
    pub fn remaining(&self) -> usize {
        self.remaining.lock().len()
    }
}

impl ProxySource for StaticSource {
    fn acquire<'a>(&'a self, count: usize, kinds: &'a [ProxyKind]) -> BoxStream<'a, ProxyAddress> {
        let mut remaining = self.remaining.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(remaining.len());
        while let Some(address) = remaining.pop_front() {
            if taken.len() < count && kinds.contains(&address.kind()) {
                taken.push(address);
            } else {
                kept.push_back(address);
            }
        }
        *remaining = kept;
        stream::iter(taken).boxed()
    }
}

/// Fetches proxy lists from URLs or files, one proxy per line.
///
/// Every address is handed out at most once, so proxies reaped from the
/// pool are not offered again when the lists are fetched anew.
pub struct ListSource {
    sources: Vec<String>,
    client: Client,
    default_kind: ProxyKind,
    handed_out: Mutex<HashSet<ProxyAddress>>,
}

impl ListSource {
    /// Bare `host:port` lines are taken to be HTTP proxies.
    pub fn new(sources: Vec<impl Into<String>>) -> Self {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            client: Client::new(),
            default_kind: ProxyKind::Http,
            handed_out: Mutex::new(HashSet::new()),
        }
    }

    /// Set the kind assumed for lines without a scheme.
    pub fn default_kind(mut self, kind: ProxyKind) -> Self {
        self.default_kind = kind;
        self
    }

    /// Fetch every list and return the unique addresses in first-seen order.
    async fn fetch_all(&self) -> Vec<ProxyAddress> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();

        for source in &self.sources {
            match self.fetch_source(source).await {
                Ok(content) => {
                    let parsed = parse_proxy_list(&content, self.default_kind);
                    info!("Fetched {} proxies from {}", parsed.len(), source);
                    for address in parsed {
                        if seen.insert(address.clone()) {
                            all.push(address);
                        }
                    }
                }
                Err(e) => warn!("Failed to fetch proxies from {}: {}", source, e),
            }
        }

        all
    }

    /// Number of addresses handed out so far.
    pub fn handed_out(&self) -> usize {
        self.handed_out.lock().len()
    }

    async fn fetch_source(&self, source: &str) -> anyhow::Result<String> {
        if source.starts_with("http") {
            let response = self.client.get(source).send().await?.error_for_status()?;
            Ok(response.text().await?)
        } else {
            Ok(tokio::fs::read_to_string(source).await?)
        }
    }
}

impl ProxySource for ListSource {
    fn acquire<'a>(&'a self, count: usize, kinds: &'a [ProxyKind]) -> BoxStream<'a, ProxyAddress> {
        stream::once(self.fetch_all())
            .flat_map(stream::iter)
            .filter(move |address| {
                let fresh = kinds.contains(&address.kind())
                    && !self.handed_out.lock().contains(address);
                futures::future::ready(fresh)
            })
            .take(count)
            .inspect(move |address| {
                self.handed_out.lock().insert(address.clone());
            })
            .boxed()
    }
}

/// Parse a proxy list, skipping blanks, `#` comments and malformed lines.
pub(crate) fn parse_proxy_list(content: &str, default_kind: ProxyKind) -> Vec<ProxyAddress> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match ProxyAddress::parse_with_default(line, default_kind) {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Skipping proxy list entry {:?}: {}", line, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn addr(s: &str) -> ProxyAddress {
        s.parse().unwrap()
    }

    #[test]
    fn parse_proxy_list_handles_mixed_lines() {
        let content = "\
# free proxies
1.1.1.1:8080
socks5://2.2.2.2:1080

  3.3.3.3:3128
not a proxy
";
        let parsed = parse_proxy_list(content, ProxyKind::Http);
        assert_eq!(
            parsed,
            vec![
                addr("http://1.1.1.1:8080"),
                addr("socks5://2.2.2.2:1080"),
                addr("http://3.3.3.3:3128"),
            ]
        );
    }

    #[test]
    fn static_source_hands_out_each_address_once() {
        let source = StaticSource::new(vec![
            addr("1.1.1.1:80"),
            addr("socks5://2.2.2.2:1080"),
            addr("3.3.3.3:80"),
            addr("4.4.4.4:80"),
        ]);
        let kinds = [ProxyKind::Http];

        let first: Vec<_> = tokio_test::block_on(source.acquire(2, &kinds).collect());
        assert_eq!(first, vec![addr("1.1.1.1:80"), addr("3.3.3.3:80")]);

        let second: Vec<_> = tokio_test::block_on(source.acquire(5, &kinds).collect());
        assert_eq!(second, vec![addr("4.4.4.4:80")]);

        let third: Vec<_> = tokio_test::block_on(source.acquire(5, &kinds).collect());
        assert!(third.is_empty());
        assert_eq!(source.remaining(), 1);
    }

    #[tokio::test]
    async fn list_source_reads_files_dedupes_and_filters() {
        let dir = std::env::temp_dir();
        let first = dir.join(format!("proxy-racer-list-a-{}.txt", std::process::id()));
        let second = dir.join(format!("proxy-racer-list-b-{}.txt", std::process::id()));
        writeln!(
            std::fs::File::create(&first).unwrap(),
            "1.1.1.1:8080\nsocks5://2.2.2.2:1080\n5.5.5.5:8080"
        )
        .unwrap();
        writeln!(std::fs::File::create(&second).unwrap(), "1.1.1.1:8080\n6.6.6.6:8080").unwrap();

        let source = ListSource::new(vec![
            first.to_string_lossy().into_owned(),
            "/nonexistent/proxy-list.txt".to_string(),
            second.to_string_lossy().into_owned(),
        ]);
        let kinds = [ProxyKind::Http];
        let got: Vec<_> = source.acquire(10, &kinds).collect().await;
        assert_eq!(
            got,
            vec![addr("1.1.1.1:8080"), addr("5.5.5.5:8080"), addr("6.6.6.6:8080")]
        );

        // everything was handed out already
        let again: Vec<_> = source.acquire(10, &kinds).collect().await;
        assert!(again.is_empty());
        assert_eq!(source.handed_out(), 3);

        std::fs::remove_file(first).ok();
        std::fs::remove_file(second).ok();
    }

    #[tokio::test]
    async fn list_source_moves_down_the_list_on_each_call() {
        let path = std::env::temp_dir().join(format!("proxy-racer-list-c-{}.txt", std::process::id()));
        writeln!(
            std::fs::File::create(&path).unwrap(),
            "1.1.1.1:8080\n2.2.2.2:8080\n3.3.3.3:8080"
        )
        .unwrap();

        let source = ListSource::new(vec![path.to_string_lossy().into_owned()]);
        let kinds = [ProxyKind::Http];

        let first: Vec<_> = source.acquire(1, &kinds).collect().await;
        let second: Vec<_> = source.acquire(1, &kinds).collect().await;
        assert_eq!(first, vec![addr("1.1.1.1:8080")]);
        assert_eq!(second, vec![addr("2.2.2.2:8080")]);

        let rest: Vec<_> = source.acquire(5, &kinds).collect().await;
        assert_eq!(rest, vec![addr("3.3.3.3:8080")]);

        std::fs::remove_file(path).ok();
    }
}
