//! Simple example of using reqwest-proxy-racer.

use reqwest_middleware::ClientBuilder;
use reqwest_proxy_racer::{ProxyRacerMiddleware, RacerConfig, StatusRule};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = RacerConfig::builder()
        // free http proxy lists, one `host:port` per line
        .sources(vec![
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/http/data.txt",
        ])
        .pool_size(6)
        .valid_codes([StatusRule::Range(200..=299)])
        .timeout(Duration::from_secs(60))
        .attempt_timeout(Duration::from_secs(10))
        .min_proxies(10)
        .max_proxies(30)
        .build();

    let racer = ProxyRacerMiddleware::new(config);

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(racer.clone())
        .build();

    println!("Sending request...");
    let response = client.get("http://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);
    println!("Pool: {:?}", racer.racer().stats());

    Ok(())
}
