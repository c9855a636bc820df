//! Outbound HTTP client construction. "Proxy" here means the optional
//! network-level HTTP/SOCKS proxy, not an upstream completion provider.

use reqwest::{Client, Proxy};
use std::time::Duration;

use crate::config::DispatchConfig;

pub const USER_AGENT: &str = concat!("quizgate/", env!("CARGO_PKG_VERSION"));

/// Build the client used for upstream completion calls. Each request made
/// through it is bounded by `dispatch.timeout-secs`.
pub fn build_http_client(
    outbound_proxy: Option<&str>,
    dispatch: &DispatchConfig,
) -> Result<Client, anyhow::Error> {
    build_http_client_with_timeout(
        outbound_proxy,
        dispatch.connect_timeout_secs,
        dispatch.timeout_secs,
    )
}

/// Build an HTTP client with explicit timeout settings.
pub fn build_http_client_with_timeout(
    outbound_proxy: Option<&str>,
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
) -> Result<Client, anyhow::Error> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(request_timeout_secs));

    match outbound_proxy.filter(|url| !url.is_empty()) {
        // reqwest picks http/https/socks5 from the scheme
        Some(url) => builder = builder.proxy(Proxy::all(url)?),
        None => builder = builder.no_proxy(),
    }

    Ok(builder.build()?)
}

/// Validate that a proxy URL is well-formed.
pub fn validate_proxy_url(url: &str) -> Result<(), anyhow::Error> {
    if url.is_empty() {
        return Ok(());
    }
    let parsed =
        url::Url::parse(url).map_err(|e| anyhow::anyhow!("invalid proxy URL '{url}': {e}"))?;
    match parsed.scheme() {
        "http" | "https" | "socks5" => Ok(()),
        scheme => Err(anyhow::anyhow!(
            "unsupported proxy scheme '{scheme}' in URL '{url}', expected http/https/socks5"
        )),
    }
}
