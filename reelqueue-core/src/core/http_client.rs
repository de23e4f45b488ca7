use std::time::Duration;

use crate::core::error::FetchError;
use crate::models::settings::ProxySettings;

pub fn proxy_url(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    let scheme = match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    };
    if !proxy.username.is_empty() {
        Some(format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        ))
    } else {
        Some(format!("{}://{}:{}", scheme, proxy.host, proxy.port))
    }
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url(proxy) else {
        return builder;
    };
    match reqwest::Proxy::all(&url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("Invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Client shared by the adapters of one orchestrator. `timeout` bounds the
/// whole request; leave it unset for long streaming transfers.
pub fn build_client(
    user_agent: &str,
    proxy: &ProxySettings,
    timeout: Option<Duration>,
) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(15));
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    apply_proxy(builder, proxy)
        .build()
        .map_err(|e| FetchError::Unavailable(format!("http client setup failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_from_defaults() {
        let proxy = ProxySettings::default();
        assert!(build_client("reelqueue-test", &proxy, Some(Duration::from_secs(5))).is_ok());
    }

    #[test]
    fn invalid_user_agent_is_reported() {
        let err = build_client("bad\nagent", &ProxySettings::default(), None).unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }

    #[test]
    fn disabled_proxy_has_no_url() {
        let proxy = ProxySettings {
            host: "127.0.0.1".into(),
            ..Default::default()
        };
        assert_eq!(proxy_url(&proxy), None);
    }

    #[test]
    fn socks_proxy_with_credentials() {
        let proxy = ProxySettings {
            enabled: true,
            proxy_type: "socks5".into(),
            host: "10.0.0.2".into(),
            port: 1080,
            username: "u".into(),
            password: "p".into(),
        };
        assert_eq!(proxy_url(&proxy).as_deref(), Some("socks5://u:p@10.0.0.2:1080"));
    }

    #[test]
    fn unknown_type_falls_back_to_http() {
        let proxy = ProxySettings {
            enabled: true,
            proxy_type: "ftp".into(),
            host: "proxy.local".into(),
            port: 3128,
            ..Default::default()
        };
        assert_eq!(proxy_url(&proxy).as_deref(), Some("http://proxy.local:3128"));
    }
}
