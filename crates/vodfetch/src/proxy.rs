use reqwest::Proxy;

use crate::DownloadError;

/// Proxy configuration types
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    /// HTTP proxy
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

/// Proxy authentication
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>, proxy_type: ProxyType) -> Self {
        Self {
            url: url.into(),
            proxy_type,
            auth: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// The URL handed to reqwest; SOCKS5 proxies get their scheme added when missing.
    fn effective_url(&self) -> String {
        match self.proxy_type {
            ProxyType::Socks5
                if !self.url.starts_with("socks5://") && !self.url.starts_with("socks5h://") =>
            {
                format!("socks5://{}", self.url)
            }
            _ => self.url.clone(),
        }
    }
}

/// Build a reqwest Proxy from the configuration
pub fn build_proxy(config: &ProxyConfig) -> Result<Proxy, DownloadError> {
    let url = config.effective_url();
    let proxy = match config.proxy_type {
        ProxyType::Http => Proxy::http(&url),
        ProxyType::Https => Proxy::https(&url),
        ProxyType::Socks5 => Proxy::all(&url),
    }
    .map_err(|e| DownloadError::proxy_configuration(format!("invalid proxy URL {url}: {e}")))?;

    Ok(match &config.auth {
        Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
        None => proxy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks5_urls_get_a_scheme() {
        let config = ProxyConfig::new("127.0.0.1:1080", ProxyType::Socks5);
        assert_eq!(config.effective_url(), "socks5://127.0.0.1:1080");

        let config = ProxyConfig::new("socks5h://127.0.0.1:1080", ProxyType::Socks5);
        assert_eq!(config.effective_url(), "socks5h://127.0.0.1:1080");
    }

    #[test]
    fn http_proxy_builds() {
        let config =
            ProxyConfig::new("http://proxy.local:8080", ProxyType::Http).with_auth("u", "p");
        assert!(build_proxy(&config).is_ok());
    }
}
