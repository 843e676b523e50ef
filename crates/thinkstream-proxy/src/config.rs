//! Proxy configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thinkstream_core::rewrite::{DEFAULT_THINKING_BUDGET, DEFAULT_THINKING_MARKER};
use thinkstream_core::{Error, DEFAULT_MAX_LINE_BYTES};
use tokio::net::TcpListener;
use url::Url;

use crate::cli::Cli;

/// Proxy configuration, immutable once the server starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to listen on
    pub listen: String,

    /// Upstream API base URL
    pub target_url: String,

    /// Token budget injected into rewritten requests
    pub thinking_budget: u32,

    /// Disclose suppressed thinking text on the console
    pub log_thinking: bool,

    /// Model identifier marker that enables thinking
    pub thinking_marker: String,

    /// Path whose POST requests are inspected for rewriting
    pub messages_path: String,

    /// Upper bound on one upstream exchange, including streaming
    pub upstream_timeout_secs: u64,

    /// How long in-flight requests may run after a shutdown signal
    pub shutdown_grace_secs: u64,

    /// Read size for unfiltered responses
    pub relay_chunk_size: usize,

    /// Longest accepted line in a filtered event stream
    pub max_line_bytes: usize,

    /// Largest accepted inbound request body
    pub max_request_bytes: usize,

    /// Address for the Prometheus exporter; disabled when unset
    pub metrics_listen: Option<String>,
}

impl ProxyConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        // Try to load from file, or use defaults
        let mut config = if Path::new(&cli.config).exists() {
            let content = std::fs::read_to_string(&cli.config)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(cli);
        Ok(config)
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.listen = listen.clone();
        }
        if let Some(target) = &cli.target {
            self.target_url = target.clone();
        }
        if let Some(budget) = cli.budget {
            self.thinking_budget = budget;
        }
        if let Some(log_thinking) = cli.log_thinking {
            self.log_thinking = log_thinking;
        }
        if let Some(marker) = &cli.marker {
            self.thinking_marker = marker.clone();
        }
        if let Some(timeout) = cli.timeout_secs {
            self.upstream_timeout_secs = timeout;
        }
        if let Some(metrics_listen) = &cli.metrics_listen {
            self.metrics_listen = Some(metrics_listen.clone());
        }
    }

    /// Reject configurations the proxy cannot run with
    pub fn validate(&self) -> thinkstream_core::Result<()> {
        let url = Url::parse(&self.target_url)
            .map_err(|e| Error::config(format!("invalid target URL '{}': {}", self.target_url, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::config(format!(
                "target URL scheme '{}' is not supported, use http or https",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::config("target URL must have a host"));
        }
        if self.thinking_budget == 0 {
            return Err(Error::config("thinking budget must be greater than zero"));
        }
        if self.thinking_marker.is_empty() {
            return Err(Error::config("thinking marker must not be empty"));
        }
        if !self.messages_path.starts_with('/') {
            return Err(Error::config("messages path must start with '/'"));
        }
        if self.relay_chunk_size == 0 || self.max_line_bytes == 0 {
            return Err(Error::config("relay chunk size and line limit must be non-zero"));
        }

        Ok(())
    }

    /// Target URL without a trailing slash, ready for path concatenation
    pub fn target_base(&self) -> &str {
        self.target_url.trim_end_matches('/')
    }

    /// Bind the proxy listener. Host names such as `localhost:8080` are
    /// resolved.
    pub async fn bind_listener(&self) -> anyhow::Result<TcpListener> {
        TcpListener::bind(self.listen.as_str())
            .await
            .with_context(|| format!("Failed to bind {}", self.listen))
    }

    /// Resolved address of the metrics exporter, if enabled
    pub fn metrics_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        let Some(listen) = &self.metrics_listen else {
            return Ok(None);
        };

        let addr = listen
            .to_socket_addrs()
            .with_context(|| format!("Invalid metrics address '{}'", listen))?
            .next()
            .with_context(|| format!("Metrics address '{}' did not resolve", listen))?;
        Ok(Some(addr))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            target_url: "https://api.anthropic.com".to_string(),
            thinking_budget: DEFAULT_THINKING_BUDGET,
            log_thinking: true,
            thinking_marker: DEFAULT_THINKING_MARKER.to_string(),
            messages_path: "/v1/messages".to_string(),
            upstream_timeout_secs: 300,
            shutdown_grace_secs: 10,
            relay_chunk_size: 4096,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_request_bytes: 32 * 1024 * 1024,
            metrics_listen: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["thinkstream-proxy"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let config = ProxyConfig::load(&cli(&["--config", "/nonexistent/thinkstream.yaml"])).unwrap();
        assert_eq!(config.target_url, "https://api.anthropic.com");
        assert_eq!(config.thinking_budget, 1024);
        assert!(config.log_thinking);
        assert_eq!(config.messages_path, "/v1/messages");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_then_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "target_url: http://localhost:9000/\nthinking_budget: 4000\nlog_thinking: false\nshutdown_grace_secs: 3"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = ProxyConfig::load(&cli(&["--config", path, "--budget", "2048"])).unwrap();
        assert_eq!(config.target_url, "http://localhost:9000/");
        assert_eq!(config.target_base(), "http://localhost:9000");
        assert_eq!(config.thinking_budget, 2048);
        assert!(!config.log_thinking);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(config.relay_chunk_size, 4096);

        let config = ProxyConfig::load(&cli(&["--config", path, "--log", "true"])).unwrap();
        assert!(config.log_thinking);
        assert_eq!(config.thinking_budget, 4000);
    }

    #[tokio::test]
    async fn test_listener_binds_host_name() {
        let config = ProxyConfig {
            listen: "localhost:0".to_string(),
            ..Default::default()
        };
        let listener = config.bind_listener().await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn test_metrics_addr_resolves_host_name() {
        assert!(ProxyConfig::default().metrics_addr().unwrap().is_none());

        let config = ProxyConfig {
            metrics_listen: Some("localhost:9090".to_string()),
            ..Default::default()
        };
        let addr = config.metrics_addr().unwrap().unwrap();
        assert_eq!(addr.port(), 9090);
        assert!(addr.ip().is_loopback());

        let config = ProxyConfig {
            metrics_listen: Some("no port here".to_string()),
            ..Default::default()
        };
        assert!(config.metrics_addr().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ProxyConfig {
                target_url: "not a url".to_string(),
                ..Default::default()
            },
            ProxyConfig {
                target_url: "ftp://example.com".to_string(),
                ..Default::default()
            },
            ProxyConfig {
                thinking_budget: 0,
                ..Default::default()
            },
            ProxyConfig {
                thinking_marker: String::new(),
                ..Default::default()
            },
            ProxyConfig {
                relay_chunk_size: 0,
                ..Default::default()
            },
        ];

        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }
    }
}
