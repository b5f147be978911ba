use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::types::{ParameterSource, ParameterValue};

/// Application configuration and constants
#[derive(Debug, Clone)]
pub struct Config {
    /// Content directories, highest priority first. The first one is the
    /// only layer that is ever written to.
    pub layers: Vec<PathBuf>,
    pub port: u16,
    pub host: String,
    /// Template rendered for `read` requests carrying an `edit` parameter
    pub edit_template: String,
    /// Template that wraps rendered Markdown pages, if any
    pub markdown_container: Option<String>,
    pub site_name: String,
    pub max_render_depth: usize,
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            layers: vec![PathBuf::from("wiki")],
            port: 5004,
            host: "0.0.0.0".to_string(),
            edit_template: "/edit.html".to_string(),
            markdown_container: None,
            site_name: "Wiki".to_string(),
            max_render_depth: 16,
        }
    }

    /// Create configuration with custom values
    pub fn with_custom(
        layers: Vec<PathBuf>,
        port: Option<u16>,
        host: Option<String>,
    ) -> Self {
        Self {
            layers,
            port: port.unwrap_or(5004),
            host: host.unwrap_or_else(|| "0.0.0.0".to_string()),
            ..Self::new()
        }
    }

    /// Read overrides from `LAYERWIKI_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(raw) = std::env::var_os("LAYERWIKI_LAYERS") {
            let layers: Vec<PathBuf> = std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !layers.is_empty() {
                config.layers = layers;
            }
        }
        if let Ok(host) = std::env::var("LAYERWIKI_HOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("LAYERWIKI_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(template) = std::env::var("LAYERWIKI_EDIT_TEMPLATE") {
            config.edit_template = template;
        }
        if let Ok(container) = std::env::var("LAYERWIKI_CONTAINER") {
            config.markdown_container = Some(container).filter(|c| !c.is_empty());
        }
        if let Ok(name) = std::env::var("LAYERWIKI_SITE_NAME") {
            config.site_name = name;
        }
        config
    }

    /// Get the socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        let ip = self
            .host
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// Values every request sees under `params.server`
    pub fn server_parameters(&self) -> ParameterValue {
        let mut node = ParameterValue::node(ParameterSource::ServerConfigured);
        node.set(
            "name",
            ParameterValue::leaf(self.site_name.clone(), ParameterSource::ServerConfigured),
        );
        node
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
