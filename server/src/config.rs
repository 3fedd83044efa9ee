use std::env;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context as _, Result};
use cryptdav_cipher::Algorithm;
use serde::{Deserialize, Serialize};

/// Proxy configuration. Sources are layered: defaults, then the YAML
/// config file, then environment variables, then command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address; a bare `:port` or `port` binds all interfaces.
    pub listen_addr: String,
    /// Upstream WebDAV server URL.
    pub backend_url: String,
    /// Encryption passphrase.
    pub password: String,
    pub algorithm: Algorithm,
    /// Body chunk size in bytes for the encrypting producer.
    pub chunk_size: usize,
    pub debug: bool,
    pub log_level: String,
    pub backend_user: String,
    pub backend_pass: String,
    pub enable_auth: bool,
    pub auth_user: String,
    pub auth_pass: String,
    /// Per-request deadline in seconds.
    pub timeout_secs: u64,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: ":8080".into(),
            backend_url: String::new(),
            password: String::new(),
            algorithm: Algorithm::AesCtr,
            chunk_size: 8192,
            debug: false,
            log_level: "info".into(),
            backend_user: String::new(),
            backend_pass: String::new(),
            enable_auth: false,
            auth_user: String::new(),
            auth_pass: String::new(),
            timeout_secs: 300,
            max_idle_conns_per_host: 10,
            idle_conn_timeout_secs: 90,
        }
    }
}

impl Config {
    /// Loads defaults, the optional YAML file, and environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => {
                let raw = fs_read(path)?;
                serde_yml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_var("LISTEN_ADDR") {
            self.listen_addr = value;
        }
        if let Some(value) = env_var("BACKEND_URL") {
            self.backend_url = value;
        }
        if let Some(value) = env_var("PASSWORD") {
            self.password = value;
        }
        if let Some(value) = env_var("ALGORITHM") {
            self.algorithm = value.parse()?;
        }
        if let Some(value) = env_var("CHUNK_SIZE") {
            self.chunk_size = value.parse().context("invalid CHUNK_SIZE")?;
        }
        if let Some(value) = env_var("DEBUG") {
            self.debug = parse_bool(&value);
        }
        if let Some(value) = env_var("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = env_var("BACKEND_USER") {
            self.backend_user = value;
        }
        if let Some(value) = env_var("BACKEND_PASS") {
            self.backend_pass = value;
        }
        if let Some(value) = env_var("ENABLE_AUTH") {
            self.enable_auth = parse_bool(&value);
        }
        if let Some(value) = env_var("AUTH_USER") {
            self.auth_user = value;
        }
        if let Some(value) = env_var("AUTH_PASS") {
            self.auth_pass = value;
        }
        if let Some(value) = env_var("TIMEOUT_SECS") {
            self.timeout_secs = value.parse().context("invalid TIMEOUT_SECS")?;
        }
        if let Some(value) = env_var("MAX_IDLE_CONNS_PER_HOST") {
            self.max_idle_conns_per_host =
                value.parse().context("invalid MAX_IDLE_CONNS_PER_HOST")?;
        }
        if let Some(value) = env_var("IDLE_CONN_TIMEOUT_SECS") {
            self.idle_conn_timeout_secs =
                value.parse().context("invalid IDLE_CONN_TIMEOUT_SECS")?;
        }
        Ok(())
    }

    /// Front-side auth resolution: explicit credentials win; otherwise the
    /// backend credentials are mirrored; otherwise auth is disabled.
    pub fn resolve_auth(&mut self) {
        if !self.auth_user.is_empty() && !self.auth_pass.is_empty() {
            self.enable_auth = true;
        } else if !self.backend_user.is_empty() && !self.backend_pass.is_empty() {
            self.enable_auth = true;
            self.auth_user = self.backend_user.clone();
            self.auth_pass = self.backend_pass.clone();
        } else {
            self.enable_auth = false;
            self.auth_user.clear();
            self.auth_pass.clear();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_url.is_empty() {
            bail!("backend URL is required");
        }
        if self.password.is_empty() {
            bail!("encryption password is required");
        }
        if self.chunk_size == 0 {
            bail!("chunk size must be positive");
        }
        if self.enable_auth && (self.auth_user.is_empty() || self.auth_pass.is_empty()) {
            bail!("auth user and password are required when auth is enabled");
        }
        Ok(())
    }

    /// The socket address to bind, normalizing Go-style `:8080` and bare
    /// `8080` forms.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        let addr = self.listen_addr.trim();
        let addr = if let Some(port) = addr.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else if !addr.contains(':') {
            format!("0.0.0.0:{addr}")
        } else {
            addr.to_string()
        };
        addr.parse()
            .with_context(|| format!("invalid listen address {:?}", self.listen_addr))
    }

    /// Default tracing directive; `debug: true` wins over `log_level`.
    pub fn log_directive(&self) -> String {
        if self.debug {
            "debug".into()
        } else {
            self.log_level.clone()
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes" | "on")
}

fn fs_read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cryptdav proxy configuration

## Upstream
# Upstream WebDAV server URL (required).
backend_url: "https://example.com/webdav/"
# Upstream credentials (optional, injected into every forwarded request).
backend_user: "webdav-username"
backend_pass: "webdav-password"


## Encryption
# Algorithm: mix, rc4, or aesctr.
algorithm: aesctr
# Encryption passphrase (required).
password: "your-encryption-password"


## Proxy
# Listen address (default :8080).
listen_addr: ":8080"
# Front-side basic auth. When disabled and backend credentials are set,
# those credentials are required from clients instead.
enable_auth: false
auth_user: "proxy-username"
auth_pass: "proxy-password"


## Logging
# trace, debug, info, warn, or error.
log_level: "info"
debug: false


## Performance
# Body chunk size in bytes.
chunk_size: 8192
# Per-request deadline in seconds.
timeout_secs: 300
max_idle_conns_per_host: 10
idle_conn_timeout_secs: 90
"#;

/// Writes a commented default config file.
pub fn generate_default_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create config directory {}", dir.display()))?;
        }
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write config file {}", path.display()))
}
