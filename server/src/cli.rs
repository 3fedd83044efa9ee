use std::path::PathBuf;

use clap::Parser;
use cryptdav_cipher::Algorithm;

use crate::config::Config;

/// Encrypting WebDAV reverse proxy.
#[derive(Debug, Parser)]
#[clap(name = "cryptdav-server", version)]
pub struct Cli {
    /// Listen address (default :8080).
    #[clap(long)]
    pub listen: Option<String>,
    /// Upstream WebDAV server URL.
    #[clap(long)]
    pub backend: Option<String>,
    /// Encryption passphrase.
    #[clap(short = 'p', long)]
    pub password: Option<String>,
    /// Encryption algorithm: mix, rc4, or aesctr.
    #[clap(short = 't', long)]
    pub algorithm: Option<Algorithm>,
    /// Body chunk size in bytes.
    #[clap(long)]
    pub chunk_size: Option<usize>,
    /// Enable debug logging.
    #[clap(long)]
    pub debug: bool,
    /// Upstream WebDAV username.
    #[clap(long)]
    pub backend_user: Option<String>,
    /// Upstream WebDAV password.
    #[clap(long)]
    pub backend_pass: Option<String>,
    /// Front-side basic auth username.
    #[clap(long)]
    pub auth_user: Option<String>,
    /// Front-side basic auth password.
    #[clap(long)]
    pub auth_pass: Option<String>,
    /// Config file path (YAML). Generated with defaults if missing.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Overrides config values with explicitly given flags.
    pub fn apply(&self, config: &mut Config) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend_url = backend.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(user) = &self.backend_user {
            config.backend_user = user.clone();
        }
        if let Some(pass) = &self.backend_pass {
            config.backend_pass = pass.clone();
        }
        if let Some(user) = &self.auth_user {
            config.auth_user = user.clone();
        }
        if let Some(pass) = &self.auth_pass {
            config.auth_pass = pass.clone();
        }
    }

    /// Whether `--config` was the only thing on the command line, meaning
    /// a freshly generated default config should stop the process so the
    /// operator can fill it in.
    pub fn config_only(&self) -> bool {
        self.listen.is_none()
            && self.backend.is_none()
            && self.password.is_none()
            && self.algorithm.is_none()
            && self.chunk_size.is_none()
            && !self.debug
            && self.backend_user.is_none()
            && self.backend_pass.is_none()
            && self.auth_user.is_none()
            && self.auth_pass.is_none()
    }
}
