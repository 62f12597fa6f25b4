// src/config.rs
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3000
}

/// Settings read from the environment (and `.env`).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// JSON snapshot file; unset means an in-memory store.
    pub store_path: Option<PathBuf>,
    /// Employee roster JSON file.
    pub roster_path: Option<PathBuf>,

    // TLS is enabled only when both are set
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenv::dotenv().ok();
        envy::from_env::<Config>()
    }

    /// Command line flags win over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(host) = &cli.host {
            self.server_host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server_port = port;
        }
        if let Some(store_path) = &cli.store_path {
            self.store_path = Some(store_path.clone());
        }
        if let Some(roster) = &cli.roster {
            self.roster_path = Some(roster.clone());
        }
        self
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "payroll-core", about = "Employee account ledger and payroll receipt service")]
pub struct Cli {
    /// Interface to bind (overrides SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// JSON snapshot file for accounts, transactions and receipts
    #[arg(long)]
    pub store_path: Option<PathBuf>,

    /// Employee roster JSON file
    #[arg(long)]
    pub roster: Option<PathBuf>,
}
