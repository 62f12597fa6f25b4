use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod account_ledger;
mod clock;
mod config;
mod employee_directory;
mod http_api;
mod ledger_store;
mod payroll;
mod payroll_breakdown;

#[cfg(test)]
mod http_api_tests;
#[cfg(test)]
mod payroll_tests;

use account_ledger::{AccountLedger, LedgerError};
use clock::{Clock, SystemClock};
use config::{Cli, Config};
use employee_directory::{DirectoryError, EmployeeDirectory, RosterDirectory};
use http_api::{build_router, AppState};
use ledger_store::{JsonFileStore, LedgerStore, MemoryStore, ReceiptStore, StoreError};
use payroll::{PayrollError, PayrollService};

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Employee not found: {0}")]
    EmployeeNotFound(String),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Payroll error: {0}")]
    Payroll(#[from] PayrollError),
    #[error("Employee directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Export failed: {0}")]
    Export(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, message) = match &self {
            AppError::EmployeeNotFound(_) | AppError::Payroll(PayrollError::EmployeeNotFound(_)) => {
                (StatusCode::NOT_FOUND, "Employee not found".to_string())
            }
            AppError::Payroll(PayrollError::ReceiptNotFound(_)) => {
                (StatusCode::NOT_FOUND, "Receipt not found".to_string())
            }
            AppError::Ledger(LedgerError::InvalidAmount { .. }) => {
                (StatusCode::BAD_REQUEST, "Invalid amount".to_string())
            }
            AppError::Ledger(LedgerError::AmountOutOfRange { .. }) => {
                (StatusCode::BAD_REQUEST, "Amount out of range".to_string())
            }
            AppError::Payroll(PayrollError::MissingField(name)) => {
                (StatusCode::BAD_REQUEST, format!("Missing required field: {}", name))
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string()),
        };

        if status_code.is_server_error() {
            error!("Request failed: {:?}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        (status_code, Json(json!({ "msg": message }))).into_response()
    }
}

// --- Wiring ---

fn open_stores(path: Option<&Path>) -> Result<(Arc<dyn LedgerStore>, Arc<dyn ReceiptStore>), StoreError> {
    match path {
        Some(path) => {
            let store = Arc::new(JsonFileStore::open(path)?);
            info!("Using JSON file store at {:?}", path);
            let ledger_store: Arc<dyn LedgerStore> = store.clone();
            let receipt_store: Arc<dyn ReceiptStore> = store;
            Ok((ledger_store, receipt_store))
        }
        None => {
            warn!("No STORE_PATH configured; ledger and receipts are kept in memory only");
            let store = Arc::new(MemoryStore::new());
            let ledger_store: Arc<dyn LedgerStore> = store.clone();
            let receipt_store: Arc<dyn ReceiptStore> = store;
            Ok((ledger_store, receipt_store))
        }
    }
}

fn build_state(
    ledger_store: Arc<dyn LedgerStore>,
    receipt_store: Arc<dyn ReceiptStore>,
    directory: Arc<dyn EmployeeDirectory>,
    clock: Arc<dyn Clock>,
) -> AppState {
    let ledger = Arc::new(AccountLedger::new(ledger_store, clock.clone()));
    let payroll = Arc::new(PayrollService::new(
        ledger.clone(),
        receipt_store,
        directory.clone(),
        clock,
    ));
    AppState {
        ledger,
        payroll,
        directory,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()
        .context("Failed to read configuration from environment")?
        .apply_cli(&cli);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded: {:?}", config);

    let (ledger_store, receipt_store) =
        open_stores(config.store_path.as_deref()).context("Failed to open ledger store")?;
    let directory = RosterDirectory::load(config.roster_path.as_deref())
        .context("Failed to load employee roster")?;
    let state = build_state(
        ledger_store,
        receipt_store,
        Arc::new(directory),
        Arc::new(SystemClock),
    );
    info!("Application state initialized.");

    let app = build_router(state);
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .with_context(|| format!("Failed to load TLS cert/key from {:?} and {:?}", cert_path, key_path))?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("Starting server on http://{}", addr);
            axum::serve(listener, app).await.context("HTTP server failed")?;
        }
    }

    Ok(())
}
