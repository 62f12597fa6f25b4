// src/ledger_store.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::account_ledger::{Account, AccountTransaction};
use crate::payroll::PayrollReceipt;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("Account for employee {employee_id} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        employee_id: String,
        expected: u64,
        found: u64,
    },

    #[error("No account stored for employee {0}")]
    MissingAccount(String),

    #[error("No receipt stored with id {0}")]
    MissingReceipt(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> StoreError {
    StoreError::Io {
        source,
        context: context.into(),
    }
}

/// Accounts (one per employee) and their append-only transaction log.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_account(&self, employee_id: &str) -> Result<Option<Account>, StoreError>;

    /// Stores `account` unless one already exists for the same employee, and
    /// returns whichever account is stored afterwards.
    async fn insert_account_if_absent(&self, account: Account) -> Result<Account, StoreError>;

    /// Replaces the stored account if its version still equals `account.version`.
    /// The returned account carries the bumped version.
    async fn save_account(&self, account: &Account) -> Result<Account, StoreError>;

    async fn append_transaction(&self, transaction: &AccountTransaction) -> Result<(), StoreError>;

    /// Transactions for one employee in insertion order.
    async fn transactions_for(&self, employee_id: &str) -> Result<Vec<AccountTransaction>, StoreError>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert_receipt(&self, receipt: &PayrollReceipt) -> Result<(), StoreError>;
    async fn update_receipt(&self, receipt: &PayrollReceipt) -> Result<(), StoreError>;
    async fn find_receipt(&self, id: &str) -> Result<Option<PayrollReceipt>, StoreError>;
    async fn delete_receipt(&self, id: &str) -> Result<bool, StoreError>;
    async fn all_receipts(&self) -> Result<Vec<PayrollReceipt>, StoreError>;
    async fn receipts_for(&self, employee_id: &str) -> Result<Vec<PayrollReceipt>, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub accounts: HashMap<String, Account>,
    #[serde(default)]
    pub transactions: Vec<AccountTransaction>,
    #[serde(default)]
    pub receipts: Vec<PayrollReceipt>,
}

// --- In-memory store ---

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreSnapshot>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::LockError("store state poisoned (read)".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreSnapshot>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::LockError("store state poisoned (write)".to_string()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_account(&self, employee_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(employee_id).cloned())
    }

    async fn insert_account_if_absent(&self, account: Account) -> Result<Account, StoreError> {
        let mut state = self.write()?;
        let stored = state
            .accounts
            .entry(account.employee_id.clone())
            .or_insert_with(|| {
                debug!("Creating account for employee {}", account.employee_id);
                account
            });
        Ok(stored.clone())
    }

    async fn save_account(&self, account: &Account) -> Result<Account, StoreError> {
        let mut state = self.write()?;
        let stored = state
            .accounts
            .get_mut(&account.employee_id)
            .ok_or_else(|| StoreError::MissingAccount(account.employee_id.clone()))?;
        if stored.version != account.version {
            return Err(StoreError::VersionConflict {
                employee_id: account.employee_id.clone(),
                expected: account.version,
                found: stored.version,
            });
        }
        let mut next = account.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn append_transaction(&self, transaction: &AccountTransaction) -> Result<(), StoreError> {
        self.write()?.transactions.push(transaction.clone());
        Ok(())
    }

    async fn transactions_for(&self, employee_id: &str) -> Result<Vec<AccountTransaction>, StoreError> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .filter(|tx| tx.employee_id == employee_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn insert_receipt(&self, receipt: &PayrollReceipt) -> Result<(), StoreError> {
        self.write()?.receipts.push(receipt.clone());
        Ok(())
    }

    async fn update_receipt(&self, receipt: &PayrollReceipt) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let slot = state
            .receipts
            .iter_mut()
            .find(|stored| stored.id == receipt.id)
            .ok_or_else(|| StoreError::MissingReceipt(receipt.id.clone()))?;
        *slot = receipt.clone();
        Ok(())
    }

    async fn find_receipt(&self, id: &str) -> Result<Option<PayrollReceipt>, StoreError> {
        Ok(self.read()?.receipts.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_receipt(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let before = state.receipts.len();
        state.receipts.retain(|r| r.id != id);
        Ok(state.receipts.len() != before)
    }

    async fn all_receipts(&self) -> Result<Vec<PayrollReceipt>, StoreError> {
        Ok(self.read()?.receipts.clone())
    }

    async fn receipts_for(&self, employee_id: &str) -> Result<Vec<PayrollReceipt>, StoreError> {
        Ok(self
            .read()?
            .receipts
            .iter()
            .filter(|r| r.employee_id == employee_id)
            .cloned()
            .collect())
    }
}

// --- JSON snapshot file store ---

/// `MemoryStore` that rewrites a JSON snapshot file after every mutation.
pub struct JsonFileStore {
    inner: MemoryStore,
    path: PathBuf,
    flush_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens the snapshot at `path`, starting empty when the file does not exist yet.
    /// A snapshot that fails to parse is an error rather than an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let snapshot = if path.exists() {
            let json_string = fs::read_to_string(path)
                .map_err(|e| io_context(e, format!("Failed to read store file: {:?}", path)))?;
            let snapshot: StoreSnapshot = serde_json::from_str(&json_string)?;
            info!(
                "Loaded store snapshot from {:?}: {} accounts, {} transactions, {} receipts",
                path,
                snapshot.accounts.len(),
                snapshot.transactions.len(),
                snapshot.receipts.len()
            );
            snapshot
        } else {
            info!("No store snapshot at {:?}, starting empty", path);
            StoreSnapshot::default()
        };

        Ok(Self {
            inner: MemoryStore::from_snapshot(snapshot),
            path: path.to_path_buf(),
            flush_lock: Mutex::new(()),
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let _guard = self
            .flush_lock
            .lock()
            .map_err(|_| StoreError::LockError("flush lock poisoned".to_string()))?;
        let snapshot = self.inner.snapshot()?;
        let json_string = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    io_context(e, format!("Failed to create directory for store file: {:?}", parent))
                })?;
            }
        }

        // Write next to the target and rename so readers never see a half-written file.
        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp_path)
            .map_err(|e| io_context(e, format!("Failed to create store file: {:?}", tmp_path)))?;
        file.write_all(json_string.as_bytes())
            .map_err(|e| io_context(e, format!("Failed to write store file: {:?}", tmp_path)))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            io_context(e, format!("Failed to move store file into place: {:?}", self.path))
        })?;

        debug!("Flushed store snapshot to {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn find_account(&self, employee_id: &str) -> Result<Option<Account>, StoreError> {
        self.inner.find_account(employee_id).await
    }

    async fn insert_account_if_absent(&self, account: Account) -> Result<Account, StoreError> {
        let stored = self.inner.insert_account_if_absent(account).await?;
        self.flush()?;
        Ok(stored)
    }

    async fn save_account(&self, account: &Account) -> Result<Account, StoreError> {
        let saved = self.inner.save_account(account).await?;
        self.flush()?;
        Ok(saved)
    }

    async fn append_transaction(&self, transaction: &AccountTransaction) -> Result<(), StoreError> {
        self.inner.append_transaction(transaction).await?;
        self.flush()
    }

    async fn transactions_for(&self, employee_id: &str) -> Result<Vec<AccountTransaction>, StoreError> {
        self.inner.transactions_for(employee_id).await
    }
}

#[async_trait]
impl ReceiptStore for JsonFileStore {
    async fn insert_receipt(&self, receipt: &PayrollReceipt) -> Result<(), StoreError> {
        self.inner.insert_receipt(receipt).await?;
        self.flush()
    }

    async fn update_receipt(&self, receipt: &PayrollReceipt) -> Result<(), StoreError> {
        self.inner.update_receipt(receipt).await?;
        self.flush()
    }

    async fn find_receipt(&self, id: &str) -> Result<Option<PayrollReceipt>, StoreError> {
        self.inner.find_receipt(id).await
    }

    async fn delete_receipt(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.inner.delete_receipt(id).await?;
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    async fn all_receipts(&self) -> Result<Vec<PayrollReceipt>, StoreError> {
        self.inner.all_receipts().await
    }

    async fn receipts_for(&self, employee_id: &str) -> Result<Vec<PayrollReceipt>, StoreError> {
        self.inner.receipts_for(employee_id).await
    }
}

// --- Always-failing store for exercising error paths ---

#[cfg(test)]
pub struct FailingStore;

#[cfg(test)]
impl FailingStore {
    fn down<T>() -> Result<T, StoreError> {
        Err(StoreError::Unavailable("store is down".to_string()))
    }
}

#[cfg(test)]
#[async_trait]
impl LedgerStore for FailingStore {
    async fn find_account(&self, _employee_id: &str) -> Result<Option<Account>, StoreError> {
        Self::down()
    }

    async fn insert_account_if_absent(&self, _account: Account) -> Result<Account, StoreError> {
        Self::down()
    }

    async fn save_account(&self, _account: &Account) -> Result<Account, StoreError> {
        Self::down()
    }

    async fn append_transaction(&self, _transaction: &AccountTransaction) -> Result<(), StoreError> {
        Self::down()
    }

    async fn transactions_for(&self, _employee_id: &str) -> Result<Vec<AccountTransaction>, StoreError> {
        Self::down()
    }
}
