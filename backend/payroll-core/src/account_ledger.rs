// src/account_ledger.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{parse_timestamp, Clock};
use crate::ledger_store::{LedgerStore, StoreError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {raw}")]
    InvalidAmount { raw: String },

    #[error("Amount {amount} would take the balance of employee {employee_id} out of range")]
    AmountOutOfRange { employee_id: String, amount: Decimal },

    #[error("Ledger storage error")]
    Store(#[from] StoreError),
}

/// Running balance an employee owes the employer, plus the per-payroll
/// deduction cap. One per employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub employee_id: String,
    pub balance: Decimal,
    pub weekly_deduction_amount: Decimal,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Account {
    pub fn new(employee_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            balance: Decimal::ZERO,
            weekly_deduction_amount: Decimal::ZERO,
            last_updated: now,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Payment,
    PayrollDeduction,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Payment => "payment",
            TransactionKind::PayrollDeduction => "payroll_deduction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTransaction {
    pub id: String,
    pub employee_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccountTransaction {
    pub fn new(
        employee_id: &str,
        kind: TransactionKind,
        amount: Decimal,
        description: Option<String>,
        date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            employee_id: employee_id.to_string(),
            kind,
            amount,
            description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            date,
            created_at,
        }
    }
}

/// Account state after a manual ledger movement, with the transaction that recorded it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub account: Account,
    pub transaction: AccountTransaction,
}

/// Result of a payroll-linked deduction. `Degraded` means the ledger could not be
/// used and payroll proceeds with the untouched base net.
#[derive(Debug, Clone, PartialEq)]
pub enum DeductionOutcome {
    Applied { applied: Decimal, net_after: Decimal },
    Degraded { net_after: Decimal, reason: String },
}

impl DeductionOutcome {
    pub fn applied(&self) -> Decimal {
        match self {
            DeductionOutcome::Applied { applied, .. } => *applied,
            DeductionOutcome::Degraded { .. } => Decimal::ZERO,
        }
    }

    pub fn net_after(&self) -> Decimal {
        match self {
            DeductionOutcome::Applied { net_after, .. } | DeductionOutcome::Degraded { net_after, .. } => {
                *net_after
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DeductionOutcome::Degraded { .. })
    }
}

type LockMap = Mutex<HashMap<String, Arc<TokioMutex<()>>>>;

pub struct AccountLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    // Serializes read-modify-write of a single employee's balance. Entries only
    // live while some task holds or waits for them.
    employee_locks: LockMap,
}

/// Held for the duration of one employee's read-modify-write. Dropping it
/// releases the lock and forgets the map entry once nobody else wants it.
struct EmployeeLockGuard<'a> {
    locks: &'a LockMap,
    employee_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EmployeeLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map's own reference is the last one, so no task is holding or queued on it.
        let idle = locks
            .get(&self.employee_id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.employee_id);
        }
    }
}

impl AccountLedger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            employee_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_employee(&self, employee_id: &str) -> EmployeeLockGuard<'_> {
        let lock = {
            let mut locks = self
                .employee_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(employee_id.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };
        EmployeeLockGuard {
            locks: &self.employee_locks,
            employee_id: employee_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_lock_count(&self) -> usize {
        self.employee_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns the employee's account, creating a zero-balance one on first access.
    pub async fn get_or_create(&self, employee_id: &str) -> Result<Account, LedgerError> {
        if let Some(account) = self.store.find_account(employee_id).await? {
            return Ok(account);
        }
        let account = self
            .store
            .insert_account_if_absent(Account::new(employee_id, self.clock.now()))
            .await?;
        Ok(account)
    }

    /// Records money now owed by the employee (e.g. a company-store purchase on credit).
    pub async fn record_purchase(
        &self,
        employee_id: &str,
        amount: Decimal,
        description: Option<String>,
        date: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        ensure_positive(amount)?;
        let _guard = self.lock_employee(employee_id).await;

        let mut account = self.get_or_create(employee_id).await?;
        let balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::AmountOutOfRange {
                employee_id: employee_id.to_string(),
                amount,
            })?;
        let transaction = self.new_transaction(employee_id, TransactionKind::Purchase, amount, description, date);
        self.store.append_transaction(&transaction).await?;

        account.balance = balance;
        account.last_updated = self.clock.now();
        let account = self.store.save_account(&account).await?;

        info!(
            "Recorded purchase of {} for employee {}; balance now {}",
            amount, employee_id, account.balance
        );
        Ok(LedgerEntry { account, transaction })
    }

    /// Records a repayment. Any excess over the balance is absorbed; the balance floors at zero.
    pub async fn record_payment(
        &self,
        employee_id: &str,
        amount: Decimal,
        description: Option<String>,
        date: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        ensure_positive(amount)?;
        let _guard = self.lock_employee(employee_id).await;

        let mut account = self.get_or_create(employee_id).await?;
        let balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::AmountOutOfRange {
                employee_id: employee_id.to_string(),
                amount,
            })?
            .max(Decimal::ZERO);
        let transaction = self.new_transaction(employee_id, TransactionKind::Payment, amount, description, date);
        self.store.append_transaction(&transaction).await?;

        if amount > account.balance {
            debug!(
                "Payment of {} exceeds balance {} for employee {}; excess absorbed",
                amount, account.balance, employee_id
            );
        }
        account.balance = balance;
        account.last_updated = self.clock.now();
        let account = self.store.save_account(&account).await?;

        info!(
            "Recorded payment of {} for employee {}; balance now {}",
            amount, employee_id, account.balance
        );
        Ok(LedgerEntry { account, transaction })
    }

    pub async fn set_weekly_deduction_amount(
        &self,
        employee_id: &str,
        amount: Decimal,
    ) -> Result<Account, LedgerError> {
        let _guard = self.lock_employee(employee_id).await;

        let mut account = self.get_or_create(employee_id).await?;
        account.weekly_deduction_amount = amount.max(Decimal::ZERO);
        account.last_updated = self.clock.now();
        let account = self.store.save_account(&account).await?;

        info!(
            "Weekly deduction for employee {} set to {}",
            employee_id, account.weekly_deduction_amount
        );
        Ok(account)
    }

    /// Takes `min(cap, balance)` from the ledger for a payroll run. Never fails:
    /// storage problems yield `Degraded` with the base net untouched.
    pub async fn apply_payroll_deduction(
        &self,
        employee_id: &str,
        period: &str,
        base_net: Decimal,
    ) -> DeductionOutcome {
        match self.try_payroll_deduction(employee_id, period).await {
            Ok(applied) => {
                // Only a hugely negative base can overflow, and that floors to zero anyway.
                let net_after = base_net
                    .checked_sub(applied)
                    .unwrap_or(Decimal::ZERO)
                    .max(Decimal::ZERO);
                DeductionOutcome::Applied { applied, net_after }
            }
            Err(e) => {
                warn!(
                    "Payroll deduction skipped for employee {} (period {}): {}",
                    employee_id, period, e
                );
                DeductionOutcome::Degraded {
                    net_after: base_net,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_payroll_deduction(&self, employee_id: &str, period: &str) -> Result<Decimal, LedgerError> {
        let _guard = self.lock_employee(employee_id).await;

        let mut account = self.get_or_create(employee_id).await?;
        let applied = account
            .weekly_deduction_amount
            .min(account.balance)
            .max(Decimal::ZERO);
        if applied.is_zero() {
            debug!("Nothing to deduct for employee {} in period {}", employee_id, period);
            return Ok(applied);
        }

        let now = self.clock.now();
        let transaction = AccountTransaction::new(
            employee_id,
            TransactionKind::PayrollDeduction,
            applied,
            Some(format!("Automatic deduction for period {}", period)),
            now,
            now,
        );
        self.store.append_transaction(&transaction).await?;

        account.balance = (account.balance - applied).max(Decimal::ZERO);
        account.last_updated = now;
        let account = self.store.save_account(&account).await?;

        info!(
            "Applied payroll deduction of {} for employee {} (period {}); balance now {}",
            applied, employee_id, period, account.balance
        );
        Ok(applied)
    }

    /// All transactions for the employee, newest first.
    pub async fn get_transaction_history(&self, employee_id: &str) -> Result<Vec<AccountTransaction>, LedgerError> {
        let mut transactions = self.store.transactions_for(employee_id).await?;
        // Reverse first so the stable sort leaves same-date entries newest-created first.
        transactions.reverse();
        transactions.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(transactions)
    }

    fn new_transaction(
        &self,
        employee_id: &str,
        kind: TransactionKind,
        amount: Decimal,
        description: Option<String>,
        date: Option<&str>,
    ) -> AccountTransaction {
        let now = self.clock.now();
        let date = date.and_then(parse_timestamp).unwrap_or(now);
        AccountTransaction::new(employee_id, kind, amount, description, date, now)
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            raw: amount.to_string(),
        });
    }
    Ok(())
}
