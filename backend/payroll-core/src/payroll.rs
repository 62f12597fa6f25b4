// src/payroll.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::account_ledger::{AccountLedger, DeductionOutcome};
use crate::clock::Clock;
use crate::employee_directory::{DirectoryError, Employee, EmployeeDirectory};
use crate::ledger_store::{ReceiptStore, StoreError};
use crate::payroll_breakdown::{compute_weekly_breakdown, WeeklyBreakdown};

#[derive(Error, Debug)]
pub enum PayrollError {
    #[error("Employee not found: {0}")]
    EmployeeNotFound(String),

    #[error("Receipt not found: {0}")]
    ReceiptNotFound(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Receipt storage error")]
    Store(#[from] StoreError),

    #[error("Employee directory error")]
    Directory(#[from] DirectoryError),
}

/// One employee's pay receipt for one period. `net_amount` is the final
/// monthly net after the account deduction recorded in `account_deduction_applied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollReceipt {
    pub id: String,
    pub employee_id: String,
    /// `YYYY-MM`
    pub period: String,
    pub payment_date: DateTime<Utc>,
    pub signed: bool,
    pub signed_date: Option<DateTime<Utc>>,
    pub has_presentismo: bool,
    pub extra_hours: Decimal,
    pub other_additions: Decimal,
    pub discounts: Decimal,
    pub advance_requested: bool,
    pub advance_date: Option<DateTime<Utc>>,
    pub advance_amount: Decimal,
    pub account_deduction_applied: Decimal,
    pub net_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewReceipt {
    pub employee_id: String,
    pub period: String,
    pub payment_date: Option<DateTime<Utc>>,
    pub signed: bool,
    pub signed_date: Option<DateTime<Utc>>,
    pub has_presentismo: bool,
    pub extra_hours: Decimal,
    pub other_additions: Decimal,
    pub discounts: Decimal,
    pub advance_requested: bool,
    pub advance_date: Option<DateTime<Utc>>,
    pub advance_amount: Decimal,
    /// Monthly net before the account deduction.
    pub net_amount: Decimal,
}

/// Partial receipt update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ReceiptPatch {
    pub period: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub signed: Option<bool>,
    pub signed_date: Option<DateTime<Utc>>,
    pub has_presentismo: Option<bool>,
    pub extra_hours: Option<Decimal>,
    pub other_additions: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub advance_requested: Option<bool>,
    pub advance_date: Option<DateTime<Utc>>,
    pub advance_amount: Option<Decimal>,
    pub net_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeEventKind {
    PayrollCreated,
    PayrollSignatureUpdate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub from: serde_json::Value,
    pub to: serde_json::Value,
}

/// Audit trail entry for an employee's file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeEvent {
    pub employee_id: String,
    #[serde(rename = "type")]
    pub kind: EmployeeEventKind,
    pub message: String,
    pub changes: Vec<FieldChange>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub file_number: Option<String>,
}

impl From<&Employee> for EmployeeSummary {
    fn from(employee: &Employee) -> Self {
        Self {
            id: employee.id.clone(),
            first_name: employee.first_name.clone(),
            last_name: employee.last_name.clone(),
            file_number: employee.file_number.clone(),
        }
    }
}

/// Weekly payment schedule for one stored receipt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySchedule {
    pub employee: EmployeeSummary,
    pub period: String,
    pub payment_date: DateTime<Utc>,
    pub monthly_net: Decimal,
    pub account_deduction_applied: Decimal,
    #[serde(flatten)]
    pub breakdown: WeeklyBreakdown,
}

pub struct PayrollService {
    ledger: Arc<AccountLedger>,
    receipts: Arc<dyn ReceiptStore>,
    directory: Arc<dyn EmployeeDirectory>,
    clock: Arc<dyn Clock>,
}

impl PayrollService {
    pub fn new(
        ledger: Arc<AccountLedger>,
        receipts: Arc<dyn ReceiptStore>,
        directory: Arc<dyn EmployeeDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            receipts,
            directory,
            clock,
        }
    }

    async fn require_employee(&self, employee_id: &str) -> Result<Employee, PayrollError> {
        self.directory
            .find_employee(employee_id)
            .await?
            .ok_or_else(|| PayrollError::EmployeeNotFound(employee_id.to_string()))
    }

    /// Creates a receipt, first taking the capped account deduction from the
    /// employee's ledger. A ledger failure never blocks the receipt.
    pub async fn create_receipt(&self, input: NewReceipt) -> Result<PayrollReceipt, PayrollError> {
        self.require_employee(&input.employee_id).await?;
        if input.period.trim().is_empty() {
            return Err(PayrollError::MissingField("period"));
        }
        let payment_date = input.payment_date.ok_or(PayrollError::MissingField("paymentDate"))?;

        let outcome = self
            .ledger
            .apply_payroll_deduction(&input.employee_id, &input.period, input.net_amount)
            .await;
        if let DeductionOutcome::Degraded { reason, .. } = &outcome {
            warn!(
                "Receipt for employee {} (period {}) created without account deduction: {}",
                input.employee_id, input.period, reason
            );
        }

        let now = self.clock.now();
        let receipt = PayrollReceipt {
            id: Uuid::new_v4().to_string(),
            employee_id: input.employee_id,
            period: input.period.trim().to_string(),
            payment_date,
            signed: input.signed,
            signed_date: if input.signed { input.signed_date } else { None },
            has_presentismo: input.has_presentismo,
            extra_hours: input.extra_hours,
            other_additions: input.other_additions,
            discounts: input.discounts,
            advance_requested: input.advance_requested,
            advance_date: if input.advance_requested { input.advance_date } else { None },
            advance_amount: input.advance_amount.max(Decimal::ZERO),
            account_deduction_applied: outcome.applied(),
            net_amount: outcome.net_after(),
            created_at: now,
            updated_at: now,
        };
        self.receipts.insert_receipt(&receipt).await?;

        info!(
            "Created receipt {} for employee {} (period {}, net {}, account deduction {})",
            receipt.id, receipt.employee_id, receipt.period, receipt.net_amount, receipt.account_deduction_applied
        );
        self.emit_event(created_event(&receipt, now));
        Ok(receipt)
    }

    /// All receipts, latest payment date first.
    pub async fn list_receipts(&self) -> Result<Vec<PayrollReceipt>, PayrollError> {
        let mut receipts = self.receipts.all_receipts().await?;
        sort_latest_first(&mut receipts);
        Ok(receipts)
    }

    pub async fn receipts_for_employee(&self, employee_id: &str) -> Result<Vec<PayrollReceipt>, PayrollError> {
        let mut receipts = self.receipts.receipts_for(employee_id).await?;
        sort_latest_first(&mut receipts);
        Ok(receipts)
    }

    pub async fn get_receipt(&self, id: &str) -> Result<PayrollReceipt, PayrollError> {
        self.receipts
            .find_receipt(id)
            .await?
            .ok_or_else(|| PayrollError::ReceiptNotFound(id.to_string()))
    }

    /// Applies a partial edit. The stored net amount is replaced verbatim; the
    /// ledger deduction is not re-applied.
    pub async fn update_receipt(&self, id: &str, patch: ReceiptPatch) -> Result<PayrollReceipt, PayrollError> {
        let mut receipt = self.get_receipt(id).await?;
        let previously_signed = receipt.signed;

        if let Some(period) = patch.period {
            receipt.period = period.trim().to_string();
        }
        if let Some(payment_date) = patch.payment_date {
            receipt.payment_date = payment_date;
        }
        if let Some(signed) = patch.signed {
            receipt.signed = signed;
        }
        receipt.signed_date = if receipt.signed {
            patch.signed_date.or(receipt.signed_date)
        } else {
            None
        };
        if let Some(has_presentismo) = patch.has_presentismo {
            receipt.has_presentismo = has_presentismo;
        }
        if let Some(extra_hours) = patch.extra_hours {
            receipt.extra_hours = extra_hours;
        }
        if let Some(other_additions) = patch.other_additions {
            receipt.other_additions = other_additions;
        }
        if let Some(discounts) = patch.discounts {
            receipt.discounts = discounts;
        }
        if let Some(advance_requested) = patch.advance_requested {
            receipt.advance_requested = advance_requested;
        }
        receipt.advance_date = if receipt.advance_requested {
            patch.advance_date.or(receipt.advance_date)
        } else {
            None
        };
        if let Some(advance_amount) = patch.advance_amount {
            receipt.advance_amount = advance_amount.max(Decimal::ZERO);
        }
        if let Some(net_amount) = patch.net_amount {
            receipt.net_amount = net_amount;
        }

        let now = self.clock.now();
        receipt.updated_at = now;
        self.receipts.update_receipt(&receipt).await?;
        info!("Updated receipt {} for employee {}", receipt.id, receipt.employee_id);

        if previously_signed != receipt.signed {
            self.emit_event(signature_event(&receipt, previously_signed, now));
        }
        Ok(receipt)
    }

    /// Removes a receipt. Ledger transactions it funded stay in place.
    pub async fn delete_receipt(&self, id: &str) -> Result<(), PayrollError> {
        if !self.receipts.delete_receipt(id).await? {
            return Err(PayrollError::ReceiptNotFound(id.to_string()));
        }
        info!("Deleted receipt {}", id);
        Ok(())
    }

    /// Weekly schedule for the receipt of `period`, or for the latest receipt
    /// by payment date when no period is given.
    pub async fn weekly_breakdown_for(
        &self,
        employee_id: &str,
        period: Option<&str>,
        weeks: Option<i64>,
    ) -> Result<WeeklySchedule, PayrollError> {
        let employee = self.require_employee(employee_id).await?;
        let mut receipts = self.receipts.receipts_for(employee_id).await?;
        sort_latest_first(&mut receipts);

        let receipt = match period.map(str::trim).filter(|p| !p.is_empty()) {
            Some(period) => receipts.into_iter().find(|r| r.period == period),
            None => receipts.into_iter().next(),
        }
        .ok_or_else(|| {
            PayrollError::ReceiptNotFound(format!(
                "employee {} period {}",
                employee_id,
                period.unwrap_or("latest")
            ))
        })?;

        let breakdown = compute_weekly_breakdown(
            &receipt.period,
            receipt.net_amount,
            receipt.advance_amount,
            receipt.advance_requested,
            weeks,
        );

        Ok(WeeklySchedule {
            employee: EmployeeSummary::from(&employee),
            period: receipt.period,
            payment_date: receipt.payment_date,
            monthly_net: receipt.net_amount,
            account_deduction_applied: receipt.account_deduction_applied,
            breakdown,
        })
    }

    fn emit_event(&self, event: EmployeeEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "payroll_core::employee_events", event = %json, "{}", event.message),
            Err(e) => warn!("Could not record employee event for {}: {}", event.employee_id, e),
        }
    }
}

fn sort_latest_first(receipts: &mut [PayrollReceipt]) {
    receipts.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
}

fn created_event(receipt: &PayrollReceipt, now: DateTime<Utc>) -> EmployeeEvent {
    let status = if receipt.signed {
        "Status: signed."
    } else {
        "Status: pending signature."
    };
    EmployeeEvent {
        employee_id: receipt.employee_id.clone(),
        kind: EmployeeEventKind::PayrollCreated,
        message: format!(
            "New receipt available. Period {}, payment {}, net {}. {}",
            receipt.period,
            receipt.payment_date.format("%d/%m/%Y"),
            receipt.net_amount,
            status
        ),
        changes: vec![FieldChange {
            field: "payroll".to_string(),
            from: serde_json::Value::Null,
            to: serde_json::json!({
                "period": receipt.period,
                "paymentDate": receipt.payment_date,
                "netAmount": receipt.net_amount,
                "signed": receipt.signed,
            }),
        }],
        created_at: now,
    }
}

fn signature_event(receipt: &PayrollReceipt, previously_signed: bool, now: DateTime<Utc>) -> EmployeeEvent {
    let message = if receipt.signed {
        "The receipt was signed."
    } else {
        "The receipt is pending signature."
    };
    EmployeeEvent {
        employee_id: receipt.employee_id.clone(),
        kind: EmployeeEventKind::PayrollSignatureUpdate,
        message: message.to_string(),
        changes: vec![FieldChange {
            field: "payroll.signed".to_string(),
            from: serde_json::Value::Bool(previously_signed),
            to: serde_json::Value::Bool(receipt.signed),
        }],
        created_at: now,
    }
}
