// src/main.rs

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    employee_id: String,
    balance: String,
    weekly_deduction_amount: String,
}

#[derive(Debug, Deserialize)]
struct AccountEnvelope {
    account: Account,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    id: String,
    period: String,
    net_amount: String,
    account_deduction_applied: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptEnvelope {
    receipt: Receipt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeeklySchedule {
    period: String,
    weeks: Vec<String>,
    weekly_base: String,
    applied_advance: String,
    total_after_advance: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Usage: payroll-test-client [base_url] [employee_id]
    let mut args = env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "http://localhost:3000".to_string());
    let employee_id = args.next().unwrap_or_else(|| "E1".to_string());
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health);

    // Test 2: Purchase on credit
    println!("\n🔍 Recording a purchase for employee {}...", employee_id);
    let purchase = client
        .post(format!("{}/api/account/purchase", base_url))
        .json(&json!({
            "employeeId": employee_id,
            "amount": "500",
            "description": "Smoke test purchase"
        }))
        .send()
        .await?;
    let status = purchase.status();
    if !status.is_success() {
        println!("❌ Purchase failed ({}): {}", status, purchase.text().await?);
        println!("Is employee {} in the roster the server was started with?", employee_id);
        return Ok(());
    }
    let purchase = purchase.json::<AccountEnvelope>().await?;
    println!("Balance after purchase: {}", purchase.account.balance);

    // Test 3: Weekly deduction cap
    println!("\n🔍 Setting weekly deduction to 200...");
    let updated = client
        .put(format!(
            "{}/api/account/employee/{}/weekly-deduction",
            base_url, employee_id
        ))
        .json(&json!({ "weeklyDeductionAmount": 200 }))
        .send()
        .await?
        .json::<AccountEnvelope>()
        .await?;
    println!(
        "Account {}: balance {}, weekly deduction {}",
        updated.account.employee_id, updated.account.balance, updated.account.weekly_deduction_amount
    );

    // Test 4: Payroll receipt with automatic deduction
    println!("\n🔍 Creating a payroll receipt...");
    let created = client
        .post(format!("{}/api/payroll", base_url))
        .json(&json!({
            "employeeId": employee_id,
            "period": "2024-06",
            "paymentDate": "2024-06-30",
            "advanceRequested": true,
            "advanceAmount": 1500,
            "netAmount": 30200
        }))
        .send()
        .await?
        .json::<ReceiptEnvelope>()
        .await?;
    println!(
        "Receipt {} for {}: net {} after account deduction {}",
        created.receipt.id,
        created.receipt.period,
        created.receipt.net_amount,
        created.receipt.account_deduction_applied
    );

    // Test 5: Weekly breakdown
    println!("\n🔍 Fetching the weekly breakdown...");
    let schedule = client
        .get(format!(
            "{}/api/payroll/employee/{}/weekly?period=2024-06&weeks=4",
            base_url, employee_id
        ))
        .send()
        .await?
        .json::<WeeklySchedule>()
        .await?;
    println!(
        "Period {}: weekly base {}, advance applied {}, weeks {:?}, total {}",
        schedule.period,
        schedule.weekly_base,
        schedule.applied_advance,
        schedule.weeks,
        schedule.total_after_advance
    );

    // Test 6: Transaction history
    println!("\n🔍 Fetching transaction history...");
    let history = client
        .get(format!("{}/api/account/employee/{}", base_url, employee_id))
        .send()
        .await?
        .json::<Value>()
        .await?;
    let count = history["transactions"].as_array().map(|t| t.len()).unwrap_or(0);
    println!("{} transactions on record", count);

    // Cleanup: remove the receipt created above
    let deleted = client
        .delete(format!("{}/api/payroll/{}", base_url, created.receipt.id))
        .send()
        .await?;
    println!("\n🧹 Deleted smoke test receipt: {}", deleted.status());

    println!("\n✅ Smoke test finished");
    Ok(())
}
