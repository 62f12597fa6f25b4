// src/payroll_tests.rs

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    use crate::account_ledger::{AccountLedger, TransactionKind};
    use crate::clock::{Clock, FixedClock};
    use crate::employee_directory::{Employee, RosterDirectory};
    use crate::ledger_store::{FailingStore, MemoryStore};
    use crate::payroll::{NewReceipt, PayrollError, PayrollService, ReceiptPatch};

    struct Harness {
        service: PayrollService,
        ledger: Arc<AccountLedger>,
        clock: FixedClock,
    }

    fn roster() -> Arc<RosterDirectory> {
        Arc::new(
            RosterDirectory::from_employees(vec![Employee {
                id: "E1".to_string(),
                first_name: "Ana".to_string(),
                last_name: "Pérez".to_string(),
                file_number: Some("L-001".to_string()),
            }])
            .unwrap(),
        )
    }

    fn create_harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = FixedClock::new("2024-06-28 10:00:00");
        let ledger = Arc::new(AccountLedger::new(store.clone(), Arc::new(clock.clone())));
        let service = PayrollService::new(ledger.clone(), store, roster(), Arc::new(clock.clone()));
        Harness {
            service,
            ledger,
            clock,
        }
    }

    fn receipt_input(period: &str, day: u32) -> NewReceipt {
        NewReceipt {
            employee_id: "E1".to_string(),
            period: period.to_string(),
            payment_date: Some(Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()),
            net_amount: dec!(7000),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creating_a_receipt_applies_the_account_deduction() {
        let h = create_harness();
        h.ledger.record_purchase("E1", dec!(500), None, None).await.unwrap();
        h.ledger.set_weekly_deduction_amount("E1", dec!(200)).await.unwrap();

        let receipt = h.service.create_receipt(receipt_input("2024-06", 30)).await.unwrap();

        assert_eq!(receipt.account_deduction_applied, dec!(200));
        assert_eq!(receipt.net_amount, dec!(6800));
        assert_eq!(h.ledger.get_or_create("E1").await.unwrap().balance, dec!(300));
        assert_eq!(receipt.created_at, h.clock.now());
    }

    #[tokio::test]
    async fn ledger_outage_does_not_block_the_receipt() {
        let receipts = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new("2024-06-28 10:00:00"));
        let ledger = Arc::new(AccountLedger::new(Arc::new(FailingStore), clock.clone()));
        let service = PayrollService::new(ledger, receipts, roster(), clock);

        let receipt = service.create_receipt(receipt_input("2024-06", 30)).await.unwrap();

        assert_eq!(receipt.account_deduction_applied, dec!(0));
        assert_eq!(receipt.net_amount, dec!(7000));
    }

    #[tokio::test]
    async fn unknown_employee_is_rejected() {
        let h = create_harness();
        let mut input = receipt_input("2024-06", 30);
        input.employee_id = "ghost".to_string();

        let result = h.service.create_receipt(input).await;

        assert!(matches!(result, Err(PayrollError::EmployeeNotFound(id)) if id == "ghost"));
        assert!(h.service.list_receipts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn signed_and_advance_dates_follow_their_flags() {
        let h = create_harness();
        let stamp = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        let mut input = receipt_input("2024-06", 30);
        input.signed = false;
        input.signed_date = Some(stamp);
        input.advance_requested = true;
        input.advance_date = Some(stamp);
        input.advance_amount = dec!(1500);

        let receipt = h.service.create_receipt(input).await.unwrap();

        assert!(receipt.signed_date.is_none());
        assert_eq!(receipt.advance_date, Some(stamp));
        assert_eq!(receipt.advance_amount, dec!(1500));
    }

    #[tokio::test]
    async fn receipts_are_listed_latest_payment_first() {
        let h = create_harness();
        h.service.create_receipt(receipt_input("2024-04", 5)).await.unwrap();
        h.service.create_receipt(receipt_input("2024-06", 25)).await.unwrap();
        h.service.create_receipt(receipt_input("2024-05", 15)).await.unwrap();

        let periods: Vec<_> = h
            .service
            .receipts_for_employee("E1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.period)
            .collect();

        assert_eq!(periods, vec!["2024-06", "2024-05", "2024-04"]);
        assert_eq!(h.service.list_receipts().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn update_replaces_net_without_touching_the_ledger() {
        let h = create_harness();
        h.ledger.record_purchase("E1", dec!(500), None, None).await.unwrap();
        h.ledger.set_weekly_deduction_amount("E1", dec!(200)).await.unwrap();
        let receipt = h.service.create_receipt(receipt_input("2024-06", 30)).await.unwrap();

        h.clock.advance(Duration::hours(1));
        let updated = h
            .service
            .update_receipt(
                &receipt.id,
                ReceiptPatch {
                    net_amount: Some(dec!(9000)),
                    has_presentismo: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.net_amount, dec!(9000));
        assert!(updated.has_presentismo);
        assert_eq!(updated.account_deduction_applied, dec!(200));
        assert_eq!(updated.period, "2024-06");
        assert!(updated.updated_at > receipt.updated_at);

        let deductions = h
            .ledger
            .get_transaction_history("E1")
            .await
            .unwrap()
            .into_iter()
            .filter(|tx| tx.kind == TransactionKind::PayrollDeduction)
            .count();
        assert_eq!(deductions, 1);
    }

    #[tokio::test]
    async fn unsigning_clears_the_signed_date() {
        let h = create_harness();
        let mut input = receipt_input("2024-06", 30);
        input.signed = true;
        input.signed_date = Some(Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap());
        let receipt = h.service.create_receipt(input).await.unwrap();
        assert!(receipt.signed_date.is_some());

        let updated = h
            .service
            .update_receipt(
                &receipt.id,
                ReceiptPatch {
                    signed: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!updated.signed);
        assert!(updated.signed_date.is_none());
    }

    #[tokio::test]
    async fn deleting_keeps_ledger_history() {
        let h = create_harness();
        h.ledger.record_purchase("E1", dec!(500), None, None).await.unwrap();
        h.ledger.set_weekly_deduction_amount("E1", dec!(200)).await.unwrap();
        let receipt = h.service.create_receipt(receipt_input("2024-06", 30)).await.unwrap();

        h.service.delete_receipt(&receipt.id).await.unwrap();

        assert!(matches!(
            h.service.get_receipt(&receipt.id).await,
            Err(PayrollError::ReceiptNotFound(_))
        ));
        assert!(matches!(
            h.service.delete_receipt(&receipt.id).await,
            Err(PayrollError::ReceiptNotFound(_))
        ));
        assert_eq!(h.ledger.get_or_create("E1").await.unwrap().balance, dec!(300));
    }

    #[tokio::test]
    async fn weekly_breakdown_uses_requested_period() {
        let h = create_harness();
        let mut input = receipt_input("2024-06", 30);
        input.advance_requested = true;
        input.advance_amount = dec!(5000);
        h.service.create_receipt(input).await.unwrap();
        h.service.create_receipt(receipt_input("2024-05", 1)).await.unwrap();

        let schedule = h
            .service
            .weekly_breakdown_for("E1", Some("2024-06"), Some(4))
            .await
            .unwrap();

        assert_eq!(schedule.period, "2024-06");
        assert_eq!(schedule.employee.file_number.as_deref(), Some("L-001"));
        assert_eq!(schedule.breakdown.days_in_month, 30);
        assert_eq!(schedule.breakdown.weekly_base, dec!(1633.33));
        assert_eq!(schedule.breakdown.applied_advance, dec!(1633.33));
        assert_eq!(schedule.breakdown.total_after_advance, dec!(4899.99));
    }

    #[tokio::test]
    async fn weekly_breakdown_defaults_to_latest_receipt() {
        let h = create_harness();
        h.service.create_receipt(receipt_input("2024-04", 2)).await.unwrap();
        h.service.create_receipt(receipt_input("2024-05", 20)).await.unwrap();

        let schedule = h.service.weekly_breakdown_for("E1", None, None).await.unwrap();

        assert_eq!(schedule.period, "2024-05");
        assert_eq!(schedule.breakdown.weeks_count, 4);
        assert_eq!(schedule.breakdown.days_in_month, 31);
    }

    #[tokio::test]
    async fn weekly_breakdown_without_receipt_is_not_found() {
        let h = create_harness();

        let missing_period = h.service.weekly_breakdown_for("E1", Some("2024-01"), None).await;
        assert!(matches!(missing_period, Err(PayrollError::ReceiptNotFound(_))));

        let unknown = h.service.weekly_breakdown_for("ghost", None, None).await;
        assert!(matches!(unknown, Err(PayrollError::EmployeeNotFound(_))));
    }

    #[tokio::test]
    async fn missing_payment_date_is_rejected() {
        let h = create_harness();
        let mut input = receipt_input("2024-06", 30);
        input.payment_date = None;

        let result = h.service.create_receipt(input).await;

        assert!(matches!(result, Err(PayrollError::MissingField("paymentDate"))));
    }
}
