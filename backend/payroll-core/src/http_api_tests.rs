// src/http_api_tests.rs

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::runtime::Runtime;
    use tower::ServiceExt;

    use crate::account_ledger::{AccountTransaction, TransactionKind};
    use crate::build_state;
    use crate::clock::FixedClock;
    use crate::employee_directory::{Employee, RosterDirectory};
    use crate::http_api::{build_router, parse_decimal, parse_flag, transactions_to_csv};
    use crate::ledger_store::MemoryStore;

    fn create_test_app() -> Router {
        let store = Arc::new(MemoryStore::new());
        let directory = RosterDirectory::from_employees(vec![Employee {
            id: "E1".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Pérez".to_string(),
            file_number: Some("L-001".to_string()),
        }])
        .unwrap();
        let state = build_state(
            store.clone(),
            store,
            Arc::new(directory),
            Arc::new(FixedClock::new("2024-06-28 10:00:00")),
        );
        build_router(state)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = send_raw(app, method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn send_raw(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[test]
    fn lenient_amount_parsing() {
        assert_eq!(parse_decimal(&json!(12.5)), Some(dec!(12.5)));
        assert_eq!(parse_decimal(&json!("300")), Some(dec!(300)));
        assert_eq!(parse_decimal(&json!(" 42.10 ")), Some(dec!(42.10)));
        assert_eq!(parse_decimal(&json!("abc")), None);
        assert_eq!(parse_decimal(&json!("")), None);
        assert_eq!(parse_decimal(&json!(null)), None);
        assert_eq!(parse_decimal(&json!(true)), None);
    }

    #[test]
    fn lenient_flag_parsing() {
        assert!(parse_flag(&json!(true)));
        assert!(parse_flag(&json!("true")));
        assert!(!parse_flag(&json!("yes")));
        assert!(!parse_flag(&json!(1)));
        assert!(!parse_flag(&json!(false)));
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let at = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 6, 1, 0, 0, 0).unwrap();
        let tx = AccountTransaction::new(
            "E1",
            TransactionKind::Purchase,
            dec!(120.50),
            Some("Groceries, store".to_string()),
            at,
            at,
        );

        let csv = transactions_to_csv(&[tx.clone()]).unwrap();
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines[0], "id,date,type,amount,description");
        assert_eq!(
            lines[1],
            format!("{},2024-06-01T00:00:00+00:00,purchase,120.50,\"Groceries, store\"", tx.id)
        );
    }

    #[tokio::test]
    async fn health_and_ping() {
        let app = create_test_app();

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, Method::GET, "/api/account/_ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "scope": "account" }));
    }

    #[tokio::test]
    async fn purchase_then_account_view() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/account/purchase",
            Some(json!({ "employeeId": "E1", "amount": "500", "description": "Store credit" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["account"]["balance"], "500");
        assert_eq!(body["transaction"]["type"], "purchase");

        let (status, body) = send(&app, Method::GET, "/api/account/employee/E1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account"]["employeeId"], "E1");
        assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_amount_is_a_bad_request() {
        let app = create_test_app();

        for amount in [json!(0), json!(-10), json!("abc"), Value::Null] {
            let (status, body) = send(
                &app,
                Method::POST,
                "/api/account/payment",
                Some(json!({ "employeeId": "E1", "amount": amount })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["msg"], "Invalid amount");
        }
    }

    #[tokio::test]
    async fn unknown_employee_is_not_found() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/account/purchase",
            Some(json!({ "employeeId": "ghost", "amount": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["msg"], "Employee not found");

        let (status, _) = send(&app, Method::GET, "/api/account/employee/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_numeric_weekly_deduction_becomes_zero() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/account/employee/E1/weekly-deduction",
            Some(json!({ "weeklyDeductionAmount": "lots" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account"]["weeklyDeductionAmount"], "0");
    }

    #[tokio::test]
    async fn transactions_csv_download() {
        let app = create_test_app();
        send(
            &app,
            Method::POST,
            "/api/account/purchase",
            Some(json!({ "employeeId": "E1", "amount": 25, "date": "2024-06-01" })),
        )
        .await;

        let (status, bytes) = send_raw(&app, Method::GET, "/api/account/employee/E1/transactions.csv", None).await;
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(text.starts_with("id,date,type,amount,description"));
        assert!(text.contains("purchase,25"));
    }

    #[test]
    fn payroll_flow_end_to_end() {
        let rt = Runtime::new().unwrap();
        let app = create_test_app();

        rt.block_on(async {
            send(
                &app,
                Method::POST,
                "/api/account/purchase",
                Some(json!({ "employeeId": "E1", "amount": 500 })),
            )
            .await;
            send(
                &app,
                Method::PUT,
                "/api/account/employee/E1/weekly-deduction",
                Some(json!({ "weeklyDeductionAmount": 200 })),
            )
            .await;

            let (status, body) = send(
                &app,
                Method::POST,
                "/api/payroll",
                Some(json!({
                    "employeeId": "E1",
                    "period": "2024-06",
                    "paymentDate": "2024-06-30",
                    "signed": "true",
                    "advanceRequested": true,
                    "advanceAmount": "5000",
                    "netAmount": 7200
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["receipt"]["accountDeductionApplied"], "200");
            assert_eq!(body["receipt"]["netAmount"], "7000");
            assert_eq!(body["receipt"]["signed"], true);
            let id = body["receipt"]["id"].as_str().unwrap().to_string();

            let (status, body) = send(
                &app,
                Method::GET,
                "/api/payroll/employee/E1/weekly?period=2024-06&weeks=4",
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["weeksCount"], 4);
            assert_eq!(body["daysInMonth"], 30);
            assert_eq!(body["weeklyBase"], "1633.33");
            assert_eq!(body["appliedAdvance"], "1633.33");
            assert_eq!(body["totalAfterAdvance"], "4899.99");
            assert_eq!(body["accountDeductionApplied"], "200");
            assert_eq!(body["employee"]["firstName"], "Ana");

            let (status, body) = send(
                &app,
                Method::PUT,
                &format!("/api/payroll/{}", id),
                Some(json!({ "signed": false, "netAmount": "6500" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["receipt"]["netAmount"], "6500");
            assert_eq!(body["receipt"]["signedDate"], Value::Null);

            let (status, body) = send(&app, Method::GET, "/api/payroll", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body.as_array().unwrap().len(), 1);

            let (status, _) = send(&app, Method::DELETE, &format!("/api/payroll/{}", id), None).await;
            assert_eq!(status, StatusCode::OK);

            let (status, body) = send(&app, Method::GET, &format!("/api/payroll/{}", id), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["msg"], "Receipt not found");
        });
    }

    #[tokio::test]
    async fn weekly_with_bad_weeks_falls_back_to_default() {
        let app = create_test_app();
        send(
            &app,
            Method::POST,
            "/api/payroll",
            Some(json!({
                "employeeId": "E1",
                "period": "2024-02",
                "paymentDate": "2024-02-29",
                "netAmount": "29000"
            })),
        )
        .await;

        let (status, body) = send(&app, Method::GET, "/api/payroll/employee/E1/weekly?weeks=many", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["weeksCount"], 4);
        assert_eq!(body["weeks"], json!(["7000.00", "7000.00", "7000.00", "7000.00"]));
        assert_eq!(body["totalAfterAdvance"], "28000.00");
    }

    #[tokio::test]
    async fn receipt_without_period_is_a_bad_request() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/payroll",
            Some(json!({ "employeeId": "E1", "paymentDate": "2024-06-30", "netAmount": 100 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Missing required field: period");
    }

    #[tokio::test]
    async fn purchase_overflowing_the_balance_is_rejected() {
        let app = create_test_app();
        let largest = Decimal::MAX.to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/account/purchase",
            Some(json!({ "employeeId": "E1", "amount": largest })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/account/purchase",
            Some(json!({ "employeeId": "E1", "amount": largest })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Amount out of range");

        let (_, body) = send(&app, Method::GET, "/api/account/employee/E1", None).await;
        assert_eq!(body["account"]["balance"], largest);
        assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
    }
}
