//! Ledger transaction and transfer integration tests.

mod common;

use common::{d, money, spawn_app};
use serde_json::{json, Value};

#[tokio::test]
async fn creating_account_normalises_input() {
    let app = spawn_app().await;

    let res = app
        .post("/accounts", json!({ "name": "  Payroll  ", "currency": "usd" }))
        .await;
    assert_eq!(res.status(), 201);
    let account: Value = res.json().await.unwrap();
    assert_eq!(account["name"], "Payroll");
    assert_eq!(account["currency"], "USD");

    let res = app.get("/accounts").await;
    let accounts: Vec<Value> = res.json().await.unwrap();
    assert_eq!(accounts.len(), 1);

    let res = app
        .post("/accounts", json!({ "name": "Bad", "currency": "EURO" }))
        .await;
    assert_eq!(res.status(), 422);
}

#[tokio::test]
async fn transaction_writes_cascade_into_checkpoints() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    app.save_checkpoint(account, "2025-01-31", "100").await;
    app.save_checkpoint(account, "2025-02-28", "100").await;

    let written = app
        .create_transaction(account, "2025-01-10", "100", "credit")
        .await;
    assert_eq!(written["cascade"].as_array().unwrap().len(), 2);
    let checkpoints = app.checkpoints(account).await;
    assert!(checkpoints.iter().all(|c| c["is_reconciled"] == true));
    assert!(app.adjustment_rows(account).await.is_empty());

    let transaction_id = written["transaction"]["transaction_id"]
        .as_str()
        .unwrap()
        .to_string();

    let res = app
        .patch(
            &format!("/transactions/{}", transaction_id),
            json!({ "transaction_date": "2025-02-10" }),
        )
        .await;
    assert_eq!(res.status(), 200);
    let checkpoints = app.checkpoints(account).await;
    assert_eq!(money(&checkpoints[0]["adjustment_amount"]), d("100"));
    // The January adjustment now carries February too.
    assert_eq!(money(&checkpoints[1]["calculated_balance"]), d("200"));
    assert_eq!(money(&checkpoints[1]["adjustment_amount"]), d("-100"));

    let res = app
        .delete(&format!("/transactions/{}", transaction_id))
        .await;
    assert_eq!(res.status(), 200);
    let checkpoints = app.checkpoints(account).await;
    assert_eq!(money(&checkpoints[0]["adjustment_amount"]), d("100"));
    assert_eq!(money(&checkpoints[1]["calculated_balance"]), d("100"));
    assert_eq!(checkpoints[1]["is_reconciled"], true);

    let res = app.get(&format!("/transactions/{}", transaction_id)).await;
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn empty_patch_is_rejected() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    let written = app
        .create_transaction(account, "2025-01-10", "5", "debit")
        .await;
    let id = written["transaction"]["transaction_id"].as_str().unwrap();

    let res = app.patch(&format!("/transactions/{}", id), json!({})).await;
    assert_eq!(res.status(), 400);

    let res = app
        .patch(&format!("/transactions/{}", id), json!({ "amount": "-1" }))
        .await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn adjustment_rows_cannot_be_edited_directly() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    let body = app.save_checkpoint(account, "2025-01-31", "100").await;
    let adjustment_id = body["adjustment_transaction"]["transaction_id"]
        .as_str()
        .unwrap()
        .to_string();

    let res = app
        .patch(
            &format!("/transactions/{}", adjustment_id),
            json!({ "amount": "1" }),
        )
        .await;
    assert_eq!(res.status(), 409);

    let res = app
        .delete(&format!("/transactions/{}", adjustment_id))
        .await;
    assert_eq!(res.status(), 409);

    assert_eq!(app.adjustment_rows(account).await.len(), 1);
}

#[tokio::test]
async fn list_filters_by_date_and_kind() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    app.create_transaction(account, "2025-01-05", "10", "credit")
        .await;
    app.create_transaction(account, "2025-01-20", "3", "debit")
        .await;
    app.save_checkpoint(account, "2025-01-31", "100").await;

    let all = app.transactions(account).await;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["transaction_date"], "2025-01-05");

    let res = app
        .get(&format!(
            "/accounts/{}/transactions?include_adjustments=false&from=2025-01-10",
            account
        ))
        .await;
    let filtered: Vec<Value> = res.json().await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["transaction_date"], "2025-01-20");
}

#[tokio::test]
async fn transfer_legs_are_validated() {
    let app = spawn_app().await;
    let operating = app.create_account("Operating").await;
    let savings = app.create_account("Savings").await;

    let out = app
        .create_transaction(operating, "2025-01-10", "250", "debit")
        .await;
    let same_account = app
        .create_transaction(operating, "2025-01-10", "250", "credit")
        .await;
    let wrong_amount = app
        .create_transaction(savings, "2025-01-10", "200", "credit")
        .await;
    let same_direction = app
        .create_transaction(savings, "2025-01-10", "250", "debit")
        .await;
    let good = app
        .create_transaction(savings, "2025-01-10", "250", "credit")
        .await;

    let id = |v: &Value| v["transaction"]["transaction_id"].clone();
    let pair = |a: &Value, b: &Value| {
        json!({ "transaction_id": id(a), "counterpart_transaction_id": id(b) })
    };

    for counterpart in [&out, &same_account, &wrong_amount, &same_direction] {
        let res = app.post("/transfers", pair(&out, counterpart)).await;
        assert_eq!(res.status(), 400);
    }

    let res = app.post("/transfers", pair(&out, &good)).await;
    assert_eq!(res.status(), 201);
    let matched: Value = res.json().await.unwrap();
    let match_id = matched["transfer_match_id"].clone();
    assert!(!match_id.is_null());
    assert_eq!(matched["transactions"].as_array().unwrap().len(), 2);

    // Already matched.
    let res = app.post("/transfers", pair(&same_account, &good)).await;
    assert_eq!(res.status(), 409);

    // Matched rows are pinned until unmatched.
    let out_id = id(&out);
    let res = app
        .delete(&format!("/transactions/{}", out_id.as_str().unwrap()))
        .await;
    assert_eq!(res.status(), 409);

    let res = app
        .delete(&format!("/transfers/{}", out_id.as_str().unwrap()))
        .await;
    assert_eq!(res.status(), 200);
    let unmatched: Value = res.json().await.unwrap();
    assert!(unmatched["transfer_match_id"].is_null());
    assert!(unmatched["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["transfer_match_id"].is_null()));

    let res = app
        .delete(&format!("/transfers/{}", out_id.as_str().unwrap()))
        .await;
    assert_eq!(res.status(), 400);

    let res = app
        .delete(&format!("/transactions/{}", out_id.as_str().unwrap()))
        .await;
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn matched_legs_keep_amount_and_direction() {
    let app = spawn_app().await;
    let operating = app.create_account("Operating").await;
    let savings = app.create_account("Savings").await;

    let out = app
        .create_transaction(operating, "2025-01-10", "50", "debit")
        .await;
    let incoming = app
        .create_transaction(savings, "2025-01-10", "50", "credit")
        .await;
    let out_id = out["transaction"]["transaction_id"].as_str().unwrap().to_string();
    let res = app
        .post(
            "/transfers",
            json!({
                "transaction_id": out_id,
                "counterpart_transaction_id": incoming["transaction"]["transaction_id"]
            }),
        )
        .await;
    assert_eq!(res.status(), 201);

    let path = format!("/transactions/{}", out_id);
    for body in [
        json!({ "amount": "75", "direction": "credit" }),
        json!({ "amount": "75" }),
        json!({ "direction": "credit" }),
    ] {
        let res = app.patch(&path, body.clone()).await;
        assert_eq!(res.status(), 409, "body {}", body);
    }

    let res = app
        .patch(&path, json!({ "description": "To savings", "amount": "50" }))
        .await;
    assert_eq!(res.status(), 200);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["transaction"]["description"], "To savings");
    assert_eq!(money(&updated["transaction"]["amount"]), d("50"));
    assert_eq!(updated["transaction"]["direction"], "debit");
    assert!(!updated["transaction"]["transfer_match_id"].is_null());
}

#[tokio::test]
async fn oversized_amounts_are_rejected() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    let res = app
        .post(
            &format!("/accounts/{}/transactions", account),
            json!({
                "transaction_date": "2025-01-10",
                "amount": "9999999999999999999999999999",
                "direction": "credit"
            }),
        )
        .await;
    assert_eq!(res.status(), 400);

    let res = app
        .post(
            &format!("/accounts/{}/checkpoints", account),
            json!({ "checkpoint_date": "2025-01-31", "declared_balance": "-1000000000000000000" }),
        )
        .await;
    assert_eq!(res.status(), 400);

    assert!(app.transactions(account).await.is_empty());
    assert!(app.checkpoints(account).await.is_empty());
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let app = spawn_app().await;

    let res = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");

    let res = app.client.get(app.url("/ready")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    app.create_account("Operating").await;
    let res = app.client.get(app.url("/metrics")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let text = res.text().await.unwrap();
    assert!(text.contains("reconciliation_http_requests_total"));
}
