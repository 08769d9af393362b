//! Checkpoint API integration tests.

mod common;

use common::{d, money, spawn_app};
use serde_json::{json, Value};

#[tokio::test]
async fn first_checkpoint_on_empty_account_books_full_adjustment() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    let res = app
        .post(
            &format!("/accounts/{}/checkpoints", account),
            json!({ "checkpoint_date": "2025-01-31", "declared_balance": "1000000" }),
        )
        .await;
    assert_eq!(res.status(), 201);
    let body: Value = res.json().await.unwrap();

    let checkpoint = &body["checkpoint"];
    assert_eq!(body["created"], true);
    assert_eq!(checkpoint["checkpoint_date"], "2025-01-31");
    assert_eq!(money(&checkpoint["declared_balance"]), d("1000000"));
    assert_eq!(money(&checkpoint["calculated_balance"]), d("0"));
    assert_eq!(money(&checkpoint["adjustment_amount"]), d("1000000"));
    assert_eq!(checkpoint["is_reconciled"], false);

    let adjustment = &body["adjustment_transaction"];
    assert_eq!(adjustment["direction"], "credit");
    assert_eq!(money(&adjustment["amount"]), d("1000000"));
    assert_eq!(adjustment["transaction_date"], "2025-01-31");
    assert_eq!(adjustment["is_balance_adjustment"], true);
    assert_eq!(adjustment["checkpoint_id"], checkpoint["checkpoint_id"]);

    assert_eq!(app.adjustment_rows(account).await.len(), 1);
}

#[tokio::test]
async fn explaining_transaction_reconciles_and_retires_adjustment() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    app.save_checkpoint(account, "2025-01-31", "1000000").await;

    let written = app
        .create_transaction(account, "2025-01-15", "1000000", "credit")
        .await;
    let cascade = written["cascade"].as_array().unwrap();
    assert_eq!(cascade.len(), 1);
    assert_eq!(cascade[0]["adjustment_transaction_updated"], true);

    let res = app
        .post(
            &format!("/accounts/{}/checkpoints/recalculate", account),
            json!({}),
        )
        .await;
    assert_eq!(res.status(), 200);
    let report: Value = res.json().await.unwrap();
    let after = &report["checkpoints"][0]["after"];
    assert_eq!(money(&after["calculated_balance"]), d("1000000"));
    assert_eq!(money(&after["adjustment_amount"]), d("0"));
    assert_eq!(after["is_reconciled"], true);

    let checkpoints = app.checkpoints(account).await;
    assert_eq!(checkpoints[0]["is_reconciled"], true);
    assert!(app.adjustment_rows(account).await.is_empty());
}

#[tokio::test]
async fn later_checkpoint_builds_on_earlier_adjustment() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    app.save_checkpoint(account, "2025-01-31", "1000000").await;
    let feb = app.save_checkpoint(account, "2025-02-28", "1500000").await;

    let checkpoint = &feb["checkpoint"];
    assert_eq!(money(&checkpoint["calculated_balance"]), d("1000000"));
    assert_eq!(money(&checkpoint["adjustment_amount"]), d("500000"));
    assert_eq!(money(&feb["adjustment_transaction"]["amount"]), d("500000"));
}

#[tokio::test]
async fn inserting_earlier_checkpoint_cascades_forward() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    app.save_checkpoint(account, "2025-02-28", "1500000").await;
    app.save_checkpoint(account, "2025-01-31", "1000000").await;

    let checkpoints = app.checkpoints(account).await;
    assert_eq!(checkpoints.len(), 2);
    assert_eq!(money(&checkpoints[1]["calculated_balance"]), d("1000000"));
    assert_eq!(money(&checkpoints[1]["adjustment_amount"]), d("500000"));

    for cp in &checkpoints {
        assert_eq!(
            money(&cp["declared_balance"]),
            money(&cp["calculated_balance"]) + money(&cp["adjustment_amount"])
        );
    }
}

#[tokio::test]
async fn same_date_updates_existing_checkpoint() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    let first = app.save_checkpoint(account, "2025-01-31", "100").await;

    let res = app
        .post(
            &format!("/accounts/{}/checkpoints", account),
            json!({ "checkpoint_date": "2025-01-31T18:30:00+07:00", "declared_balance": 250.5 }),
        )
        .await;
    assert_eq!(res.status(), 200);
    let second: Value = res.json().await.unwrap();

    assert_eq!(second["created"], false);
    assert_eq!(
        second["checkpoint"]["checkpoint_id"],
        first["checkpoint"]["checkpoint_id"]
    );
    assert_eq!(money(&second["checkpoint"]["adjustment_amount"]), d("250.50"));

    assert_eq!(app.checkpoints(account).await.len(), 1);
    let adjustments = app.adjustment_rows(account).await;
    assert_eq!(adjustments.len(), 1);
    assert_eq!(money(&adjustments[0]["amount"]), d("250.50"));
}

#[tokio::test]
async fn same_day_transactions_are_inside_the_checkpoint() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    app.create_transaction(account, "2025-01-31", "40", "credit")
        .await;
    app.create_transaction(account, "2025-02-01", "15", "debit")
        .await;
    let body = app.save_checkpoint(account, "2025-01-31", "40").await;

    assert_eq!(money(&body["checkpoint"]["calculated_balance"]), d("40"));
    assert_eq!(body["checkpoint"]["is_reconciled"], true);
    assert!(body["adjustment_transaction"].is_null());
}

#[tokio::test]
async fn shortfall_is_booked_as_debit() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    app.create_transaction(account, "2025-01-10", "500", "credit")
        .await;

    let body = app.save_checkpoint(account, "2025-01-31", "420.25").await;

    assert_eq!(money(&body["checkpoint"]["adjustment_amount"]), d("-79.75"));
    assert_eq!(body["adjustment_transaction"]["direction"], "debit");
    assert_eq!(money(&body["adjustment_transaction"]["amount"]), d("79.75"));
}

#[tokio::test]
async fn deleting_checkpoint_removes_its_adjustment_and_shifts_the_next() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;

    let jan = app.save_checkpoint(account, "2025-01-31", "1000000").await;
    app.save_checkpoint(account, "2025-02-28", "1500000").await;
    app.save_checkpoint(account, "2025-03-31", "1500000").await;

    let before = app.checkpoints(account).await;
    let feb_before = money(&before[1]["calculated_balance"]);
    let mar_before = money(&before[2]["calculated_balance"]);

    let jan_id = jan["checkpoint"]["checkpoint_id"].as_str().unwrap();
    let res = app.delete(&format!("/checkpoints/{}", jan_id)).await;
    assert_eq!(res.status(), 200);
    let deleted: Value = res.json().await.unwrap();
    assert_eq!(money(&deleted["removed_adjustment"]), d("1000000"));
    assert_eq!(deleted["adjustment_transaction_deleted"], true);

    let after = app.checkpoints(account).await;
    assert_eq!(after.len(), 2);
    assert_eq!(
        money(&after[0]["calculated_balance"]),
        feb_before - d("1000000")
    );
    assert_eq!(money(&after[0]["adjustment_amount"]), d("1500000"));
    assert_eq!(money(&after[1]["calculated_balance"]), mar_before);

    let remaining = app.adjustment_rows(account).await;
    assert_eq!(remaining.len(), 1);
    assert!(remaining.iter().all(|t| t["checkpoint_id"] != jan_id));

    let res = app.get(&format!("/checkpoints/{}", jan_id)).await;
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn list_pages_by_checkpoint_date() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    for date in ["2025-01-31", "2025-02-28", "2025-03-31"] {
        app.save_checkpoint(account, date, "10").await;
    }

    let res = app
        .get(&format!(
            "/accounts/{}/checkpoints?order=asc&page_size=2",
            account
        ))
        .await;
    let page: Value = res.json().await.unwrap();
    assert_eq!(page["checkpoints"].as_array().unwrap().len(), 2);
    assert_eq!(page["next_page_token"], "2025-02-28");

    let res = app
        .get(&format!(
            "/accounts/{}/checkpoints?order=asc&page_size=2&page_token=2025-02-28",
            account
        ))
        .await;
    let page: Value = res.json().await.unwrap();
    let rest = page["checkpoints"].as_array().unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0]["checkpoint_date"], "2025-03-31");
    assert!(page["next_page_token"].is_null());

    let res = app
        .get(&format!("/accounts/{}/checkpoints", account))
        .await;
    let page: Value = res.json().await.unwrap();
    assert_eq!(page["checkpoints"][0]["checkpoint_date"], "2025-03-31");
}

#[tokio::test]
async fn list_can_hide_reconciled_checkpoints() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    app.save_checkpoint(account, "2025-01-31", "0").await;
    app.save_checkpoint(account, "2025-02-28", "75").await;

    let res = app
        .get(&format!(
            "/accounts/{}/checkpoints?include_reconciled=false",
            account
        ))
        .await;
    let page: Value = res.json().await.unwrap();
    let listed = page["checkpoints"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["checkpoint_date"], "2025-02-28");
}

#[tokio::test]
async fn summary_aggregates_outstanding_adjustments() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    app.create_transaction(account, "2025-01-05", "100", "credit")
        .await;
    app.save_checkpoint(account, "2025-01-31", "100").await;
    app.save_checkpoint(account, "2025-02-28", "80").await;
    app.save_checkpoint(account, "2025-03-31", "130").await;

    let res = app
        .get(&format!("/accounts/{}/checkpoints/summary", account))
        .await;
    assert_eq!(res.status(), 200);
    let summary: Value = res.json().await.unwrap();

    assert_eq!(summary["total_checkpoints"], 3);
    assert_eq!(summary["reconciled_count"], 1);
    assert_eq!(summary["unreconciled_count"], 2);
    assert_eq!(money(&summary["outstanding_adjustment_total"]), d("30"));
    assert_eq!(money(&summary["outstanding_adjustment_absolute"]), d("70"));
    assert_eq!(summary["earliest_checkpoint_date"], "2025-01-31");
    assert_eq!(summary["latest_checkpoint_date"], "2025-03-31");
    assert_eq!(money(&summary["latest_declared_balance"]), d("130"));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_write() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    let path = format!("/accounts/{}/checkpoints", account);

    for body in [
        json!({ "checkpoint_date": "31/01/2025", "declared_balance": "10" }),
        json!({ "checkpoint_date": "", "declared_balance": "10" }),
        json!({ "checkpoint_date": "2025-01-31", "declared_balance": "ten" }),
        json!({ "checkpoint_date": "2025-01-31", "declared_balance": "10.005" }),
        json!({ "checkpoint_date": "2025-01-31" }),
    ] {
        let res = app.post(&path, body.clone()).await;
        assert_eq!(res.status(), 400, "body {}", body);
    }

    assert!(app.checkpoints(account).await.is_empty());
}

#[tokio::test]
async fn unknown_account_and_checkpoint_are_not_found() {
    let app = spawn_app().await;
    let missing = uuid::Uuid::new_v4();

    let res = app
        .post(
            &format!("/accounts/{}/checkpoints", missing),
            json!({ "checkpoint_date": "2025-01-31", "declared_balance": "10" }),
        )
        .await;
    assert_eq!(res.status(), 404);

    let res = app.delete(&format!("/checkpoints/{}", missing)).await;
    assert_eq!(res.status(), 404);

    let res = app
        .get(&format!("/accounts/{}/checkpoints/summary", missing))
        .await;
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let app = spawn_app().await;
    let account = app.create_account("Operating").await;
    let body = app.save_checkpoint(account, "2025-01-31", "10").await;
    let checkpoint_id = body["checkpoint"]["checkpoint_id"].as_str().unwrap();

    let res = app
        .client
        .get(app.url(&format!("/checkpoints/{}", checkpoint_id)))
        .header("x-tenant-id", uuid::Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn missing_tenant_header_is_unauthorized() {
    let app = spawn_app().await;

    let res = app
        .client
        .get(app.url("/accounts"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["retryable"], false);
}
