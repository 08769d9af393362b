//! Common test utilities for reconciliation-service integration tests.

#![allow(dead_code)]

use reconciliation_service::config::{
    DatabaseConfig, EngineConfig, ReconciliationConfig, StorageBackend,
};
use reconciliation_service::services::{LedgerStore, MemoryStore};
use reconciliation_service::startup::Application;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use service_core::middleware::TENANT_ID_HEADER;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,reconciliation_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config(storage: StorageBackend, database_url: String) -> ReconciliationConfig {
    ReconciliationConfig {
        common: CommonConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        service_name: "reconciliation-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        storage,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 2,
            min_connections: 1,
            run_migrations: true,
        },
        reconciliation: EngineConfig {
            // Small chunks so rollbacks exercise the chunk loop.
            rollback_chunk_size: 2,
        },
    }
}

/// Test application wrapper.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub tenant_id: Uuid,
    pub http_port: u16,
}

/// Spawn the application on a free port over a fresh in-memory store.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    let app = Application::build_with_store(
        test_config(StorageBackend::Memory, String::new()),
        store,
    )
    .await
    .expect("Failed to build application");

    let http_port = app.http_port();
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", http_port),
        client: reqwest::Client::new(),
        tenant_id: Uuid::new_v4(),
        http_port,
    }
}

/// Parse a money field serialised as a decimal string.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("decimal number"),
    }
}

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).expect("decimal literal")
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header(TENANT_ID_HEADER, self.tenant_id.to_string())
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(TENANT_ID_HEADER, self.tenant_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn patch(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .header(TENANT_ID_HEADER, self.tenant_id.to_string())
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .header(TENANT_ID_HEADER, self.tenant_id.to_string())
            .send()
            .await
            .expect("request failed")
    }

    pub async fn create_account(&self, name: &str) -> Uuid {
        let res = self
            .post("/accounts", json!({ "name": name, "currency": "VND" }))
            .await;
        assert_eq!(res.status(), 201);
        let body: Value = res.json().await.unwrap();
        Uuid::parse_str(body["account_id"].as_str().unwrap()).unwrap()
    }

    /// POST a checkpoint and return the full outcome body.
    pub async fn save_checkpoint(&self, account_id: Uuid, date: &str, declared: &str) -> Value {
        let res = self
            .post(
                &format!("/accounts/{}/checkpoints", account_id),
                json!({ "checkpoint_date": date, "declared_balance": declared }),
            )
            .await;
        assert!(res.status().is_success(), "status {}", res.status());
        res.json().await.unwrap()
    }

    pub async fn create_transaction(
        &self,
        account_id: Uuid,
        date: &str,
        amount: &str,
        direction: &str,
    ) -> Value {
        let res = self
            .post(
                &format!("/accounts/{}/transactions", account_id),
                json!({
                    "transaction_date": date,
                    "description": "manual entry",
                    "amount": amount,
                    "direction": direction
                }),
            )
            .await;
        assert_eq!(res.status(), 201);
        res.json().await.unwrap()
    }

    /// All checkpoints of an account, oldest first.
    pub async fn checkpoints(&self, account_id: Uuid) -> Vec<Value> {
        let res = self
            .get(&format!(
                "/accounts/{}/checkpoints?order=asc&page_size=100",
                account_id
            ))
            .await;
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        body["checkpoints"].as_array().unwrap().clone()
    }

    pub async fn transactions(&self, account_id: Uuid) -> Vec<Value> {
        let res = self
            .get(&format!("/accounts/{}/transactions", account_id))
            .await;
        assert_eq!(res.status(), 200);
        res.json().await.unwrap()
    }

    pub async fn adjustment_rows(&self, account_id: Uuid) -> Vec<Value> {
        self.transactions(account_id)
            .await
            .into_iter()
            .filter(|t| t["is_balance_adjustment"] == true)
            .collect()
    }
}
