use anyhow::Result;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::payload::{Validate, require_text};

pub const NESSIE_BASE_URL: &str = "http://api.nessieisreal.com";
pub const BUDGET_LIMIT: f64 = 3750.00;
const TOP_CATEGORIES: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Purchase {
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAmount {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendingSummary {
    pub total_spending: f64,
    pub budget_limit: f64,
    pub budget_adherence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_rate: Option<u32>,
    pub top_categories: Vec<CategoryAmount>,
}

impl SpendingSummary {
    /// Figures shown when the banking sandbox has nothing for us.
    pub fn mock() -> Self {
        Self {
            total_spending: 3247.82,
            budget_limit: BUDGET_LIMIT,
            budget_adherence: 87,
            savings_rate: Some(32),
            top_categories: vec![
                CategoryAmount {
                    category: "Housing".into(),
                    amount: 1200.0,
                },
                CategoryAmount {
                    category: "Food".into(),
                    amount: 450.0,
                },
                CategoryAmount {
                    category: "Transport".into(),
                    amount: 280.0,
                },
            ],
        }
    }

    /// Sum purchases per category and keep the three largest.
    pub fn from_purchases<'a>(purchases: impl IntoIterator<Item = &'a Purchase>) -> Self {
        let mut total = 0.0;
        let mut categories: HashMap<String, f64> = HashMap::new();
        for p in purchases {
            total += p.amount;
            let category = p.category.clone().unwrap_or_else(|| "Other".to_string());
            *categories.entry(category).or_default() += p.amount;
        }

        let mut top: Vec<CategoryAmount> = categories
            .into_iter()
            .map(|(category, amount)| CategoryAmount { category, amount })
            .collect();
        top.sort_by(|a, b| {
            b.amount
                .total_cmp(&a.amount)
                .then_with(|| a.category.cmp(&b.category))
        });
        top.truncate(TOP_CATEGORIES);

        Self {
            total_spending: (total * 100.0).round() / 100.0,
            budget_limit: BUDGET_LIMIT,
            budget_adherence: (total / BUDGET_LIMIT * 100.0) as i64,
            savings_rate: None,
            top_categories: top,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseMedium {
    Balance,
    Rewards,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositMedium {
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub merchant_id: String,
    pub medium: PurchaseMedium,
    pub purchase_date: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Validate for NewPurchase {
    const KIND: &'static str = "purchase";

    fn validate(&self) -> Result<(), String> {
        require_text("merchant_id", &self.merchant_id)?;
        require_text("purchase_date", &self.purchase_date)?;
        if self.amount <= 0.0 {
            return Err("amount must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeposit {
    pub medium: DepositMedium,
    pub transaction_date: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Validate for NewDeposit {
    const KIND: &'static str = "deposit";

    fn validate(&self) -> Result<(), String> {
        require_text("transaction_date", &self.transaction_date)?;
        if self.amount < 0.0 {
            return Err("amount must not be negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBill {
    pub status: BillStatus,
    pub payee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub payment_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_date: Option<u8>,
    pub payment_amount: f64,
}

impl Validate for NewBill {
    const KIND: &'static str = "bill";

    fn validate(&self) -> Result<(), String> {
        require_text("payee", &self.payee)?;
        require_text("payment_date", &self.payment_date)?;
        if let Some(day) = self.recurring_date {
            if !(1..=31).contains(&day) {
                return Err("recurring_date must be a day of the month (1-31)".into());
            }
        }
        if self.payment_amount < 0.0 {
            return Err("payment_amount must not be negative".into());
        }
        Ok(())
    }
}

/// Path of a sub-collection of one account. Ids are opaque tokens; anything
/// that could change the upstream path is refused.
pub fn account_path(account_id: &str, rest: &str) -> Result<String, ProxyError> {
    let valid = !account_id.is_empty()
        && account_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ProxyError::InvalidAccountId(account_id.to_string()));
    }
    Ok(format!("/accounts/{account_id}{rest}"))
}

/// Client for the Nessie banking sandbox.
#[derive(Clone)]
pub struct NessieClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl NessieClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Call a Nessie endpoint with the API key attached. Upstream error
    /// statuses come back as [`ProxyError::Upstream`] with the body intact.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ProxyError> {
        let key = self.api_key.as_deref().ok_or(ProxyError::NotConfigured)?;
        debug!("[banking] {} {}", method, path);

        let mut request = self
            .client
            .request(method, format!("{}{}?key={}", self.base_url, path, key));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.into()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::Transport(e.into()))?;
        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            warn!("[banking] Nessie {} for {}", status, path);
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                details: data,
            });
        }
        Ok(data)
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, ProxyError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &impl Serialize) -> Result<Value, ProxyError> {
        let body = serde_json::to_value(body).map_err(|e| ProxyError::Transport(e.into()))?;
        self.request(Method::POST, path, Some(&body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get_json(path).await?)?)
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.get("/accounts").await
    }

    pub async fn purchases(&self, account_id: &str) -> Result<Vec<Purchase>> {
        self.get(&format!("/accounts/{account_id}/purchases")).await
    }

    /// Spending across every account, or the mock summary when the sandbox
    /// returns no accounts. Fetch failures count as empty.
    pub async fn spending_summary(&self) -> SpendingSummary {
        let accounts = self.accounts().await.unwrap_or_else(|e| {
            warn!("[banking] Nessie accounts error: {:#}", e);
            Vec::new()
        });
        if accounts.is_empty() {
            return SpendingSummary::mock();
        }

        let mut purchases = Vec::new();
        for account in &accounts {
            match self.purchases(&account.id).await {
                Ok(mut batch) => purchases.append(&mut batch),
                Err(e) => warn!("[banking] Nessie purchases error for {}: {:#}", account.id, e),
            }
        }
        SpendingSummary::from_purchases(&purchases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn purchase(amount: f64, category: Option<&str>) -> Purchase {
        Purchase {
            amount,
            category: category.map(String::from),
        }
    }

    #[test]
    fn summarizes_and_ranks_categories() {
        let purchases = vec![
            purchase(100.0, Some("Food")),
            purchase(1200.0, Some("Housing")),
            purchase(50.5, Some("Food")),
            purchase(20.0, None),
            purchase(300.0, Some("Transport")),
        ];
        let summary = SpendingSummary::from_purchases(&purchases);

        assert_eq!(summary.total_spending, 1670.5);
        assert_eq!(summary.budget_adherence, 44);
        let names: Vec<&str> = summary
            .top_categories
            .iter()
            .map(|c| c.category.as_str())
            .collect();
        assert_eq!(names, ["Housing", "Transport", "Food"]);
        assert_eq!(summary.top_categories[2].amount, 150.5);
    }

    #[test]
    fn empty_purchases_give_zero_totals() {
        let none: Vec<Purchase> = Vec::new();
        let summary = SpendingSummary::from_purchases(&none);
        assert_eq!(summary.total_spending, 0.0);
        assert_eq!(summary.budget_adherence, 0);
        assert!(summary.top_categories.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_client_falls_back_to_mock() {
        let client = NessieClient::new(None, NESSIE_BASE_URL);
        assert_eq!(client.spending_summary().await, SpendingSummary::mock());
    }

    async fn fake_purchases(Path(account_id): Path<String>) -> Json<Value> {
        Json(match account_id.as_str() {
            "a1" => json!([
                { "amount": 1200.0, "category": "Housing" },
                { "amount": 40.25, "category": "Food" }
            ]),
            _ => json!([
                { "amount": 60.0, "category": "Food" },
                { "amount": 15.0 }
            ]),
        })
    }

    async fn fake_nessie() -> String {
        let app = Router::new()
            .route(
                "/accounts",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    if q.get("key").map(String::as_str) != Some("k") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "bad key" })));
                    }
                    (StatusCode::OK, Json(json!([{ "_id": "a1" }, { "_id": "a2" }])))
                }),
            )
            .route("/accounts/{account_id}/purchases", get(fake_purchases));
        crate::test_http::spawn(app).await
    }

    #[tokio::test]
    async fn sums_purchases_across_accounts() {
        let client = NessieClient::new(Some("k".into()), fake_nessie().await);
        let summary = client.spending_summary().await;

        assert_eq!(summary.total_spending, 1315.25);
        assert_eq!(summary.budget_adherence, 35);
        assert_eq!(summary.top_categories[0].category, "Housing");
        assert_eq!(summary.top_categories[1].category, "Food");
        assert_eq!(summary.top_categories[1].amount, 100.25);
        assert_eq!(summary.top_categories[2].category, "Other");
    }

    #[tokio::test]
    async fn upstream_errors_keep_status_and_body() {
        let client = NessieClient::new(Some("wrong".into()), fake_nessie().await);
        match client.get_json("/accounts").await {
            Err(ProxyError::Upstream { status, details }) => {
                assert_eq!(status, 401);
                assert_eq!(details["message"], "bad key");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        // A rejected key means no accounts, so the mock stands in.
        assert_eq!(client.spending_summary().await, SpendingSummary::mock());
    }

    #[test]
    fn write_payloads_are_checked() {
        let purchase: NewPurchase = serde_json::from_value(json!({
            "merchant_id": "m1",
            "medium": "balance",
            "purchase_date": "2025-10-01",
            "amount": 0
        }))
        .unwrap();
        assert!(purchase.validate().is_err());

        let bill: NewBill = serde_json::from_value(json!({
            "status": "pending",
            "payee": "Landlord",
            "payment_date": "2025-11-01",
            "recurring_date": 32,
            "payment_amount": 1200
        }))
        .unwrap();
        assert!(bill.validate().unwrap_err().contains("recurring_date"));

        let deposit: NewDeposit = serde_json::from_value(json!({
            "medium": "balance",
            "transaction_date": "2025-10-02",
            "amount": 0
        }))
        .unwrap();
        assert!(deposit.validate().is_ok());
        assert!(serde_json::from_value::<NewDeposit>(json!({
            "medium": "rewards",
            "transaction_date": "2025-10-02",
            "amount": 5
        }))
        .is_err());
    }

    #[test]
    fn account_ids_cannot_escape_the_path() {
        assert_eq!(
            account_path("5f1c0a", "/bills").unwrap(),
            "/accounts/5f1c0a/bills"
        );
        assert!(account_path("../customers", "").is_err());
        assert!(account_path("a1?key=x", "/purchases").is_err());
        assert!(account_path("", "").is_err());
    }
}
