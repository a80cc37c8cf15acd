//! Receipt store backed by a Convex deployment's HTTP API.
//!
//! Calls the `receipts:updateReceiptWithExtractedData` mutation through
//! `POST {deployment}/api/mutation`. The deployment validates `parsedData`
//! against a fixed object schema: every weight key is required and takes a
//! number or `null`, so absent weights are sent as explicit `null`.

use super::{ReceiptStore, ReceiptUpdate};
use crate::error::ReceiptError;
use crate::pipeline::input::http_client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const MUTATION_PATH: &str = "receipts:updateReceiptWithExtractedData";
const TIMEOUT_SECS: u64 = 30;

pub struct ConvexStore {
    http: reqwest::Client,
    base_url: String,
    deploy_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    status: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error_message: Option<String>,
}

impl ConvexStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ReceiptError> {
        Self::with_timeout(base_url, TIMEOUT_SECS)
    }

    fn with_timeout(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, ReceiptError> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            deploy_key: None,
        })
    }

    /// Authenticate as the deployment (`Authorization: Convex <key>`).
    pub fn with_deploy_key(mut self, key: impl Into<String>) -> Self {
        self.deploy_key = Some(key.into());
        self
    }

    /// `CONVEX_URL` (required) and `CONVEX_DEPLOY_KEY` (optional).
    /// `Ok(None)` when no deployment is configured.
    pub fn from_env() -> Result<Option<Self>, ReceiptError> {
        let Some(url) = std::env::var("CONVEX_URL").ok().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let store = Self::new(url)?;
        Ok(Some(match std::env::var("CONVEX_DEPLOY_KEY") {
            Ok(key) if !key.is_empty() => store.with_deploy_key(key),
            _ => store,
        }))
    }

    fn mutation_body(update: &ReceiptUpdate) -> Result<Value, ReceiptError> {
        let args = serde_json::to_value(update)
            .map_err(|e| ReceiptError::Internal(format!("serialise update: {e}")))?;
        Ok(json!({
            "path": MUTATION_PATH,
            "args": args,
            "format": "json",
        }))
    }
}

#[async_trait]
impl ReceiptStore for ConvexStore {
    async fn update_receipt_with_extracted_data(
        &self,
        update: &ReceiptUpdate,
    ) -> Result<String, ReceiptError> {
        let fail = |reason: String| ReceiptError::PersistenceFailed {
            receipt_id: update.receipt_id.clone(),
            reason,
        };

        let mut request = self
            .http
            .post(format!("{}/api/mutation", self.base_url))
            .json(&Self::mutation_body(update)?);
        if let Some(ref key) = self.deploy_key {
            request = request.header("Authorization", format!("Convex {key}"));
        }

        let response = request.send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| fail(e.to_string()))?;
        let parsed: MutationResponse = serde_json::from_str(&text)
            .map_err(|_| fail(format!("HTTP {}: {}", status.as_u16(), text.trim())))?;

        if parsed.status != "success" {
            return Err(fail(
                parsed
                    .error_message
                    .unwrap_or_else(|| format!("mutation status '{}'", parsed.status)),
            ));
        }

        let owner = parsed
            .value
            .as_ref()
            .and_then(|v| v.get("userId"))
            .and_then(Value::as_str)
            .ok_or_else(|| fail("mutation result has no userId".to_string()))?;
        debug!("Convex saved receipt {} for owner {}", update.receipt_id, owner);
        Ok(owner.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::StructuredReceipt;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn update() -> ReceiptUpdate {
        ReceiptUpdate::new(
            "rcpt_1",
            "Carrières du Nord - Ticket 48213",
            StructuredReceipt {
                entreprise: "Carrières du Nord".into(),
                description: "Gravier 0/20".into(),
                poids_net_kg: Some(6240.0),
                ..Default::default()
            },
        )
    }

    #[test]
    fn body_keeps_absent_weights_as_null() {
        let body = ConvexStore::mutation_body(&update()).unwrap();
        assert_eq!(body["path"], MUTATION_PATH);
        let parsed = body["args"]["parsedData"].as_object().unwrap();
        assert!(parsed["poids_entree_kg"].is_null());
        assert!(parsed["poids_sortie_kg"].is_null());
        assert_eq!(parsed["poids_net_kg"], 6240.0);
        assert_eq!(body["args"]["receiptSummary"], "Gravier 0/20");
    }

    #[test]
    fn blank_receipt_sends_every_key() {
        let blank = ReceiptUpdate::new("r", "n", StructuredReceipt::default());
        let body = ConvexStore::mutation_body(&blank).unwrap();
        let parsed = body["args"]["parsedData"].as_object().unwrap();
        for key in ["poids_entree_kg", "poids_sortie_kg", "poids_net_kg"] {
            assert!(parsed[key].is_null(), "{key} should be null");
        }
        for key in ["entreprise", "numero_pesee", "date_entree", "installateur"] {
            assert!(parsed.contains_key(key), "{key} missing");
        }
    }

    #[tokio::test]
    async fn slow_deployment_times_out() {
        let router = Router::new().route(
            "/api/mutation",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Json(json!({"status": "success", "value": {"userId": "late"}}))
            }),
        );
        let store = ConvexStore::with_timeout(serve(router).await, 1).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            store.update_receipt_with_extracted_data(&update()),
        )
        .await
        .expect("client timeout should fire first");
        assert!(matches!(result, Err(ReceiptError::PersistenceFailed { .. })));
    }

    #[tokio::test]
    async fn success_returns_owner() {
        let auth: Arc<Mutex<Option<String>>> = Arc::default();
        let seen = auth.clone();
        let router = Router::new().route(
            "/api/mutation",
            post(move |headers: HeaderMap, Json(_body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Json(json!({"status": "success", "value": {"userId": "user_7"}}))
                }
            }),
        );
        let store = ConvexStore::new(serve(router).await)
            .unwrap()
            .with_deploy_key("prod:abc");

        let owner = store
            .update_receipt_with_extracted_data(&update())
            .await
            .unwrap();
        assert_eq!(owner, "user_7");
        assert_eq!(auth.lock().unwrap().as_deref(), Some("Convex prod:abc"));
    }

    #[tokio::test]
    async fn mutation_error_is_persistence_failure() {
        let router = Router::new().route(
            "/api/mutation",
            post(|| async {
                Json(json!({"status": "error", "errorMessage": "Receipt not found"}))
            }),
        );
        let store = ConvexStore::new(serve(router).await).unwrap();

        let err = store
            .update_receipt_with_extracted_data(&update())
            .await
            .unwrap_err();
        match err {
            ReceiptError::PersistenceFailed { receipt_id, reason } => {
                assert_eq!(receipt_id, "rcpt_1");
                assert_eq!(reason, "Receipt not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
