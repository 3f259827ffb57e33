pub mod admin;
pub mod credits;
pub mod generations;
pub mod health;
pub mod limits;

#[cfg(test)]
pub(crate) mod testing {
    use axum::{Router, body::Body, http::Request};
    use base64::Engine;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::AppState;
    use crate::credits::{CreditLedger, PlanTable, SqlCreditStore};
    use crate::db::testing::temp_db;
    use crate::keys::{ApiKeyManager, ApiService};
    use crate::rate_limiter::{RateLimiterConfig, RateLimiterRegistry};

    pub const ADMIN_USER: &str = "admin";
    pub const ADMIN_PASS: &str = "hunter2";

    pub async fn test_app() -> Router {
        let ledger = CreditLedger::new(SqlCreditStore::new(temp_db().await), PlanTable::default());
        let keys = ApiKeyManager::new();
        keys.register_service(
            ApiService::Replicate,
            ["r8_first_secret", "r8_second_secret"],
            Some(1),
        )
        .await;
        let limiter = RateLimiterConfig {
            max_requests: 2,
            window: std::time::Duration::from_secs(60),
        };

        crate::router(Arc::new(AppState {
            ledger,
            keys,
            limiters: RateLimiterRegistry::new(limiter, limiter),
            admin_credentials: (ADMIN_USER.into(), ADMIN_PASS.into()),
            disable_auth: false,
        }))
    }

    pub fn basic_auth() -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{ADMIN_USER}:{ADMIN_PASS}"));
        format!("Basic {encoded}")
    }

    /// Send a request and return (status, parsed JSON body or Null)
    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
        auth: Option<String>,
    ) -> (u16, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}
