use axum::response::Json;
use serde_json::{Value, json};

use crate::{BUILD_TIME, GIT_HASH, VERSION};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn version() -> Json<Value> {
    Json(json!({
        "version": VERSION,
        "git_hash": GIT_HASH,
        "build_time": BUILD_TIME,
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{send, test_app};

    #[tokio::test]
    async fn test_health_and_version() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, "GET", "/version", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
