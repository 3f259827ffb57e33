use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use crate::AppState;
use crate::credits::{GenerationRecord, NewGeneration};
use crate::error::QuotaError;

/// Append an audit record for a finished generation attempt
pub async fn record_generation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewGeneration>,
) -> Result<(StatusCode, Json<GenerationRecord>), QuotaError> {
    let record = state.ledger.record_generation(body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{send, test_app};
    use serde_json::json;

    #[tokio::test]
    async fn test_record_generation_returns_stored_record() {
        let app = test_app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/v1/generations",
            Some(json!({
                "userId": "user-9",
                "generationType": "try-on",
                "resultReference": "https://res.cloudinary.example/tryon/1.png",
                "creditsCharged": 1
            })),
            None,
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(body["userId"], "user-9");
        assert_eq!(body["generationType"], "try-on");
        assert_eq!(body["processingTimeMs"], 0);
        assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_blank_user_is_rejected() {
        let app = test_app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/v1/generations",
            Some(json!({ "userId": " ", "generationType": "try-on" })),
            None,
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["type"], "invalid_request");
    }
}
