mod keys;
mod plans;

// Glob re-exports so utoipa's `routes!()` macro can find the hidden `__path_*` structs
// alongside the handler functions at the `crate::routes::admin::*` path.
pub use keys::*;
pub use plans::*;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::QuotaError;
use crate::keys::ApiService;

// --- Shared response types ---

/// Error body produced by `QuotaError`
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UpdatedResponse {
    pub updated: usize,
}

// --- Validation helpers ---

pub(super) fn parse_service(service: &str) -> Result<ApiService, QuotaError> {
    service.parse()
}
