pub mod manager;
pub mod service;

pub use manager::ApiKeyManager;
pub use service::{ApiKeyEntry, ApiKeyInfo, ApiService, ServiceStats, mask_key};
