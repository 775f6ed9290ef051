//! Transport-neutral response envelope.

use serde::{Deserialize, Serialize};

/// `{ ok, data?, errorReason? }` shape returned by every public operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Machine-readable error kind (e.g. "INSUFFICIENT_FUNDS")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error_reason: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: &str, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error_reason: Some(reason.into()),
            error_kind: Some(kind.to_string()),
        }
    }
}
