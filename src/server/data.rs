use ethers::types::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
pub struct AddPaymentRequest {
    pub subtask_id: String,
    pub payee:      Address,
    /// Decimal-string amount in the token's smallest unit, matching the
    /// persistence layer's own `NUMERIC` rendering.
    pub value:      String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPaymentResponse {
    pub processed_ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendoutResponse {
    pub sent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub reserved_amount:  String,
    pub recipients_count: usize,
}
