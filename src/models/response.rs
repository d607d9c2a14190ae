use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub chain_rpc: bool,
    pub chain_id: u64,
    pub sender_address: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
