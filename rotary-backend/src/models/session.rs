use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub token: String,
    pub user_id: String,
    /// Issued after password check, waiting for a second factor
    pub mfa_pending: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
