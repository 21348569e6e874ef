//! Session authentication token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Auth token for one service session.
///
/// Owned exclusively by the [`SessionTokenManager`]; a newly generated token
/// invalidates the previous one.
///
/// [`SessionTokenManager`]: crate::token::SessionTokenManager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub session_id: String,
    pub token: String,
    /// Scheme, e.g. `"Bearer"`.
    #[serde(rename = "type")]
    pub token_type: String,
    pub expiration_time: DateTime<Utc>,
}

impl SessionToken {
    /// A token is expired once `now >= expiration_time`.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiration_time
    }
}
