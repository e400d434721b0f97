use chrono::Utc;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// API base override, written by `ApiClient::set_api_base`
pub const KEY_API_BASE: &str = "api_base";
/// Bearer token from the last successful login / SMS verification
pub const KEY_AUTH_TOKEN: &str = "auth_token";
/// Order number kept across the payment provider redirect
pub const KEY_LAST_ORDER_NO: &str = "last_order_no";

/// One persisted key/value pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

impl Setting {
    pub fn new(key: String, value: String) -> Self {
        Self {
            key,
            value,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

impl TryFrom<&Row<'_>> for Setting {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Setting {
            key: row.get(0)?,
            value: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }
}
