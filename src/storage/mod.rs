pub mod database;
pub mod models;

pub use database::{LocalStore, StoreError};
pub use models::{Setting, KEY_API_BASE, KEY_AUTH_TOKEN, KEY_LAST_ORDER_NO};
