use serde_json::{json, Value};
use tracing::{info, warn};

use super::models::{AuthSession, Membership, User};
use super::{ApiClient, ApiError};

/// Mainland mobile number: 11 digits starting with 1
pub fn validate_phone(phone: &str) -> Result<&str, ApiError> {
    let phone = phone.trim();
    if phone.len() == 11 && phone.starts_with('1') && phone.chars().all(|c| c.is_ascii_digit()) {
        Ok(phone)
    } else {
        Err(ApiError::InvalidInput(format!("invalid phone number: {}", phone)))
    }
}

impl ApiClient {
    pub async fn send_sms(&self, phone: &str) -> Result<Value, ApiError> {
        let phone = validate_phone(phone)?;
        self.post_json("/api/auth/send-sms", &json!({ "phone": phone }))
            .await
    }

    pub async fn verify_sms(&self, phone: &str, code: &str) -> Result<AuthSession, ApiError> {
        let phone = validate_phone(phone)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(ApiError::InvalidInput("verification code must not be empty".to_string()));
        }

        let session: AuthSession = self
            .post_json("/api/auth/verify-sms", &json!({ "phone": phone, "code": code }))
            .await?;
        self.remember_session(&session)?;
        Ok(session)
    }

    pub async fn login(&self, phone: &str, password: &str) -> Result<AuthSession, ApiError> {
        let phone = validate_phone(phone)?;
        if password.is_empty() {
            return Err(ApiError::InvalidInput("password must not be empty".to_string()));
        }

        let session: AuthSession = self
            .post_json("/api/auth/login-password", &json!({ "phone": phone, "password": password }))
            .await?;
        self.remember_session(&session)?;
        Ok(session)
    }

    pub async fn set_password(&self, password: &str) -> Result<Value, ApiError> {
        if password.is_empty() {
            return Err(ApiError::InvalidInput("password must not be empty".to_string()));
        }
        let token = self.store().auth_token()?.ok_or_else(|| {
            ApiError::InvalidInput("not logged in".to_string())
        })?;
        self.post_json(
            "/api/auth/set-password",
            &json!({ "token": token, "password": password }),
        )
        .await
    }

    /// Drop the local token even when the server call fails
    pub async fn logout(&self) -> Result<(), ApiError> {
        let token = self.store().auth_token()?;
        let result = self
            .post_json::<_, Value>("/api/auth/logout", &json!({ "token": token }))
            .await;
        self.store().clear_auth_token()?;

        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!("Logout request failed, local token cleared anyway: {}", e);
                Err(e)
            }
        }
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.get_json("/api/auth/me").await
    }

    /// Current entitlement; served by the payment router
    pub async fn membership(&self) -> Result<Membership, ApiError> {
        self.get_json("/api/payment/membership").await
    }

    fn remember_session(&self, session: &AuthSession) -> Result<(), ApiError> {
        if session.token.trim().is_empty() {
            return Err(ApiError::Decode("auth response carried an empty token".to_string()));
        }
        self.store().set_auth_token(&session.token)?;
        info!("Signed in as user {}", session.user.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_phone() {
        assert_eq!(validate_phone(" 13800138000 ").unwrap(), "13800138000");
        assert!(validate_phone("23800138000").is_err());
        assert!(validate_phone("1380013800").is_err());
        assert!(validate_phone("1380013800a").is_err());
    }
}
