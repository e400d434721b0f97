use reqwest::Method;
use serde_json::Value;
use tracing::{info, warn};

use super::models::{CreatePaymentRequest, PaymentCreated, PaymentOrder};
use super::{require_id, ApiClient, ApiError, RequestOptions};

impl ApiClient {
    /// Create an order and persist its number for the redirect round-trip
    pub async fn create_order(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<PaymentCreated, ApiError> {
        require_id("plan", &request.plan)?;
        require_id("payment_method", &request.payment_method)?;

        let created: PaymentCreated = self
            .post_form("/api/payment/create", request.to_form())
            .await?;

        if created.order_no.trim().is_empty() {
            return Err(ApiError::Decode(
                "payment response carried an empty order_no".to_string(),
            ));
        }

        self.store().set_last_order_no(&created.order_no)?;
        info!(
            "Created payment order {} ({} via {})",
            created.order_no, request.plan, request.payment_method
        );
        if created.payment_url.is_none() && created.qr_code.is_none() {
            warn!("Order {} has neither payment_url nor qr_code", created.order_no);
        }
        Ok(created)
    }

    pub async fn order_status(&self, order_no: &str) -> Result<PaymentOrder, ApiError> {
        let order_no = require_id("order_no", order_no)?;
        self.request(
            Method::GET,
            "/api/payment/order",
            RequestOptions::new().query("order_no", order_no),
        )
        .await?
        .into_json()
    }

    pub async fn payment_methods(&self) -> Result<Value, ApiError> {
        self.get_json("/api/payment/methods").await
    }

    pub async fn usage_today(&self) -> Result<Value, ApiError> {
        self.get_json("/api/payment/usage/today").await
    }

    /// Purchasable plans; the `{plans: [...]}` envelope is unwrapped
    pub async fn membership_plans(&self) -> Result<Vec<Value>, ApiError> {
        let body: Value = self.get_json("/api/membership/plans").await?;
        match body {
            Value::Object(mut map) => match map.remove("plans") {
                Some(Value::Array(plans)) => Ok(plans),
                _ => Err(ApiError::Decode("plans response has no plans array".to_string())),
            },
            Value::Array(plans) => Ok(plans),
            other => Err(ApiError::Decode(format!("unexpected plans response: {}", other))),
        }
    }
}
