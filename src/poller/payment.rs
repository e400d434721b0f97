use thiserror::Error;
use tracing::{info, warn};

use super::{PollHandle, PollOutcome, PollPolicy, Poller};
use crate::api::models::{Membership, PaymentOrder, PaymentStatus};
use crate::api::{ApiClient, ApiError};
use crate::config::{Config, PollingConfig};

#[derive(Debug, Error)]
pub enum PaymentFlowError {
    #[error("order not found: no pending payment order on this device")]
    OrderNotFound,
    #[error("not a payment return")]
    NotAReturn,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<crate::storage::StoreError> for PaymentFlowError {
    fn from(e: crate::storage::StoreError) -> Self {
        PaymentFlowError::Api(e.into())
    }
}

/// Detects a return from the external payment redirect
pub struct PaymentReturn;

impl PaymentReturn {
    /// True when `view_url` carries `#<marker>` (optionally followed by
    /// `?...`) or a `payment=return` query pair.
    pub fn detect(view_url: &str, marker: &str) -> bool {
        let (before_fragment, fragment) = match view_url.split_once('#') {
            Some((head, frag)) => (head, Some(frag)),
            None => (view_url, None),
        };

        if let Some(fragment) = fragment {
            let fragment = fragment.trim_start_matches('/');
            let name = fragment.split(|c: char| c == '?' || c == '&').next().unwrap_or_default();
            if !marker.is_empty() && name == marker {
                return true;
            }
            // Hash routers put the query inside the fragment
            if let Some((_, query)) = fragment.split_once('?') {
                if has_return_pair(query) {
                    return true;
                }
            }
        }

        match before_fragment.split_once('?') {
            Some((_, query)) => has_return_pair(query),
            None => false,
        }
    }
}

fn has_return_pair(query: &str) -> bool {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(k, v)| k == "payment" && v == "return")
}

/// Final result of a watched order
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResult {
    pub outcome: PollOutcome<PaymentOrder>,
    /// Refreshed entitlement after a successful payment
    pub membership: Option<Membership>,
}

impl PaymentResult {
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, PollOutcome::Terminal(order) if order.status == PaymentStatus::Success)
    }
}

pub struct PaymentPoller;

impl PaymentPoller {
    pub fn policy(config: &PollingConfig) -> PollPolicy {
        PollPolicy::every(config.payment_interval())
            .with_error_interval(config.payment_error_interval())
            .with_max_duration(config.payment_max_wait())
    }

    /// Resume confirmation after the provider redirected back to `view_url`
    pub fn resume(
        client: ApiClient,
        view_url: &str,
        config: &Config,
    ) -> Result<PaymentWatch, PaymentFlowError> {
        if !PaymentReturn::detect(view_url, &config.payment.return_marker) {
            return Err(PaymentFlowError::NotAReturn);
        }
        let order_no = client
            .store()
            .last_order_no()?
            .ok_or(PaymentFlowError::OrderNotFound)?;

        info!("Resuming payment confirmation for order {}", order_no);
        Ok(Self::watch(client, &order_no, Self::policy(&config.polling)))
    }

    /// Poll `order_no` until it settles
    pub fn watch(client: ApiClient, order_no: &str, policy: PollPolicy) -> PaymentWatch {
        let order_no = order_no.to_string();
        let poll_client = client.clone();
        let poll_order = order_no.clone();

        let handle = Poller::new(format!("order {}", order_no), policy).spawn(move || {
            let client = poll_client.clone();
            let order_no = poll_order.clone();
            async move { client.order_status(&order_no).await }
        });

        PaymentWatch {
            client,
            order_no,
            handle,
        }
    }
}

/// A running payment confirmation
pub struct PaymentWatch {
    client: ApiClient,
    order_no: String,
    handle: PollHandle<PaymentOrder>,
}

impl PaymentWatch {
    pub fn order_no(&self) -> &str {
        &self.order_no
    }

    pub fn handle(&self) -> &PollHandle<PaymentOrder> {
        &self.handle
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the order to settle, then apply its side effects: the
    /// persisted order number is cleared on any terminal status and
    /// membership is refreshed on success.
    pub async fn finish(self) -> Result<PaymentResult, ApiError> {
        let outcome = self.handle.wait().await;

        let mut membership = None;
        if let PollOutcome::Terminal(order) = &outcome {
            self.client.store().clear_last_order_no()?;
            match order.status {
                PaymentStatus::Success => {
                    info!("Order {} paid", order.order_no);
                    match self.client.membership().await {
                        Ok(m) => membership = Some(m),
                        Err(e) => warn!("Membership refresh after payment failed: {}", e),
                    }
                }
                status => warn!("Order {} ended as {}", order.order_no, status),
            }
        }

        Ok(PaymentResult {
            outcome,
            membership,
        })
    }
}
