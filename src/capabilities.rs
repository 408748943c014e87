//! Contracts for the external collaborators the ledger drives: the payment
//! gateway (charge and disburse) and the borrower notification channel.
//!
//! Every call goes through [`bounded`] so a hung collaborator is cut off after
//! the configured timeout and reported like any other failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decimal::Money;

/// confirmation returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub reference: String,
}

impl PaymentReceipt {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("payment call timed out after {0:?}")]
    Timeout(Duration),

    #[error("missing payment reference: {0}")]
    MissingReference(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification failed: {0}")]
    Failed(String),

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}

/// pulls money from a stored payment method
#[async_trait]
pub trait ChargeCapability: Send + Sync {
    async fn charge(&self, method_ref: &str, amount: Money) -> Result<PaymentReceipt, PaymentError>;
}

/// pushes loan funds to the borrower
#[async_trait]
pub trait DisburseCapability: Send + Sync {
    async fn disburse(&self, amount: Money, destination_ref: &str) -> Result<PaymentReceipt, PaymentError>;
}

/// best-effort borrower messaging
#[async_trait]
pub trait NotificationCapability: Send + Sync {
    async fn notify(&self, recipient_ref: &str, message: &str) -> Result<(), NotifyError>;
}

/// run a gateway call under `limit`; elapsed time becomes [`PaymentError::Timeout`]
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, PaymentError>
where
    F: Future<Output = Result<T, PaymentError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PaymentError::Timeout(limit)),
    }
}

/// send a notification, logging instead of surfacing any failure
pub async fn notify_best_effort(
    notifier: &dyn NotificationCapability,
    limit: Duration,
    recipient_ref: &str,
    message: &str,
) {
    let outcome = match tokio::time::timeout(limit, notifier.notify(recipient_ref, message)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(limit)),
    };

    if let Err(e) = outcome {
        tracing::warn!(recipient = recipient_ref, error = %e, "notification dropped");
    }
}
