//! In-process stand-ins for the payment gateway and notification channel.
//!
//! Calls succeed by default. Tests script failures or hangs per call and
//! inspect what the ledger asked for afterwards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::capabilities::{
    ChargeCapability, DisburseCapability, NotificationCapability, NotifyError, PaymentError, PaymentReceipt,
};
use crate::decimal::Money;

/// what the next scripted call does
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(PaymentError),
    /// succeeds after the gateway has been busy for this long
    Delay(Duration),
    /// never returns; the caller's timeout has to cut it off
    Hang,
}

impl ScriptedOutcome {
    fn succeeds(&self) -> bool {
        matches!(self, ScriptedOutcome::Succeed | ScriptedOutcome::Delay(_))
    }
}

/// one call the gateway received
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    pub reference_in: String,
    pub amount: Money,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct Script {
    charges: VecDeque<ScriptedOutcome>,
    disbursements: VecDeque<ScriptedOutcome>,
    charge_log: Vec<GatewayCall>,
    disburse_log: Vec<GatewayCall>,
}

/// simulated payment gateway
#[derive(Debug, Default)]
pub struct SandboxGateway {
    script: Mutex<Script>,
    sequence: AtomicU64,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// queue the outcome of the next unscripted charge
    pub fn script_charge(&self, outcome: ScriptedOutcome) {
        self.script().charges.push_back(outcome);
    }

    pub fn script_disburse(&self, outcome: ScriptedOutcome) {
        self.script().disbursements.push_back(outcome);
    }

    /// every charge attempt, including failed ones
    pub fn charges(&self) -> Vec<GatewayCall> {
        self.script().charge_log.clone()
    }

    pub fn disbursements(&self) -> Vec<GatewayCall> {
        self.script().disburse_log.clone()
    }

    fn next_reference(&self, prefix: &str) -> String {
        format!("{}_sandbox_{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn run(&self, outcome: ScriptedOutcome, prefix: &str) -> Result<PaymentReceipt, PaymentError> {
        match outcome {
            ScriptedOutcome::Succeed => Ok(PaymentReceipt::new(self.next_reference(prefix))),
            ScriptedOutcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(PaymentReceipt::new(self.next_reference(prefix)))
            }
            ScriptedOutcome::Fail(error) => Err(error),
            ScriptedOutcome::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ChargeCapability for SandboxGateway {
    async fn charge(&self, method_ref: &str, amount: Money) -> Result<PaymentReceipt, PaymentError> {
        let outcome = self.script().charges.pop_front().unwrap_or(ScriptedOutcome::Succeed);
        let succeeded = outcome.succeeds();
        self.script().charge_log.push(GatewayCall {
            reference_in: method_ref.to_string(),
            amount,
            succeeded,
        });
        tracing::debug!(method_ref, %amount, ?outcome, "sandbox charge");
        self.run(outcome, "ch").await
    }
}

#[async_trait]
impl DisburseCapability for SandboxGateway {
    async fn disburse(&self, amount: Money, destination_ref: &str) -> Result<PaymentReceipt, PaymentError> {
        let outcome = self
            .script()
            .disbursements
            .pop_front()
            .unwrap_or(ScriptedOutcome::Succeed);
        let succeeded = outcome.succeeds();
        self.script().disburse_log.push(GatewayCall {
            reference_in: destination_ref.to_string(),
            amount,
            succeeded,
        });
        tracing::debug!(destination_ref, %amount, ?outcome, "sandbox disbursement");
        self.run(outcome, "tr").await
    }
}

/// a message the notifier accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub body: String,
}

/// notifier that records messages instead of sending them
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every call fail until switched back
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// calls received, delivered or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationCapability for RecordingNotifier {
    async fn notify(&self, recipient_ref: &str, message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Failed("sandbox notifier is failing".to_string()));
        }
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(SentMessage {
            recipient: recipient_ref.to_string(),
            body: message.to_string(),
        });
        Ok(())
    }
}
