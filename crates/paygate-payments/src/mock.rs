//! Mock Payment Provider
//!
//! For testing and demo purposes. Every created payment follows a status
//! script; the last scripted status repeats forever.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::error::{PaymentError, Result};
use crate::provider::{CreatedPayment, PaymentProvider};

/// Scripted, in-memory provider
pub struct MockProvider {
    name: String,
    url_base: String,
    script: Vec<String>,
    preset_ids: Mutex<VecDeque<String>>,
    statuses: Mutex<HashMap<String, VecDeque<String>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    created: AtomicUsize,
    fail_create: AtomicBool,
    fail_status: AtomicBool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Provider whose payments stay `pending` until told otherwise
    pub fn new() -> Self {
        Self {
            name: "mock".into(),
            url_base: "https://pay.example.com/checkout/".into(),
            script: vec!["pending".into()],
            preset_ids: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            status_calls: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
        }
    }

    /// Status script every new payment follows
    pub fn with_script(mut self, statuses: &[&str]) -> Self {
        if !statuses.is_empty() {
            self.script = statuses.iter().map(|s| (*s).to_string()).collect();
        }
        self
    }

    /// Payments report `pending` for `polls` status queries, then `paid`
    pub fn paid_after(polls: usize) -> Self {
        let mut script = vec!["pending"; polls];
        script.push("paid");
        Self::new().with_script(&script)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_url_base(mut self, url_base: impl Into<String>) -> Self {
        self.url_base = url_base.into();
        self
    }

    /// Hand out these ids (in order) before falling back to generated ones
    pub fn with_payment_ids(self, ids: &[&str]) -> Self {
        Self {
            preset_ids: Mutex::new(ids.iter().map(|s| (*s).to_string()).collect()),
            ..self
        }
    }

    /// Pin a payment to a fixed status from now on
    pub async fn set_status(&self, payment_id: &str, status: &str) {
        let mut statuses = self.statuses.lock().await;
        statuses.insert(payment_id.to_string(), VecDeque::from([status.to_string()]));
    }

    /// Make `create_payment` fail as if the processor were down
    pub fn set_create_failure(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `get_payment_status` fail as if the processor were down
    pub fn set_status_failure(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    /// Number of payments created so far
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of status queries for one payment
    pub async fn status_calls(&self, payment_id: &str) -> usize {
        self.status_calls
            .lock()
            .await
            .get(payment_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_payment(&self, amount: Decimal, currency: &str, description: &str) -> Result<CreatedPayment> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::Unreachable("mock provider offline".into()));
        }

        let payment_id = match self.preset_ids.lock().await.pop_front() {
            Some(id) => id,
            None => format!("mock_{}", uuid::Uuid::new_v4().simple()),
        };

        self.statuses
            .lock()
            .await
            .insert(payment_id.clone(), self.script.iter().cloned().collect());
        self.created.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            payment_id = %payment_id,
            amount = %amount,
            currency = %currency,
            description = %description,
            "Mock payment created"
        );

        Ok(CreatedPayment {
            payment_url: format!("{}{}", self.url_base, payment_id),
            payment_id,
        })
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<String> {
        *self
            .status_calls
            .lock()
            .await
            .entry(payment_id.to_string())
            .or_insert(0) += 1;

        if self.fail_status.load(Ordering::SeqCst) {
            return Err(PaymentError::Unreachable("mock provider offline".into()));
        }

        let mut statuses = self.statuses.lock().await;
        let script = statuses
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::UnknownPayment(payment_id.to_string()))?;

        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(status.unwrap_or_else(|| "pending".into()))
    }
}
