//! # paygate-flows
//!
//! Payment confirmation flows for priced tools.
//!
//! ## Flows
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────────┐
//! │ elicitation  │ prompt the caller in-band until paid or canceled     │
//! │ progress     │ keep the call open, poll, stream heartbeat progress  │
//! │ two_step     │ return a link, run on confirm_<tool>_payment         │
//! │ resubmit     │ fail with payment_required, run on retry+payment_id  │
//! │ list_change  │ swap the tool for a per-session confirm tool         │
//! │ auto         │ elicitation if the caller supports it, else resubmit │
//! └──────────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paygate_flows::{FlowDeps, FlowKind, PaygateConfig, Paywall};
//!
//! let deps = FlowDeps::new(host, provider, store, PaygateConfig::from_env()?);
//! let paywall = Paywall::new(deps, FlowKind::Resubmit);
//! paywall.register(schema, Price::new(dec!(0.50), "USD")?, handler)?;
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod paywall;
pub mod registry;

#[cfg(test)]
mod testkit;

pub use config::PaygateConfig;
pub use error::{FlowError, Result};
pub use flow::{
    AutoFlow, ElicitationFlow, FlowDeps, ListChangeFlow, PaymentSession, PricedTool, ProgressFlow,
    ResubmitFlow, TwoStepFlow,
};
pub use paywall::{GatedTool, Paywall};
pub use registry::FlowKind;
