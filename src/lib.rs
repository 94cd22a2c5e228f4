//! Quotagate - Multi-tier Admission Control
//!
//! This crate implements admission control for API gateways that front
//! metered, pay-per-request upstream services. Each request is checked
//! against four independently configured quota tiers (per-key-minute,
//! per-key-daily, and the legacy per-user total and success counters),
//! enforced either through a shared Redis store for cluster-wide consistency
//! or through in-process counters for single-instance deployments.

pub mod admission;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod limit;

pub use admission::{AdmissionController, AdmissionPermit};
pub use config::{LimiterSettings, ScopeSettings};
pub use context::{ApiKeyIdentity, RequestIdentity, StatusCategory};
pub use error::{QuotagateError, Result, ThrottleRejection};
