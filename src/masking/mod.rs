//! Dynamic field masking.
//!
//! - [`MaskRuleProcessor`] applies one of the closed [`MaskRule`] transforms
//! - [`MaskingStrategy`] decides whether a [`MaskingTarget`] is masked by default
//! - [`MaskingEngine`] layers force-unmask overrides on top and reports
//!   override reveals to an [`AuditSink`]

mod audit;
mod engine;
mod rule;
mod strategy;
mod target;

pub use audit::{
    AuditError, AuditSink, BroadcastAuditSink, MemoryAuditSink, TracingAuditSink,
    UnmaskAuditEvent,
};
pub use engine::{FieldMasker, MaskingEngine};
pub use rule::{
    ConfiguredMaskRule, DEFAULT_FULL_SENTINEL, MaskParams, MaskRule, MaskRuleProcessor,
    UnknownMaskRuleBehavior,
};
pub use strategy::{MaskingStrategy, PolicyMaskingStrategy};
pub use target::{MaskingTarget, OverrideKind};
