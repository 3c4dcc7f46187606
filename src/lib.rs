//! Policy-driven access decisions, row scoping and dynamic field masking.
//!
//! A protected operation is evaluated in four strictly sequential stages:
//!
//! 1. [`authz::PermissionDecisionEngine`] checks the actor's permission group
//!    (through the TTL [`cache::PermissionGroupCache`]) for the exact
//!    `(feature, action)` assignment.
//! 2. [`authz::DataPolicyResolver`] picks the first active, effective data policy
//!    in ascending priority order whose defined dimensions all match.
//! 3. [`authz::RowConditionEvaluator`] evaluates the policy's row expression
//!    against the request attributes.
//! 4. [`masking::MaskingEngine`] masks sensitive output fields lazily, honouring
//!    force-unmask overrides and emitting audit events when an override reveals
//!    data that would otherwise be masked.
//!
//! [`authz::AccessDecisionFacade`] wires the stages together and
//! [`middleware::Guard`] wraps operation handlers with it.

pub mod authz;
pub mod cache;
pub mod config;
pub mod db;
pub mod masking;
pub mod middleware;
pub mod models;
#[cfg(feature = "cli")]
pub mod observability;
pub mod services;

pub use authz::{AccessDecision, AccessDecisionFacade, AccessError, AccessRequest};
pub use config::AccessConfig;
