//! Access decisions.
//!
//! - [`PermissionDecisionEngine`] allows or denies `(feature, action)` for a
//!   permission group
//! - [`DataPolicyResolver`] picks the row-scope and mask-rule policy that applies
//! - [`RowConditionEvaluator`] compiles and evaluates CEL row conditions
//! - [`AccessDecisionFacade`] runs all of the above for one request and hands
//!   back per-field maskers

mod action;
mod decision;
mod error;
mod facade;
mod resolver;
mod row_condition;

pub use action::ActionCode;
pub use decision::PermissionDecisionEngine;
pub use error::{AccessError, DenialReason};
pub use facade::{
    AccessDecision, AccessDecisionFacade, AccessRequest, FacadeOptions, RowAccess, RowPredicate,
    UnmaskRequest,
};
pub use resolver::{
    DataPolicyResolver, PolicyDimension, PolicyRequest, PolicySimulation, PolicySimulationResult,
};
pub use row_condition::{
    Attributes, CompiledPredicate, DEFAULT_MAX_EXPRESSION_LENGTH, ExpressionCache,
    RowConditionEvaluator,
};
