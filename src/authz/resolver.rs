//! Data policy resolution.
//!
//! # Matching
//!
//! A policy matches a request iff every dimension the policy defines is
//! present on the request and equal to it. Undefined policy dimensions are
//! wildcards. Wildcards are policy-side only: a policy with `action_code`
//! set never matches a request that carries no action.
//!
//! # Selection
//!
//! Candidates are tried in ascending `priority` order and the **first** match
//! wins. This is not "most specific wins": a broad policy with priority 5
//! beats a narrow one with priority 10. Administrators express specificity
//! through `priority` alone. Equal priorities keep store order.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ActionCode, error::AccessError};
use crate::{
    db::repos::DataPolicyRepo,
    models::{DataPolicy, DataPolicyMatch},
};

/// The request dimensions a data policy is matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyRequest {
    pub feature_code: String,
    pub action_code: Option<ActionCode>,
    pub perm_group_code: Option<String>,
    pub org_policy_id: Option<String>,
    pub org_group_codes: HashSet<String>,
    pub business_type: Option<String>,
}

impl PolicyRequest {
    pub fn new(feature_code: impl Into<String>) -> Self {
        Self {
            feature_code: feature_code.into(),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: ActionCode) -> Self {
        self.action_code = Some(action);
        self
    }

    pub fn with_perm_group(mut self, code: impl Into<String>) -> Self {
        self.perm_group_code = Some(code.into());
        self
    }

    pub fn with_org_policy(mut self, id: impl Into<String>) -> Self {
        self.org_policy_id = Some(id.into());
        self
    }

    pub fn with_org_groups<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.org_group_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_business_type(mut self, business_type: impl Into<String>) -> Self {
        self.business_type = Some(business_type.into());
        self
    }
}

/// A policy dimension that rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDimension {
    Feature,
    Action,
    PermGroup,
    OrgPolicy,
    OrgGroup,
    BusinessType,
}

impl std::fmt::Display for PolicyDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyDimension::Feature => write!(f, "feature"),
            PolicyDimension::Action => write!(f, "action"),
            PolicyDimension::PermGroup => write!(f, "perm_group"),
            PolicyDimension::OrgPolicy => write!(f, "org_policy"),
            PolicyDimension::OrgGroup => write!(f, "org_group"),
            PolicyDimension::BusinessType => write!(f, "business_type"),
        }
    }
}

/// Per-policy result of a simulation.
#[derive(Debug, Clone, Serialize)]
pub struct PolicySimulationResult {
    pub policy_id: Uuid,
    pub priority: i32,
    /// Dimensions that did not match; empty means the attributes matched
    pub mismatches: Vec<PolicyDimension>,
    /// Whether the effective window contains the evaluation instant
    pub effective: bool,
    /// Whether this is the policy `evaluate` would return
    pub selected: bool,
}

/// Every active policy checked against one request, in evaluation order.
#[derive(Debug, Clone, Serialize)]
pub struct PolicySimulation {
    pub as_of: DateTime<Utc>,
    pub policies_evaluated: Vec<PolicySimulationResult>,
    pub matched: Option<DataPolicyMatch>,
}

/// Picks at most one data policy for a request.
#[derive(Clone)]
pub struct DataPolicyResolver {
    repo: Arc<dyn DataPolicyRepo>,
}

impl std::fmt::Debug for DataPolicyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPolicyResolver").finish_non_exhaustive()
    }
}

impl DataPolicyResolver {
    pub fn new(repo: Arc<dyn DataPolicyRepo>) -> Self {
        Self { repo }
    }

    /// First effective policy in priority order that matches `request`.
    ///
    /// `Ok(None)` when nothing matches; that is not an error.
    pub async fn evaluate(
        &self,
        request: &PolicyRequest,
        as_of: DateTime<Utc>,
    ) -> Result<Option<DataPolicyMatch>, AccessError> {
        let policies = self.candidates().await?;

        let matched = policies
            .iter()
            .find(|policy| mismatches(policy, request).is_empty() && policy.is_effective_at(as_of))
            .map(DataPolicyMatch::from);

        match &matched {
            Some(m) => tracing::debug!(
                feature = %request.feature_code,
                action = ?request.action_code,
                group = ?request.perm_group_code,
                policy_id = %m.policy_id,
                priority = m.priority,
                "Data policy matched"
            ),
            None => tracing::debug!(
                feature = %request.feature_code,
                action = ?request.action_code,
                group = ?request.perm_group_code,
                candidates = policies.len(),
                "No data policy matched"
            ),
        }

        Ok(matched)
    }

    /// Check every active policy and report why each one did or did not match.
    pub async fn simulate(
        &self,
        request: &PolicyRequest,
        as_of: DateTime<Utc>,
    ) -> Result<PolicySimulation, AccessError> {
        let policies = self.candidates().await?;
        let mut policies_evaluated = Vec::with_capacity(policies.len());
        let mut matched = None;

        for policy in &policies {
            let mismatches = mismatches(policy, request);
            let effective = policy.is_effective_at(as_of);
            let selected = matched.is_none() && mismatches.is_empty() && effective;
            if selected {
                matched = Some(DataPolicyMatch::from(policy));
            }
            policies_evaluated.push(PolicySimulationResult {
                policy_id: policy.id,
                priority: policy.priority,
                mismatches,
                effective,
                selected,
            });
        }

        Ok(PolicySimulation {
            as_of,
            policies_evaluated,
            matched,
        })
    }

    async fn candidates(&self) -> Result<Vec<DataPolicy>, AccessError> {
        let mut policies = self.repo.list_active().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to load data policies");
            AccessError::Store(e.to_string())
        })?;
        // Stores promise priority order; re-sort stably so ties keep store order
        policies.sort_by_key(|p| p.priority);
        Ok(policies)
    }
}

/// Dimensions defined on `policy` that `request` fails.
fn mismatches(policy: &DataPolicy, request: &PolicyRequest) -> Vec<PolicyDimension> {
    let mut failed = Vec::new();

    if policy.feature_code != request.feature_code {
        failed.push(PolicyDimension::Feature);
    }
    if !dimension_matches(&policy.action_code, &request.action_code) {
        failed.push(PolicyDimension::Action);
    }
    if !dimension_matches(&policy.perm_group_code, &request.perm_group_code) {
        failed.push(PolicyDimension::PermGroup);
    }
    if !dimension_matches(&policy.org_policy_id, &request.org_policy_id) {
        failed.push(PolicyDimension::OrgPolicy);
    }
    if let Some(code) = &policy.org_group_code
        && !request
            .org_group_codes
            .iter()
            .any(|member| member.eq_ignore_ascii_case(code))
    {
        failed.push(PolicyDimension::OrgGroup);
    }
    if !dimension_matches(&policy.business_type, &request.business_type) {
        failed.push(PolicyDimension::BusinessType);
    }

    failed
}

/// An undefined policy value is a wildcard; a defined one needs an equal request value.
fn dimension_matches<T: PartialEq>(policy: &Option<T>, request: &Option<T>) -> bool {
    match (policy, request) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(expected), Some(actual)) => expected == actual,
    }
}
