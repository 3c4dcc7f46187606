//! Composition root for access decisions.
//!
//! One call answers the three questions a protected operation asks:
//!
//! 1. **Allowed?** [`PermissionDecisionEngine`] on exact `(feature, action)`
//! 2. **Which rows?** [`DataPolicyResolver`], then the policy's row condition
//! 3. **Which fields, how?** one [`FieldMasker`] per tagged output field,
//!    applied lazily by the caller at serialization time
//!
//! Stages run strictly in that order and nothing is retried. Denials and
//! store failures abort the whole decision; an unmatched policy or a broken
//! row condition narrows the result instead.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    ActionCode,
    decision::PermissionDecisionEngine,
    error::{AccessError, DenialReason},
    resolver::{DataPolicyResolver, PolicyRequest},
    row_condition::{Attributes, CompiledPredicate, RowConditionEvaluator},
};
use crate::{
    cache::PermissionGroupCache,
    config::{AccessConfig, UnmatchedRowScope},
    db::PolicyStore,
    masking::{
        AuditSink, FieldMasker, MaskRuleProcessor, MaskingEngine, MaskingTarget,
        PolicyMaskingStrategy, TracingAuditSink,
    },
    models::{DataPolicyMatch, FieldMaskRule, PermissionAssignment, PermissionGroup, RowScope},
};

/// Overrides a caller asks for. Granted only to holders of an unmask role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnmaskRequest {
    /// Reveal every field
    pub all: bool,
    /// Reveal these data kinds (tags)
    pub kinds: HashSet<String>,
    /// Reveal these field names
    pub fields: HashSet<String>,
    /// Justification recorded with audit events
    pub reason: Option<String>,
}

impl UnmaskRequest {
    pub fn is_empty(&self) -> bool {
        !self.all && self.kinds.is_empty() && self.fields.is_empty()
    }
}

/// Everything the facade needs to decide one protected operation.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRequest {
    pub feature: String,
    pub action: ActionCode,
    /// Permission group of the caller; absent means unauthenticated
    pub group_code: Option<String>,
    pub org_policy_id: Option<String>,
    pub org_group_codes: HashSet<String>,
    pub business_type: Option<String>,
    /// Flat attributes visible to row conditions
    pub attributes: Attributes,
    pub requester_roles: Vec<String>,
    /// Output field name to sensitive-data tag
    pub field_tags: BTreeMap<String, String>,
    pub unmask: UnmaskRequest,
    pub row_id: Option<String>,
    pub as_of: DateTime<Utc>,
}

impl AccessRequest {
    pub fn new(feature: impl Into<String>, action: ActionCode) -> Self {
        Self {
            feature: feature.into(),
            action,
            group_code: None,
            org_policy_id: None,
            org_group_codes: HashSet::new(),
            business_type: None,
            attributes: Attributes::new(),
            requester_roles: Vec::new(),
            field_tags: BTreeMap::new(),
            unmask: UnmaskRequest::default(),
            row_id: None,
            as_of: Utc::now(),
        }
    }

    pub fn with_group(mut self, code: impl Into<String>) -> Self {
        self.group_code = Some(code.into());
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

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_requester_roles(mut self, roles: Vec<String>) -> Self {
        self.requester_roles = roles;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, tag: impl Into<String>) -> Self {
        self.field_tags.insert(field.into(), tag.into());
        self
    }

    pub fn with_unmask(mut self, unmask: UnmaskRequest) -> Self {
        self.unmask = unmask;
        self
    }

    pub fn with_row_id(mut self, row_id: impl Into<String>) -> Self {
        self.row_id = Some(row_id.into());
        self
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = as_of;
        self
    }

    /// The resolver's view of this request.
    pub fn policy_request(&self) -> PolicyRequest {
        PolicyRequest {
            feature_code: self.feature.clone(),
            action_code: Some(self.action),
            perm_group_code: self.group_code.clone(),
            org_policy_id: self.org_policy_id.clone(),
            org_group_codes: self.org_group_codes.clone(),
            business_type: self.business_type.clone(),
        }
    }
}

/// A compiled row condition the caller applies per row.
#[derive(Debug, Clone, Serialize)]
pub struct RowPredicate {
    pub expression: String,
    #[serde(skip)]
    predicate: Arc<CompiledPredicate>,
    #[serde(skip)]
    request_attributes: Attributes,
}

impl RowPredicate {
    /// Whether a row is visible. Row attributes shadow request attributes of
    /// the same name. Evaluation errors hide the row.
    pub fn admits(&self, row_attributes: &Attributes) -> bool {
        let mut attributes = self.request_attributes.clone();
        attributes.extend(row_attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        match self.predicate.evaluate(&attributes) {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::error!(expression = %self.expression, error = %e, "Row condition failed for row");
                false
            }
        }
    }
}

/// Rows the caller may see.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "scope", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowAccess {
    Own,
    Org,
    All,
    Custom(RowPredicate),
}

impl RowAccess {
    pub fn scope(&self) -> RowScope {
        match self {
            RowAccess::Own => RowScope::Own,
            RowAccess::Org => RowScope::Org,
            RowAccess::All => RowScope::All,
            RowAccess::Custom(_) => RowScope::Custom,
        }
    }
}

/// Outcome of an allowed request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub assignment: PermissionAssignment,
    /// The data policy that applied, if any
    pub policy: Option<DataPolicyMatch>,
    pub row_access: RowAccess,
    /// Field name to masker; fields not listed are not sensitive
    pub maskers: BTreeMap<String, FieldMasker>,
}

impl AccessDecision {
    pub fn masker(&self, field: &str) -> Option<&FieldMasker> {
        self.maskers.get(field)
    }
}

/// Facade settings, normally taken from [`AccessConfig`].
#[derive(Debug, Clone)]
pub struct FacadeOptions {
    /// Roles allowed to request force-unmask overrides
    pub unmask_roles: HashSet<String>,
    /// Literal used when a tag has no group mask rule
    pub default_fallback: String,
    pub unmatched_row_scope: UnmatchedRowScope,
}

impl Default for FacadeOptions {
    fn default() -> Self {
        Self {
            unmask_roles: HashSet::new(),
            default_fallback: "***".to_string(),
            unmatched_row_scope: UnmatchedRowScope::default(),
        }
    }
}

/// Thin composition of the decision, resolution, row-condition and masking
/// components.
#[derive(Debug, Clone)]
pub struct AccessDecisionFacade {
    decision: PermissionDecisionEngine,
    resolver: DataPolicyResolver,
    row_conditions: Arc<RowConditionEvaluator>,
    masking: MaskingEngine,
    options: FacadeOptions,
}

impl AccessDecisionFacade {
    pub fn new(
        decision: PermissionDecisionEngine,
        resolver: DataPolicyResolver,
        row_conditions: Arc<RowConditionEvaluator>,
        masking: MaskingEngine,
        options: FacadeOptions,
    ) -> Self {
        Self {
            decision,
            resolver,
            row_conditions,
            masking,
            options,
        }
    }

    /// Wire every component from configuration over `store`.
    pub fn from_config(
        store: &PolicyStore,
        config: &AccessConfig,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let cache = Arc::new(PermissionGroupCache::with_ttl(
            store.permission_groups(),
            config.cache.permission_group_ttl(),
        ));
        let masking = MaskingEngine::new(
            MaskRuleProcessor::new(
                config.masking.full_sentinel.clone(),
                config.masking.unknown_rule,
            ),
            Arc::new(
                PolicyMaskingStrategy::new().with_always_masked_subject_types(
                    config.masking.always_masked_subject_types.iter().cloned(),
                ),
            ),
            audit_sink,
        );
        Self::new(
            PermissionDecisionEngine::new(cache),
            DataPolicyResolver::new(store.data_policies()),
            Arc::new(RowConditionEvaluator::new(
                config.row_conditions.max_expression_length,
            )),
            masking,
            FacadeOptions {
                unmask_roles: config.masking.unmask_roles.iter().cloned().collect(),
                default_fallback: config.masking.default_fallback.clone(),
                unmatched_row_scope: config.defaults.unmatched_row_scope,
            },
        )
    }

    /// Default configuration with audit events written to the log.
    pub fn with_defaults(store: &PolicyStore) -> Self {
        Self::from_config(store, &AccessConfig::default(), Arc::new(TracingAuditSink))
    }

    pub fn masking(&self) -> &MaskingEngine {
        &self.masking
    }

    pub fn permission_groups(&self) -> &Arc<PermissionGroupCache> {
        self.decision.cache()
    }

    pub fn row_conditions(&self) -> &Arc<RowConditionEvaluator> {
        &self.row_conditions
    }

    pub fn resolver(&self) -> &DataPolicyResolver {
        &self.resolver
    }

    /// Decide one request.
    ///
    /// # Errors
    /// - `PermissionDenied` when unauthenticated, the group is unknown, or the
    ///   group lacks `(feature, action)`
    /// - `Store` when groups or policies could not be loaded
    pub async fn evaluate(&self, request: &AccessRequest) -> Result<AccessDecision, AccessError> {
        let Some(group_code) = request.group_code.as_deref() else {
            tracing::debug!(feature = %request.feature, action = %request.action, "Request has no permission group");
            return Err(AccessError::denied(DenialReason::Unauthenticated));
        };

        let group = self.decision.load_group(group_code).await?;
        let assignment = self
            .decision
            .evaluate_group(&group, &request.feature, request.action)?;

        let policy = self
            .resolver
            .evaluate(&request.policy_request(), request.as_of)
            .await?;

        let row_access = self.row_access(&group, policy.as_ref(), &request.attributes);
        let maskers = self.maskers(&group, policy.as_ref(), request);

        tracing::debug!(
            group = %group_code,
            feature = %request.feature,
            action = %request.action,
            policy_id = ?policy.as_ref().map(|p| p.policy_id),
            row_scope = %row_access.scope(),
            masked_fields = maskers.len(),
            "Access granted"
        );

        Ok(AccessDecision {
            allowed: true,
            assignment,
            policy,
            row_access,
            maskers,
        })
    }

    /// Allow/deny only.
    pub async fn check_permission(
        &self,
        group_code: &str,
        feature: &str,
        action: ActionCode,
    ) -> Result<PermissionAssignment, AccessError> {
        self.decision.evaluate(group_code, feature, action).await
    }

    /// Policy resolution only.
    pub async fn resolve_policy(
        &self,
        request: &PolicyRequest,
        as_of: DateTime<Utc>,
    ) -> Result<Option<DataPolicyMatch>, AccessError> {
        self.resolver.evaluate(request, as_of).await
    }

    /// Mask one value with an explicit target, falling back to the configured literal.
    pub fn mask(&self, field: &str, value: &str, target: &MaskingTarget) -> String {
        self.masking
            .apply(value, target, &self.options.default_fallback, Some(field))
    }

    /// Compile a row condition, surfacing configuration errors.
    pub fn compile_row_condition(&self, expr: &str) -> Result<Arc<CompiledPredicate>, AccessError> {
        self.row_conditions.compile(expr)
    }

    /// Apply a decision's maskers to the top-level fields of a JSON object.
    ///
    /// Non-object values are returned unchanged.
    pub fn mask_record(&self, decision: &AccessDecision, record: &serde_json::Value) -> serde_json::Value {
        let serde_json::Value::Object(fields) = record else {
            return record.clone();
        };
        let masked = fields
            .iter()
            .map(|(name, value)| {
                let value = match decision.masker(name) {
                    Some(masker) => masker.mask_json(&self.masking, value),
                    None => value.clone(),
                };
                (name.clone(), value)
            })
            .collect();
        serde_json::Value::Object(masked)
    }

    fn row_access(
        &self,
        group: &PermissionGroup,
        policy: Option<&DataPolicyMatch>,
        attributes: &Attributes,
    ) -> RowAccess {
        let Some(policy) = policy else {
            return match self.options.unmatched_row_scope {
                UnmatchedRowScope::Own => RowAccess::Own,
                UnmatchedRowScope::GroupDefault => match group.default_row_scope {
                    RowScope::Org => RowAccess::Org,
                    RowScope::All => RowAccess::All,
                    // A group default carries no expression to narrow with
                    RowScope::Own | RowScope::Custom => RowAccess::Own,
                },
            };
        };

        let expression = policy
            .row_scope_expr
            .as_deref()
            .filter(|expr| !expr.trim().is_empty());

        let Some(expression) = expression else {
            return match policy.row_scope {
                RowScope::Own => RowAccess::Own,
                RowScope::Org => RowAccess::Org,
                RowScope::All => RowAccess::All,
                RowScope::Custom => {
                    tracing::error!(policy_id = %policy.policy_id, "CUSTOM row scope without row condition");
                    RowAccess::Own
                }
            };
        };

        let predicate = match self.row_conditions.compile(expression) {
            Ok(predicate) => predicate,
            Err(e) => {
                tracing::error!(policy_id = %policy.policy_id, error = %e, "Row condition rejected, narrowing to OWN");
                return RowAccess::Own;
            }
        };

        match predicate.evaluate(attributes) {
            Ok(true) => match policy.row_scope {
                RowScope::Own => RowAccess::Own,
                RowScope::Org => RowAccess::Org,
                RowScope::All => RowAccess::All,
                RowScope::Custom => RowAccess::Custom(RowPredicate {
                    expression: expression.to_string(),
                    predicate,
                    request_attributes: attributes.clone(),
                }),
            },
            Ok(false) => {
                tracing::debug!(policy_id = %policy.policy_id, "Row condition false, narrowing to OWN");
                RowAccess::Own
            }
            Err(e) => {
                tracing::error!(policy_id = %policy.policy_id, error = %e, "Row condition failed, narrowing to OWN");
                RowAccess::Own
            }
        }
    }

    fn maskers(
        &self,
        group: &PermissionGroup,
        policy: Option<&DataPolicyMatch>,
        request: &AccessRequest,
    ) -> BTreeMap<String, FieldMasker> {
        let eligible = request
            .requester_roles
            .iter()
            .any(|role| self.options.unmask_roles.contains(role));
        if !eligible && !request.unmask.is_empty() {
            tracing::debug!(
                feature = %request.feature,
                roles = ?request.requester_roles,
                "Unmask requested without an unmask role; ignoring"
            );
        }

        request
            .field_tags
            .iter()
            .map(|(field, tag)| {
                let rule = group.mask_rule(tag);
                let target = self.target_for(field, tag, rule, policy, request, eligible);
                let fallback = rule
                    .map(|r| r.mask_with.clone())
                    .unwrap_or_else(|| self.options.default_fallback.clone());
                (field.clone(), FieldMasker::new(field.clone(), target, fallback))
            })
            .collect()
    }

    fn target_for(
        &self,
        field: &str,
        tag: &str,
        rule: Option<&FieldMaskRule>,
        policy: Option<&DataPolicyMatch>,
        request: &AccessRequest,
        eligible: bool,
    ) -> MaskingTarget {
        let rule_audit = rule.is_some_and(|r| r.audit);
        let mut target = MaskingTarget::new(request.feature.clone(), tag)
            .with_requester_roles(request.requester_roles.clone());

        target = match policy {
            Some(policy) => target
                .with_mask_rule(policy.mask_rule.clone())
                .with_mask_params(policy.mask_params.clone())
                .with_audit(policy.audit_enabled || rule_audit),
            // No policy: default-mask with the group's literal
            None => target.with_audit(rule_audit),
        };

        if let Some(row_id) = &request.row_id {
            target = target.with_row_id(row_id.clone());
        }
        if let Some(reason) = &request.unmask.reason {
            target = target.with_reason(reason.clone());
        }

        let mut fields: HashSet<String> = HashSet::new();
        if eligible {
            target = target
                .with_force_unmask(request.unmask.all)
                .with_force_unmask_kinds(request.unmask.kinds.iter().cloned());
            fields.extend(request.unmask.fields.iter().cloned());
        }

        // The acting action may itself reveal the field
        let rule_requirement = rule.map(|r| r.required_action).unwrap_or(ActionCode::Unmask);
        let policy_requirement = policy.and_then(|p| p.required_action_code);
        if request.action.satisfies(Some(rule_requirement))
            && request.action.satisfies(policy_requirement)
        {
            fields.insert(field.to_string());
        }

        target.with_force_unmask_fields(fields)
    }
}
