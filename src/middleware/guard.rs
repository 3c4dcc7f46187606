//! Explicit route guard.
//!
//! Protected operations are registered by key in a [`RouteTable`]. The
//! [`Guard`] resolves the key to the `(feature, action)` it requires, runs
//! the access decision and only then calls the handler with the decision.
//! Keys that were never registered are refused.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    future::Future,
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::{
    authz::{
        AccessDecision, AccessDecisionFacade, AccessError, AccessRequest, ActionCode, Attributes,
        UnmaskRequest,
    },
    config::RouteConfig,
};

/// Permission a route requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub feature: String,
    pub action: ActionCode,
}

/// Operation key to required permission.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteBinding>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `[[routes]]` config entries. Later duplicates replace earlier ones;
    /// config validation already rejects duplicates.
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        routes.iter().fold(Self::new(), |table, r| {
            table.with_route(&r.route, &r.feature, r.action)
        })
    }

    pub fn with_route(
        mut self,
        route: impl Into<String>,
        feature: impl Into<String>,
        action: ActionCode,
    ) -> Self {
        self.register(route, feature, action);
        self
    }

    pub fn register(
        &mut self,
        route: impl Into<String>,
        feature: impl Into<String>,
        action: ActionCode,
    ) {
        self.routes.insert(
            route.into(),
            RouteBinding {
                feature: feature.into(),
                action,
            },
        );
    }

    pub fn get(&self, route: &str) -> Option<&RouteBinding> {
        self.routes.get(route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Caller identity and request details, without the permission being checked.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub group_code: Option<String>,
    pub org_policy_id: Option<String>,
    pub org_group_codes: HashSet<String>,
    pub business_type: Option<String>,
    pub attributes: Attributes,
    pub requester_roles: Vec<String>,
    pub field_tags: BTreeMap<String, String>,
    pub unmask: UnmaskRequest,
    pub row_id: Option<String>,
    /// Defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn for_group(code: impl Into<String>) -> Self {
        Self {
            group_code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, tag: impl Into<String>) -> Self {
        self.field_tags.insert(field.into(), tag.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_requester_roles(mut self, roles: Vec<String>) -> Self {
        self.requester_roles = roles;
        self
    }

    pub fn with_unmask(mut self, unmask: UnmaskRequest) -> Self {
        self.unmask = unmask;
        self
    }

    fn into_request(self, binding: &RouteBinding) -> AccessRequest {
        AccessRequest {
            feature: binding.feature.clone(),
            action: binding.action,
            group_code: self.group_code,
            org_policy_id: self.org_policy_id,
            org_group_codes: self.org_group_codes,
            business_type: self.business_type,
            attributes: self.attributes,
            requester_roles: self.requester_roles,
            field_tags: self.field_tags,
            unmask: self.unmask,
            row_id: self.row_id,
            as_of: self.as_of.unwrap_or_else(Utc::now),
        }
    }
}

/// Wraps protected operations with an access decision.
#[derive(Debug, Clone)]
pub struct Guard {
    facade: Arc<AccessDecisionFacade>,
    routes: Arc<RouteTable>,
}

impl Guard {
    pub fn new(facade: Arc<AccessDecisionFacade>, routes: RouteTable) -> Self {
        Self {
            facade,
            routes: Arc::new(routes),
        }
    }

    pub fn facade(&self) -> &Arc<AccessDecisionFacade> {
        &self.facade
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide `route` for `context` without running anything.
    ///
    /// # Errors
    /// `UnknownRoute` if `route` is not registered, otherwise whatever the
    /// facade returns.
    pub async fn authorize(
        &self,
        route: &str,
        context: RequestContext,
    ) -> Result<AccessDecision, AccessError> {
        let Some(binding) = self.routes.get(route) else {
            tracing::warn!(route = %route, "Refusing unregistered route");
            return Err(AccessError::UnknownRoute(route.to_string()));
        };

        let request = context.into_request(binding);
        self.facade.evaluate(&request).await.inspect_err(|e| {
            tracing::debug!(
                route = %route,
                feature = %binding.feature,
                action = %binding.action,
                error = %e,
                "Guard refused request"
            );
        })
    }

    /// Authorize `route`, then run `handler` with the decision.
    ///
    /// The handler is not called when the decision fails.
    pub async fn run<F, Fut, T>(
        &self,
        route: &str,
        context: RequestContext,
        handler: F,
    ) -> Result<T, AccessError>
    where
        F: FnOnce(AccessDecision) -> Fut,
        Fut: Future<Output = T>,
    {
        let decision = self.authorize(route, context).await?;
        Ok(handler(decision).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        authz::DenialReason,
        db::{PolicyDocument, PolicyStore},
        models::RowScope,
    };

    const POLICIES: &str = r#"
        [[permission_groups]]
        code = "ANALYST"
        name = "Analyst"
        assignments = [{ feature = "CUSTOMER", action = "READ" }]
        mask_rules = [{ tag = "PHONE", mask_with = "***-****" }]

        [[data_policies]]
        feature_code = "CUSTOMER"
        perm_group_code = "ANALYST"
        row_scope = "ORG"
        default_mask_rule = "PARTIAL"
        priority = 10
    "#;

    fn guard() -> Guard {
        let store = PolicyStore::from_document(PolicyDocument::from_str(POLICIES).unwrap());
        let facade = Arc::new(AccessDecisionFacade::with_defaults(&store));
        let routes = RouteTable::new()
            .with_route("customers.list", "CUSTOMER", ActionCode::Read)
            .with_route("customers.export", "CUSTOMER", ActionCode::Export);
        Guard::new(facade, routes)
    }

    #[tokio::test]
    async fn test_allowed_route_runs_handler() {
        let guard = guard();
        let facade = guard.facade().clone();
        let context = RequestContext::for_group("ANALYST").with_field("phone", "PHONE");

        let masked = guard
            .run("customers.list", context, |decision| async move {
                assert_eq!(decision.row_access.scope(), RowScope::Org);
                decision
                    .masker("phone")
                    .map(|m| m.mask(facade.masking(), "01012345678"))
                    .unwrap_or_default()
            })
            .await
            .unwrap();

        assert_ne!(masked, "01012345678");
    }

    #[tokio::test]
    async fn test_denied_route_skips_handler() {
        let guard = guard();
        let called = AtomicBool::new(false);

        let result = guard
            .run(
                "customers.export",
                RequestContext::for_group("ANALYST"),
                |_| async { called.store(true, Ordering::SeqCst) },
            )
            .await;

        assert!(matches!(
            result,
            Err(AccessError::PermissionDenied(
                DenialReason::InsufficientPermission { .. }
            ))
        ));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_route_is_refused() {
        let guard = guard();
        let err = guard
            .authorize("customers.delete", RequestContext::for_group("ANALYST"))
            .await
            .unwrap_err();
        assert!(err.is_denial());
        assert!(matches!(err, AccessError::UnknownRoute(r) if r == "customers.delete"));
    }

    #[tokio::test]
    async fn test_missing_group_is_unauthenticated() {
        let guard = guard();
        let result = guard
            .authorize(
                "customers.list",
                RequestContext::default().with_attribute("org_code", json!("HQ")),
            )
            .await;
        assert!(matches!(
            result,
            Err(AccessError::PermissionDenied(DenialReason::Unauthenticated))
        ));
    }

    #[test]
    fn test_route_table_from_config() {
        let table = RouteTable::from_config(&[RouteConfig {
            route: "orders.approve".to_string(),
            feature: "ORDER".to_string(),
            action: ActionCode::Approve,
        }]);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("orders.approve"),
            Some(&RouteBinding {
                feature: "ORDER".to_string(),
                action: ActionCode::Approve,
            })
        );
        assert!(table.get("orders.list").is_none());
    }
}
