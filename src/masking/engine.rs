use std::sync::Arc;

use serde_json::Value;

use super::{
    audit::{AuditSink, TracingAuditSink, UnmaskAuditEvent},
    rule::MaskRuleProcessor,
    strategy::{MaskingStrategy, PolicyMaskingStrategy},
    target::MaskingTarget,
};

/// Decides, per field, whether to mask and what to emit.
///
/// # Decision order
///
/// 1. `target.force_unmask` → raw value
/// 2. `target.data_kind` in `target.force_unmask_kinds` → raw value
/// 3. field name in `target.force_unmask_fields` → raw value
/// 4. [`MaskingStrategy::should_mask`] → transformed value (the target's rule,
///    or the caller's fallback when the target has none); otherwise raw
///
/// Targets the strategy [always masks](MaskingStrategy::always_masks) skip
/// steps 1–3 and never come out unchanged: a rule that would leave the value
/// as is gives way to the fallback.
///
/// When 1–3 reveal a value that step 4 would have changed, one
/// [`UnmaskAuditEvent`] goes to the audit sink (if the target audits).
/// Masking itself is never audited.
#[derive(Clone)]
pub struct MaskingEngine {
    processor: MaskRuleProcessor,
    strategy: Arc<dyn MaskingStrategy>,
    audit_sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for MaskingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskingEngine")
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}

impl Default for MaskingEngine {
    fn default() -> Self {
        Self::new(
            MaskRuleProcessor::default(),
            Arc::new(PolicyMaskingStrategy::default()),
            Arc::new(TracingAuditSink),
        )
    }
}

impl MaskingEngine {
    pub fn new(
        processor: MaskRuleProcessor,
        strategy: Arc<dyn MaskingStrategy>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            processor,
            strategy,
            audit_sink,
        }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn processor(&self) -> &MaskRuleProcessor {
        &self.processor
    }

    /// Mask `raw` for `target`.
    pub fn apply(
        &self,
        raw: &str,
        target: &MaskingTarget,
        masked_fallback: &str,
        field_name: Option<&str>,
    ) -> String {
        self.masked_output(raw, target, masked_fallback, field_name, true)
            .unwrap_or_else(|| raw.to_string())
    }

    /// Mask a JSON value at serialization time.
    ///
    /// Strings and numbers are masked as text. Nulls stay null. Booleans,
    /// arrays and objects are replaced by the fallback when masked, since the
    /// transforms are defined over text.
    pub fn apply_json(
        &self,
        raw: &Value,
        target: &MaskingTarget,
        masked_fallback: &str,
        field_name: Option<&str>,
    ) -> Value {
        match raw {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(self.apply(s, target, masked_fallback, field_name)),
            Value::Number(n) => {
                let text = n.to_string();
                let masked = self.apply(&text, target, masked_fallback, field_name);
                if masked == text {
                    raw.clone()
                } else {
                    Value::String(masked)
                }
            }
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                match self.masked_output(&raw.to_string(), target, masked_fallback, field_name, false)
                {
                    Some(masked) => Value::String(masked),
                    None => raw.clone(),
                }
            }
        }
    }

    /// What to emit in place of `raw`, or `None` to show it unchanged.
    ///
    /// Records an audit event when an override reveals a value that would
    /// otherwise have been changed. `textual` values go through the target's
    /// rule; the rest can only be replaced by the fallback.
    fn masked_output(
        &self,
        raw: &str,
        target: &MaskingTarget,
        masked_fallback: &str,
        field_name: Option<&str>,
        textual: bool,
    ) -> Option<String> {
        let transform = || match &target.mask_rule {
            Some(rule) if textual => self.processor.apply(rule, raw, &target.mask_params),
            _ => masked_fallback.to_string(),
        };

        if self.strategy.always_masks(target) {
            if target.override_for(field_name).is_some() {
                tracing::debug!(
                    subject_type = %target.subject_type,
                    field = ?field_name,
                    "Ignoring unmask override for always-masked subject type"
                );
            }
            let masked = transform();
            return Some(if masked == raw {
                masked_fallback.to_string()
            } else {
                masked
            });
        }

        let masked = self
            .strategy
            .should_mask(target)
            .then(transform)
            .filter(|masked| masked != raw);

        let Some(override_kind) = target.override_for(field_name) else {
            return masked;
        };

        if masked.is_some() && target.audit_enabled {
            let event = UnmaskAuditEvent::from_target(target, field_name, override_kind);
            if let Err(e) = self.audit_sink.record(event) {
                tracing::warn!(
                    subject_type = %target.subject_type,
                    data_kind = %target.data_kind,
                    field = ?field_name,
                    error = %e,
                    "Failed to record unmask audit event"
                );
            }
        }
        None
    }
}

/// Masks one output field with a target prepared for it.
///
/// Produced by the access-decision facade, applied lazily at serialization time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FieldMasker {
    pub field: String,
    pub target: MaskingTarget,
    pub masked_fallback: String,
}

impl FieldMasker {
    pub fn new(
        field: impl Into<String>,
        target: MaskingTarget,
        masked_fallback: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            target,
            masked_fallback: masked_fallback.into(),
        }
    }

    pub fn mask(&self, engine: &MaskingEngine, raw: &str) -> String {
        engine.apply(raw, &self.target, &self.masked_fallback, Some(&self.field))
    }

    pub fn mask_json(&self, engine: &MaskingEngine, raw: &Value) -> Value {
        engine.apply_json(raw, &self.target, &self.masked_fallback, Some(&self.field))
    }

    /// Same masker for another row; audit events carry the new row id.
    pub fn for_row(&self, row_id: impl Into<String>) -> Self {
        Self {
            field: self.field.clone(),
            target: self.target.clone().with_row_id(row_id),
            masked_fallback: self.masked_fallback.clone(),
        }
    }
}
