//! Row conditions: boolean CEL expressions over the request's attributes.
//!
//! Attributes are bound as top-level variables, so a stored condition reads
//! like `org_code == 'HQ' && grade >= 3`. A variable the expression names but
//! the request does not carry is bound to `null`. Equality against it is
//! false, and so are ordering and `in` tests with a `null` operand. Only that
//! comparison fails: `grade > 1 || org_code == 'HQ'` still admits an HQ row
//! that carries no grade. The leniency reaches comparisons under `&&`, `||`,
//! `!` and `?:`; comparisons inside macros and other calls keep the
//! interpreter's strict behavior.
//!
//! Compiled programs are cached by exact source text. The cache is append-only
//! and bounded by the number of distinct stored expressions.

use std::{collections::BTreeMap, sync::Arc};
#[cfg(feature = "cel")]
use std::{collections::HashSet, panic};

#[cfg(feature = "cel")]
use cel_interpreter::{
    Context, ExecutionError, ResolveResult, Value,
    objects::{Key, Map},
};
#[cfg(feature = "cel")]
use cel_parser::{
    Expression, Parser,
    ast::{Expr, operators},
};
use dashmap::DashMap;

use super::error::AccessError;

/// Request attributes visible to row conditions.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Default cap on expression source length, in bytes.
pub const DEFAULT_MAX_EXPRESSION_LENGTH: usize = 4096;

/// A row condition compiled once and evaluated many times.
pub struct CompiledPredicate {
    source: String,
    #[cfg(feature = "cel")]
    expression: Expression,
    #[cfg(feature = "cel")]
    variables: Vec<String>,
}

impl std::fmt::Debug for CompiledPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPredicate")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl CompiledPredicate {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(feature = "cel")]
impl CompiledPredicate {
    fn compile(source: &str) -> Result<Self, AccessError> {
        // The CEL parser can panic on some malformed input instead of erroring
        let result =
            panic::catch_unwind(panic::AssertUnwindSafe(|| Parser::default().parse(source)));
        let expression = match result {
            Ok(Ok(expression)) => expression,
            Ok(Err(e)) => {
                return Err(AccessError::configuration(format!(
                    "Invalid row condition '{}': {}",
                    source, e
                )));
            }
            Err(_) => {
                return Err(AccessError::configuration(format!(
                    "Invalid row condition '{}': malformed syntax",
                    source
                )));
            }
        };

        let variables: HashSet<String> = expression
            .references()
            .variables()
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(Self {
            source: source.to_string(),
            expression,
            variables: variables.into_iter().collect(),
        })
    }

    /// Evaluate against `attributes`.
    ///
    /// # Errors
    /// `PolicyConfiguration` when evaluation fails or yields a non-boolean.
    pub fn evaluate(&self, attributes: &Attributes) -> Result<bool, AccessError> {
        let mut ctx = Context::default();
        for name in &self.variables {
            let value = attributes.get(name).map_or(Value::Null, json_to_cel);
            ctx.add_variable_from_value(name.as_str(), value);
        }

        let exec_result =
            panic::catch_unwind(panic::AssertUnwindSafe(|| resolve(&self.expression, &ctx)));

        match exec_result {
            Ok(Ok(Value::Bool(b))) => Ok(b),
            Ok(Ok(other)) => Err(AccessError::configuration(format!(
                "Row condition '{}' must evaluate to a boolean, got {:?}",
                self.source, other
            ))),
            Ok(Err(e)) => Err(AccessError::configuration(format!(
                "Row condition '{}' failed: {}",
                self.source, e
            ))),
            Err(_) => Err(AccessError::configuration(format!(
                "Row condition '{}' failed (internal error)",
                self.source
            ))),
        }
    }
}

/// Resolve `expr`, treating a `null` operand of an ordering or `in` test as a
/// false comparison instead of an error.
#[cfg(feature = "cel")]
fn resolve(expr: &Expression, ctx: &Context) -> ResolveResult {
    let Expr::Call(call) = &expr.expr else {
        return Value::resolve(expr, ctx);
    };
    if call.target.is_some() {
        return Value::resolve(expr, ctx);
    }

    match (call.func_name.as_str(), call.args.as_slice()) {
        (operators::LOGICAL_OR, [left, right]) => {
            if truthy(resolve(left, ctx)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(resolve(right, ctx)?)?))
        }
        (operators::LOGICAL_AND, [left, right]) => {
            if !truthy(resolve(left, ctx)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(resolve(right, ctx)?)?))
        }
        (operators::LOGICAL_NOT, [operand]) => Ok(Value::Bool(!truthy(resolve(operand, ctx)?)?)),
        (operators::CONDITIONAL, [condition, then, otherwise]) => {
            if truthy(resolve(condition, ctx)?)? {
                resolve(then, ctx)
            } else {
                resolve(otherwise, ctx)
            }
        }
        (
            op @ (operators::LESS
            | operators::LESS_EQUALS
            | operators::GREATER
            | operators::GREATER_EQUALS),
            [left, right],
        ) => {
            let left = resolve(left, ctx)?;
            let right = resolve(right, ctx)?;
            if matches!(left, Value::Null) || matches!(right, Value::Null) {
                return Ok(Value::Bool(false));
            }
            let Some(ordering) = left.partial_cmp(&right) else {
                return Err(ExecutionError::ValuesNotComparable(left, right));
            };
            Ok(Value::Bool(match op {
                operators::LESS => ordering.is_lt(),
                operators::LESS_EQUALS => ordering.is_le(),
                operators::GREATER => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        (operators::IN, [left, _]) => match resolve(left, ctx)? {
            Value::Null => Ok(Value::Bool(false)),
            _ => Value::resolve(expr, ctx),
        },
        _ => Value::resolve(expr, ctx),
    }
}

/// Boolean operand of a connective. An absent attribute reads as false.
#[cfg(feature = "cel")]
fn truthy(value: Value) -> Result<bool, ExecutionError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(ExecutionError::UnexpectedType {
            got: format!("{:?}", other),
            want: "bool".to_string(),
        }),
    }
}

/// JSON attribute to CEL value. Integers prefer `Int` so they compare with
/// integer literals.
#[cfg(feature = "cel")]
fn json_to_cel(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
        serde_json::Value::String(s) => Value::String(Arc::new(s.clone())),
        serde_json::Value::Array(items) => {
            Value::List(Arc::new(items.iter().map(json_to_cel).collect()))
        }
        serde_json::Value::Object(fields) => {
            let map = fields
                .iter()
                .map(|(k, v)| (Key::from(k.clone()), json_to_cel(v)))
                .collect::<std::collections::HashMap<_, _>>();
            Value::Map(Map { map: Arc::new(map) })
        }
    }
}

#[cfg(not(feature = "cel"))]
impl CompiledPredicate {
    fn compile(_source: &str) -> Result<Self, AccessError> {
        Err(AccessError::configuration(
            "Row conditions require the 'cel' feature to be enabled",
        ))
    }

    pub fn evaluate(&self, _attributes: &Attributes) -> Result<bool, AccessError> {
        Err(AccessError::configuration(
            "Row conditions require the 'cel' feature to be enabled",
        ))
    }
}

/// Compiled predicates keyed by exact source text.
///
/// Reads never block each other. Two threads compiling the same new
/// expression may both compile it; the first insert wins and both callers get
/// the cached program.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: DashMap<String, Arc<CompiledPredicate>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<Arc<CompiledPredicate>> {
        self.entries.get(source).map(|entry| entry.clone())
    }

    /// Insert unless present; returns whichever predicate ends up cached.
    pub fn insert_if_absent(&self, predicate: CompiledPredicate) -> Arc<CompiledPredicate> {
        self.entries
            .entry(predicate.source.clone())
            .or_insert_with(|| Arc::new(predicate))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Compiles and evaluates row conditions with caching.
#[derive(Debug)]
pub struct RowConditionEvaluator {
    cache: ExpressionCache,
    max_expression_length: usize,
}

impl Default for RowConditionEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXPRESSION_LENGTH)
    }
}

impl RowConditionEvaluator {
    /// `max_expression_length` of 0 disables the length check.
    pub fn new(max_expression_length: usize) -> Self {
        Self {
            cache: ExpressionCache::new(),
            max_expression_length,
        }
    }

    pub fn cache(&self) -> &ExpressionCache {
        &self.cache
    }

    /// Compile `source`, reusing a cached program for identical text.
    ///
    /// # Errors
    /// `PolicyConfiguration` for blank, oversized or malformed expressions.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledPredicate>, AccessError> {
        if let Some(predicate) = self.cache.get(source) {
            return Ok(predicate);
        }

        if source.trim().is_empty() {
            return Err(AccessError::configuration("Row condition is empty"));
        }
        if self.max_expression_length > 0 && source.len() > self.max_expression_length {
            return Err(AccessError::configuration(format!(
                "Row condition length ({} bytes) exceeds maximum ({} bytes)",
                source.len(),
                self.max_expression_length
            )));
        }

        let predicate = CompiledPredicate::compile(source)?;
        tracing::debug!(expression = %source, "Compiled row condition");
        Ok(self.cache.insert_if_absent(predicate))
    }

    /// Evaluate `source` against `attributes`. A blank expression admits every row.
    pub fn evaluate(&self, source: &str, attributes: &Attributes) -> Result<bool, AccessError> {
        if source.trim().is_empty() {
            return Ok(true);
        }
        self.compile(source)?.evaluate(attributes)
    }
}
