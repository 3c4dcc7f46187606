use std::{path::PathBuf, sync::Arc};

use accessgate::{
    AccessConfig, AccessDecisionFacade, AccessRequest,
    authz::{ActionCode, PolicyRequest, RowConditionEvaluator, UnmaskRequest},
    db::{PolicyDocument, PolicyStore},
    masking::{ConfiguredMaskRule, MaskParams, MaskRuleProcessor, TracingAuditSink},
    observability::init_tracing,
    services::DataPolicyService,
};
use chrono::{DateTime, Utc};
use clap::Parser;

/// CLI arguments for accessgate
#[derive(Parser, Debug)]
#[command(version, about = "Policy-driven access decisions and field masking", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to engine config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Validate a policy document, compiling every row condition
    Check {
        /// Policy document (TOML)
        #[arg(short, long)]
        policies: PathBuf,
    },
    /// Run a full access decision and print it as JSON
    Evaluate {
        #[command(flatten)]
        target: TargetArgs,
        /// Requester role (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
        /// Attribute visible to row conditions, `name=value`; values are parsed as JSON
        /// when possible (repeatable)
        #[arg(long = "attr", value_parser = parse_key_value)]
        attributes: Vec<(String, String)>,
        /// Output field and its sensitive-data tag, `field=TAG` (repeatable)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Request that every field be revealed
        #[arg(long)]
        unmask_all: bool,
        /// Request that a data kind be revealed (repeatable)
        #[arg(long)]
        unmask_kind: Vec<String>,
        /// Request that a field be revealed (repeatable)
        #[arg(long)]
        unmask_field: Vec<String>,
        /// Reason recorded with unmask audit events
        #[arg(long)]
        reason: Option<String>,
        /// Row identifier recorded with unmask audit events
        #[arg(long)]
        row_id: Option<String>,
        /// JSON object to mask with the resulting decision
        #[arg(long)]
        record: Option<String>,
    },
    /// Show how every active policy compares against a request
    Simulate {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Apply one mask rule to a value
    Mask {
        /// Rule name (NONE, PARTIAL, FULL, HASH, TOKENIZE)
        #[arg(short, long)]
        rule: String,
        /// Value to mask
        value: String,
        /// Mask parameters as JSON, e.g. '{"keep_prefix": 3}'
        #[arg(long)]
        params: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Policy document (TOML)
    #[arg(short, long)]
    policies: PathBuf,
    /// Feature code
    #[arg(short, long)]
    feature: String,
    /// Action code
    #[arg(short, long, default_value = "READ")]
    action: ActionCode,
    /// Permission group of the caller
    #[arg(short, long)]
    group: Option<String>,
    #[arg(long)]
    org_policy: Option<String>,
    /// Org group of the caller (repeatable)
    #[arg(long = "org-group")]
    org_groups: Vec<String>,
    #[arg(long)]
    business_type: Option<String>,
    /// Evaluation instant (RFC 3339, defaults to now)
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("Expected name=value, got '{}'", s))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AccessConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        None => AccessConfig::default(),
    };

    if let Err(e) = init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match args.command {
        Command::Check { policies } => run_check(&config, &policies),
        Command::Evaluate {
            target,
            roles,
            attributes,
            fields,
            unmask_all,
            unmask_kind,
            unmask_field,
            reason,
            row_id,
            record,
        } => {
            let mut request = AccessRequest::new(&target.feature, target.action)
                .with_requester_roles(roles)
                .with_org_groups(target.org_groups.iter().cloned())
                .with_unmask(UnmaskRequest {
                    all: unmask_all,
                    kinds: unmask_kind.into_iter().collect(),
                    fields: unmask_field.into_iter().collect(),
                    reason,
                });
            request.group_code = target.group.clone();
            request.org_policy_id = target.org_policy.clone();
            request.business_type = target.business_type.clone();
            request.row_id = row_id;
            if let Some(as_of) = target.as_of {
                request = request.with_as_of(as_of);
            }
            for (name, value) in attributes {
                let value = serde_json::from_str(&value)
                    .unwrap_or(serde_json::Value::String(value));
                request = request.with_attribute(name, value);
            }
            for (field, tag) in fields {
                request = request.with_field(field, tag);
            }
            run_evaluate(&config, &target.policies, request, record.as_deref()).await;
        }
        Command::Simulate { target } => run_simulate(&config, target).await,
        Command::Mask {
            rule,
            value,
            params,
        } => run_mask(&config, &rule, &value, params.as_deref()),
    }
}

fn load_store(policies: &PathBuf) -> PolicyStore {
    match PolicyDocument::from_file(policies) {
        Ok(document) => PolicyStore::from_document(document),
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", policies.display(), e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Validate a policy document
fn run_check(config: &AccessConfig, policies: &PathBuf) {
    let document = match PolicyDocument::from_file(policies) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let row_conditions = Arc::new(RowConditionEvaluator::new(
        config.row_conditions.max_expression_length,
    ));
    let store = PolicyStore::from_document(document.clone());
    let service = DataPolicyService::new(store.data_policies(), row_conditions);

    let mut failures = 0;
    for policy in &document.data_policies {
        if let Err(e) = service.validate(policy) {
            eprintln!("Policy {} (priority {}): {}", policy.id, policy.priority, e);
            failures += 1;
        }
    }

    if failures > 0 {
        eprintln!("{} invalid data policies", failures);
        std::process::exit(1);
    }

    println!(
        "OK: {} permission groups, {} data policies",
        document.permission_groups.len(),
        document.data_policies.len()
    );
}

/// Run the facade for one request
async fn run_evaluate(
    config: &AccessConfig,
    policies: &PathBuf,
    request: AccessRequest,
    record: Option<&str>,
) {
    let store = load_store(policies);
    let facade = AccessDecisionFacade::from_config(&store, config, Arc::new(TracingAuditSink));

    let decision = match facade.evaluate(&request).await {
        Ok(decision) => decision,
        Err(e) if e.is_denial() => {
            print_json(&serde_json::json!({ "allowed": false, "reason": e.to_string() }));
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match record {
        Some(record) => {
            let record: serde_json::Value = match serde_json::from_str(record) {
                Ok(record) => record,
                Err(e) => {
                    eprintln!("Error: invalid --record JSON: {}", e);
                    std::process::exit(1);
                }
            };
            let masked = facade.mask_record(&decision, &record);
            print_json(&serde_json::json!({ "decision": decision, "record": masked }));
        }
        None => print_json(&decision),
    }
}

/// Print the resolver trace for a request
async fn run_simulate(config: &AccessConfig, target: TargetArgs) {
    let store = load_store(&target.policies);
    let facade = AccessDecisionFacade::from_config(&store, config, Arc::new(TracingAuditSink));

    let mut request = PolicyRequest::new(&target.feature)
        .with_action(target.action)
        .with_org_groups(target.org_groups.iter().cloned());
    if let Some(group) = &target.group {
        request = request.with_perm_group(group);
    }
    if let Some(id) = &target.org_policy {
        request = request.with_org_policy(id);
    }
    if let Some(business_type) = &target.business_type {
        request = request.with_business_type(business_type);
    }

    let as_of = target.as_of.unwrap_or_else(Utc::now);
    match facade.resolver().simulate(&request, as_of).await {
        Ok(simulation) => print_json(&simulation),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Apply a single mask rule
fn run_mask(config: &AccessConfig, rule: &str, value: &str, params: Option<&str>) {
    let params: MaskParams = match params.map(serde_json::from_str).transpose() {
        Ok(params) => params.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: invalid --params JSON: {}", e);
            std::process::exit(1);
        }
    };

    let processor = MaskRuleProcessor::new(
        config.masking.full_sentinel.clone(),
        config.masking.unknown_rule,
    );
    let rule = ConfiguredMaskRule::from(rule);
    println!("{}", processor.apply(&rule, value, &params));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        Args::try_parse_from(std::iter::once("accessgate").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_check_args() {
        let Command::Check { policies } = parse(&["check", "-p", "policies.toml"]) else {
            panic!("expected check");
        };
        assert_eq!(policies, PathBuf::from("policies.toml"));

        assert!(Args::try_parse_from(["accessgate", "check"]).is_err());
    }

    #[test]
    fn test_evaluate_args() {
        let command = parse(&[
            "evaluate",
            "-p",
            "policies.toml",
            "-f",
            "CUSTOMER",
            "-g",
            "ANALYST",
            "--org-group",
            "SEOUL",
            "--org-group",
            "BUSAN",
            "--role",
            "auditor",
            "--attr",
            "grade=3",
            "--attr",
            "org_code=HQ",
            "--field",
            "ssn=SSN",
            "--unmask-kind",
            "SSN",
            "--unmask-field",
            "phone",
            "--reason",
            "fraud review",
            "--row-id",
            "row-9",
            "--as-of",
            "2026-05-04T12:00:00Z",
        ]);
        let Command::Evaluate {
            target,
            roles,
            attributes,
            fields,
            unmask_all,
            unmask_kind,
            unmask_field,
            reason,
            row_id,
            record,
        } = command
        else {
            panic!("expected evaluate");
        };

        assert_eq!(target.feature, "CUSTOMER");
        assert_eq!(target.action, ActionCode::Read);
        assert_eq!(target.group.as_deref(), Some("ANALYST"));
        assert_eq!(target.org_groups, vec!["SEOUL", "BUSAN"]);
        assert_eq!(
            target.as_of.map(|t| t.to_rfc3339()).as_deref(),
            Some("2026-05-04T12:00:00+00:00")
        );
        assert_eq!(roles, vec!["auditor"]);
        assert_eq!(
            attributes,
            vec![
                ("grade".to_string(), "3".to_string()),
                ("org_code".to_string(), "HQ".to_string()),
            ]
        );
        assert_eq!(fields, vec![("ssn".to_string(), "SSN".to_string())]);
        assert!(!unmask_all);
        assert_eq!(unmask_kind, vec!["SSN"]);
        assert_eq!(unmask_field, vec!["phone"]);
        assert_eq!(reason.as_deref(), Some("fraud review"));
        assert_eq!(row_id.as_deref(), Some("row-9"));
        assert!(record.is_none());
    }

    #[test]
    fn test_evaluate_rejects_malformed_attribute() {
        let result = Args::try_parse_from([
            "accessgate",
            "evaluate",
            "-p",
            "policies.toml",
            "-f",
            "CUSTOMER",
            "--attr",
            "grade",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_simulate_args() {
        let Command::Simulate { target } = parse(&[
            "simulate",
            "-p",
            "policies.toml",
            "-f",
            "CUSTOMER",
            "-a",
            "export",
            "--org-policy",
            "OP-1",
            "--business-type",
            "RETAIL",
        ]) else {
            panic!("expected simulate");
        };
        assert_eq!(target.action, ActionCode::Export);
        assert_eq!(target.org_policy.as_deref(), Some("OP-1"));
        assert_eq!(target.business_type.as_deref(), Some("RETAIL"));
        assert!(target.group.is_none());
        assert!(target.as_of.is_none());

        assert!(
            Args::try_parse_from([
                "accessgate",
                "simulate",
                "-p",
                "policies.toml",
                "-f",
                "CUSTOMER",
                "-a",
                "PUBLISH",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_mask_args() {
        let Command::Mask {
            rule,
            value,
            params,
        } = parse(&["mask", "-r", "PARTIAL", "01012345678", "--params", r#"{"keep_prefix": 3}"#])
        else {
            panic!("expected mask");
        };
        assert_eq!(rule, "PARTIAL");
        assert_eq!(value, "01012345678");
        assert_eq!(params.as_deref(), Some(r#"{"keep_prefix": 3}"#));
    }

    #[test]
    fn test_global_config_flag() {
        let args = Args::try_parse_from([
            "accessgate",
            "mask",
            "-r",
            "HASH",
            "secret",
            "--config",
            "accessgate.toml",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("accessgate.toml")));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value(" grade =3=4"),
            Ok(("grade".to_string(), "3=4".to_string()))
        );
        assert!(parse_key_value("=3").is_err());
        assert!(parse_key_value("grade").is_err());
    }
}
