//! Mask transforms.
//!
//! [`MaskRuleProcessor::apply`] is a deterministic, side-effect-free function of
//! `(rule, value, params)`. The only configuration it carries decides what to
//! do with rule names that are not part of the closed [`MaskRule`] set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Sentinel emitted by [`MaskRule::Full`] unless overridden.
pub const DEFAULT_FULL_SENTINEL: &str = "[MASKED]";

/// Namespace for content-derived tokens. Changing it changes every token.
const TOKEN_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9b4d_4f0a_8e57_2d61_c0b9_7e14);

/// The closed set of mask transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskRule {
    None,
    Partial,
    Full,
    /// SHA-256, lowercase hex. A non-reversible display transform, not a
    /// credential hash: it is unsalted so equal inputs render equally.
    Hash,
    /// Stable identifier derived from the value bytes.
    Tokenize,
}

impl MaskRule {
    pub fn as_str(self) -> &'static str {
        match self {
            MaskRule::None => "NONE",
            MaskRule::Partial => "PARTIAL",
            MaskRule::Full => "FULL",
            MaskRule::Hash => "HASH",
            MaskRule::Tokenize => "TOKENIZE",
        }
    }

    /// Parse a rule name, case-insensitively. `None` for names outside the set.
    pub fn parse(name: &str) -> Option<MaskRule> {
        match name.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(MaskRule::None),
            "PARTIAL" => Some(MaskRule::Partial),
            "FULL" => Some(MaskRule::Full),
            "HASH" => Some(MaskRule::Hash),
            "TOKENIZE" => Some(MaskRule::Tokenize),
            _ => None,
        }
    }
}

impl std::fmt::Display for MaskRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mask rule as named by stored configuration.
///
/// Names outside the closed set are kept verbatim so they can be reported
/// when applied instead of failing the whole policy load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConfiguredMaskRule {
    Known(MaskRule),
    Unknown(String),
}

impl ConfiguredMaskRule {
    pub fn known(&self) -> Option<MaskRule> {
        match self {
            ConfiguredMaskRule::Known(rule) => Some(*rule),
            ConfiguredMaskRule::Unknown(_) => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ConfiguredMaskRule::Known(MaskRule::None))
    }
}

impl Default for ConfiguredMaskRule {
    fn default() -> Self {
        ConfiguredMaskRule::Known(MaskRule::Full)
    }
}

impl From<MaskRule> for ConfiguredMaskRule {
    fn from(rule: MaskRule) -> Self {
        ConfiguredMaskRule::Known(rule)
    }
}

impl From<String> for ConfiguredMaskRule {
    fn from(name: String) -> Self {
        match MaskRule::parse(&name) {
            Some(rule) => ConfiguredMaskRule::Known(rule),
            None => ConfiguredMaskRule::Unknown(name),
        }
    }
}

impl From<&str> for ConfiguredMaskRule {
    fn from(name: &str) -> Self {
        ConfiguredMaskRule::from(name.to_string())
    }
}

impl From<ConfiguredMaskRule> for String {
    fn from(rule: ConfiguredMaskRule) -> Self {
        rule.to_string()
    }
}

impl std::fmt::Display for ConfiguredMaskRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfiguredMaskRule::Known(rule) => f.write_str(rule.as_str()),
            ConfiguredMaskRule::Unknown(name) => f.write_str(name),
        }
    }
}

/// Optional per-policy parameters for the transforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaskParams {
    /// Replacement character for PARTIAL (default `*`).
    #[serde(default)]
    pub mask_char: Option<char>,
    /// Characters kept at the start by PARTIAL (default 2).
    #[serde(default)]
    pub keep_prefix: Option<usize>,
    /// Characters kept at the end by PARTIAL (default 2).
    #[serde(default)]
    pub keep_suffix: Option<usize>,
    /// Values this short or shorter are fully replaced by PARTIAL (default 4).
    #[serde(default)]
    pub short_threshold: Option<usize>,
    /// Overrides the FULL sentinel.
    #[serde(default)]
    pub sentinel: Option<String>,
    /// Prefix for TOKENIZE output (default `tok_`).
    #[serde(default)]
    pub token_prefix: Option<String>,
}

/// What to do when a policy names a rule outside the closed set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownMaskRuleBehavior {
    /// Return the value unmasked. Fail-open; kept as the default so existing
    /// deployments behave as before.
    #[default]
    PassThrough,
    /// Treat the unknown rule as FULL.
    FullMask,
}

/// Applies mask transforms.
#[derive(Debug, Clone)]
pub struct MaskRuleProcessor {
    full_sentinel: String,
    unknown_rule: UnknownMaskRuleBehavior,
}

impl Default for MaskRuleProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_FULL_SENTINEL, UnknownMaskRuleBehavior::default())
    }
}

impl MaskRuleProcessor {
    pub fn new(full_sentinel: impl Into<String>, unknown_rule: UnknownMaskRuleBehavior) -> Self {
        Self {
            full_sentinel: full_sentinel.into(),
            unknown_rule,
        }
    }

    /// Apply a configured rule to `value`.
    pub fn apply(&self, rule: &ConfiguredMaskRule, value: &str, params: &MaskParams) -> String {
        match rule {
            ConfiguredMaskRule::Known(rule) => self.apply_rule(*rule, value, params),
            ConfiguredMaskRule::Unknown(name) => {
                tracing::warn!(
                    rule = %name,
                    behavior = ?self.unknown_rule,
                    "Unknown mask rule in policy configuration"
                );
                match self.unknown_rule {
                    UnknownMaskRuleBehavior::PassThrough => value.to_string(),
                    UnknownMaskRuleBehavior::FullMask => {
                        self.apply_rule(MaskRule::Full, value, params)
                    }
                }
            }
        }
    }

    /// Apply one of the closed-set rules to `value`.
    pub fn apply_rule(&self, rule: MaskRule, value: &str, params: &MaskParams) -> String {
        match rule {
            MaskRule::None => value.to_string(),
            MaskRule::Full => params
                .sentinel
                .clone()
                .unwrap_or_else(|| self.full_sentinel.clone()),
            MaskRule::Partial => partial_mask(value, params),
            MaskRule::Hash => hash_value(value),
            MaskRule::Tokenize => tokenize_value(value, params),
        }
    }
}

/// Keep the first and last few characters, replacing the interior one for one.
///
/// Lengths are counted in `char`s so multi-byte text keeps its shape.
fn partial_mask(value: &str, params: &MaskParams) -> String {
    let mask_char = params.mask_char.unwrap_or('*');
    let keep_prefix = params.keep_prefix.unwrap_or(2);
    let keep_suffix = params.keep_suffix.unwrap_or(2);
    let short_threshold = params.short_threshold.unwrap_or(4);

    let chars: Vec<char> = value.chars().collect();
    let len = chars.len();

    if len <= short_threshold || len <= keep_prefix + keep_suffix {
        return std::iter::repeat_n(mask_char, len).collect();
    }

    let mut masked = String::with_capacity(value.len());
    masked.extend(&chars[..keep_prefix]);
    masked.extend(std::iter::repeat_n(mask_char, len - keep_prefix - keep_suffix));
    masked.extend(&chars[len - keep_suffix..]);
    masked
}

fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn tokenize_value(value: &str, params: &MaskParams) -> String {
    let token = Uuid::new_v5(&TOKEN_NAMESPACE, value.as_bytes());
    let prefix = params.token_prefix.as_deref().unwrap_or("tok_");
    format!("{}{}", prefix, token.simple())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn apply(rule: MaskRule, value: &str) -> String {
        MaskRuleProcessor::default().apply_rule(rule, value, &MaskParams::default())
    }

    #[test]
    fn test_none_leaves_value_unchanged() {
        assert_eq!(apply(MaskRule::None, "01012345678"), "01012345678");
    }

    #[test]
    fn test_full_uses_sentinel() {
        assert_eq!(apply(MaskRule::Full, "secret"), "[MASKED]");

        let params = MaskParams {
            sentinel: Some("<hidden>".to_string()),
            ..Default::default()
        };
        let processor = MaskRuleProcessor::default();
        assert_eq!(
            processor.apply_rule(MaskRule::Full, "secret", &params),
            "<hidden>"
        );
    }

    #[rstest]
    #[case("01012345678", "01*******78")]
    #[case("abcde", "ab*de")]
    #[case("abcd", "****")]
    #[case("abc", "***")]
    #[case("", "")]
    fn test_partial_keeps_two_and_two(#[case] input: &str, #[case] expected: &str) {
        let masked = apply(MaskRule::Partial, input);
        assert_eq!(masked, expected);
        assert_eq!(masked.chars().count(), input.chars().count());
    }

    #[test]
    fn test_partial_counts_characters_not_bytes() {
        let masked = apply(MaskRule::Partial, "홍길동전입니다");
        assert_eq!(masked, "홍길***니다");
        assert_eq!(masked.chars().count(), 7);

        // Four multi-byte characters are still "short"
        assert_eq!(apply(MaskRule::Partial, "홍길동전"), "****");
    }

    #[test]
    fn test_partial_respects_params() {
        let params = MaskParams {
            mask_char: Some('#'),
            keep_prefix: Some(0),
            keep_suffix: Some(4),
            short_threshold: Some(4),
            ..Default::default()
        };
        let processor = MaskRuleProcessor::default();
        assert_eq!(
            processor.apply_rule(MaskRule::Partial, "4111111111111111", &params),
            "############1111"
        );
    }

    #[test]
    fn test_hash_is_deterministic_sha256_hex() {
        let first = apply(MaskRule::Hash, "900101-1234567");
        let second = apply(MaskRule::Hash, "900101-1234567");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // Known SHA-256 of "abc"
        assert_eq!(
            apply(MaskRule::Hash, "abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(apply(MaskRule::Hash, "abc"), apply(MaskRule::Hash, "abd"));
    }

    #[test]
    fn test_tokenize_is_stable_and_content_derived() {
        let first = apply(MaskRule::Tokenize, "kim@example.com");
        let second = apply(MaskRule::Tokenize, "kim@example.com");
        let other = apply(MaskRule::Tokenize, "lee@example.com");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.starts_with("tok_"));
        assert_eq!(first.len(), "tok_".len() + 32);
    }

    #[test]
    fn test_unknown_rule_passes_through_by_default() {
        // Fail-open default: a misspelled rule leaves data visible.
        let processor = MaskRuleProcessor::default();
        let rule = ConfiguredMaskRule::from("SCRAMBLE");
        assert_eq!(rule, ConfiguredMaskRule::Unknown("SCRAMBLE".to_string()));
        assert_eq!(
            processor.apply(&rule, "01012345678", &MaskParams::default()),
            "01012345678"
        );
    }

    #[test]
    fn test_unknown_rule_full_masks_when_configured() {
        let processor = MaskRuleProcessor::new("[X]", UnknownMaskRuleBehavior::FullMask);
        let rule = ConfiguredMaskRule::from("SCRAMBLE");
        assert_eq!(
            processor.apply(&rule, "01012345678", &MaskParams::default()),
            "[X]"
        );
    }

    #[test]
    fn test_configured_rule_parses_case_insensitively() {
        assert_eq!(
            ConfiguredMaskRule::from("partial"),
            ConfiguredMaskRule::Known(MaskRule::Partial)
        );
        let parsed: ConfiguredMaskRule = serde_json::from_str("\"Hash\"").unwrap();
        assert_eq!(parsed, ConfiguredMaskRule::Known(MaskRule::Hash));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"HASH\"");
    }
}
