//! Compiled rules: matching and transformation of request bodies
//!
//! Bodies are treated as raw bytes so content that isn't valid UTF-8 is
//! still matched and rewritten.

use crate::error::{Result, RulesError};
use crate::json;
use config::{RuleAction, RuleConfig, RuleMode};
use regex::bytes::{NoExpand, Regex};

/// A validated, immutable rewrite rule
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    enabled: bool,
    mode: RuleMode,
    pattern: String,
    action: RuleAction,
    value: String,
    // Set for contains (escaped literal) and regex modes
    matcher: Option<Regex>,
}

impl Rule {
    /// Validate a rule definition and compile its pattern
    pub fn compile(config: &RuleConfig) -> Result<Self> {
        let invalid = |reason: String| RulesError::InvalidRule {
            rule: config.name.clone(),
            reason,
        };

        if config.name.trim().is_empty() {
            return Err(invalid("rule name must not be empty".to_string()));
        }

        if config.pattern.is_empty() {
            return Err(invalid("pattern must not be empty".to_string()));
        }

        let value = match (config.action, &config.value) {
            (RuleAction::Replace, None) => {
                return Err(invalid("replace action requires a value".to_string()));
            }
            (RuleAction::Replace, Some(value)) => value.clone(),
            _ => String::new(),
        };

        let matcher = match config.mode {
            RuleMode::Regex => Some(
                Regex::new(&config.pattern)
                    .map_err(|e| invalid(format!("invalid regular expression: {}", e)))?,
            ),
            RuleMode::Contains => Some(
                Regex::new(&regex::escape(&config.pattern))
                    .map_err(|e| invalid(format!("invalid pattern: {}", e)))?,
            ),
            RuleMode::Prefix | RuleMode::Suffix => None,
        };

        Ok(Self {
            name: config.name.clone(),
            enabled: config.enabled,
            mode: config.mode,
            pattern: config.pattern.clone(),
            action: config.action,
            value,
            matcher,
        })
    }

    pub fn replace(name: &str, mode: RuleMode, pattern: &str, value: &str) -> Result<Self> {
        Self::compile(&RuleConfig {
            name: name.to_string(),
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action: RuleAction::Replace,
            value: Some(value.to_string()),
        })
    }

    pub fn delete(name: &str, mode: RuleMode, pattern: &str) -> Result<Self> {
        Self::compile(&RuleConfig {
            name: name.to_string(),
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action: RuleAction::Delete,
            value: None,
        })
    }

    pub fn delete_json_field(name: &str, mode: RuleMode, pattern: &str) -> Result<Self> {
        Self::compile(&RuleConfig {
            name: name.to_string(),
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action: RuleAction::DeleteJsonField,
            value: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> RuleMode {
        self.mode
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn action(&self) -> RuleAction {
        self.action
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Copy of this rule with a different enabled flag
    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }

    /// Whether the rule matches `content`. Disabled rules never match.
    pub fn matches(&self, content: &[u8]) -> bool {
        self.enabled && self.match_bytes(content)
    }

    pub(crate) fn match_bytes(&self, content: &[u8]) -> bool {
        match self.mode {
            RuleMode::Prefix => content.starts_with(self.pattern.as_bytes()),
            RuleMode::Suffix => content.ends_with(self.pattern.as_bytes()),
            RuleMode::Contains | RuleMode::Regex => self
                .matcher
                .as_ref()
                .is_some_and(|re| re.is_match(content)),
        }
    }

    /// Apply the rule to `content`, returning the transformed body.
    ///
    /// `delete_json_field` always runs its own JSON walk; `delete` and
    /// `replace` leave non-matching content untouched.
    pub fn apply(&self, content: &[u8]) -> Vec<u8> {
        if !self.enabled {
            return content.to_vec();
        }

        match self.action {
            RuleAction::DeleteJsonField => json::delete_matching_objects(self, content),
            _ if !self.match_bytes(content) => content.to_vec(),
            RuleAction::Delete => self.rewrite(content, b""),
            RuleAction::Replace => self.rewrite(content, self.value.as_bytes()),
        }
    }

    // Substitute `with` for the matched prefix, suffix, or every match
    fn rewrite(&self, content: &[u8], with: &[u8]) -> Vec<u8> {
        let pattern = self.pattern.as_bytes();
        match self.mode {
            RuleMode::Prefix => match content.strip_prefix(pattern) {
                Some(rest) => [with, rest].concat(),
                None => content.to_vec(),
            },
            RuleMode::Suffix => match content.strip_suffix(pattern) {
                Some(rest) => [rest, with].concat(),
                None => content.to_vec(),
            },
            RuleMode::Contains => match &self.matcher {
                Some(re) => re.replace_all(content, NoExpand(with)).into_owned(),
                None => content.to_vec(),
            },
            RuleMode::Regex => match &self.matcher {
                Some(re) => re.replace_all(content, with).into_owned(),
                None => content.to_vec(),
            },
        }
    }

    /// Human-readable one-line summary
    pub fn describe(&self) -> String {
        let action = match self.action {
            RuleAction::Delete => "delete".to_string(),
            RuleAction::DeleteJsonField => "delete JSON object".to_string(),
            RuleAction::Replace => format!("replace with '{}'", self.value),
        };
        let state = if self.enabled { "" } else { " (disabled)" };

        format!(
            "{}: {} '{}' -> {}{}",
            self.name, self.mode, self.pattern, action, state
        )
    }
}

/// Compile an ordered rule set. Fails on the first invalid rule.
pub fn compile_rules(configs: &[RuleConfig]) -> Result<Vec<Rule>> {
    configs
        .iter()
        .enumerate()
        .map(|(i, config)| {
            Rule::compile(config).map_err(|e| RulesError::RuleSet {
                index: i + 1,
                source: Box::new(e),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: RuleMode, pattern: &str, action: RuleAction, value: Option<&str>) -> RuleConfig {
        RuleConfig {
            name: "test".to_string(),
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action,
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_match_modes() {
        let contains = Rule::delete("c", RuleMode::Contains, "lo w").unwrap();
        assert!(contains.matches(b"hello world"));
        assert!(!contains.matches(b"hello"));

        let prefix = Rule::delete("p", RuleMode::Prefix, "hel").unwrap();
        assert!(prefix.matches(b"hello"));
        assert!(!prefix.matches(b"ohello"));

        let suffix = Rule::delete("s", RuleMode::Suffix, "llo").unwrap();
        assert!(suffix.matches(b"hello"));
        assert!(!suffix.matches(b"hello!"));

        let regex = Rule::delete("r", RuleMode::Regex, r"\d{3}").unwrap();
        assert!(regex.matches(b"abc 123 def"));
        assert!(!regex.matches(b"abc 12 def"));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let rule = Rule::delete("c", RuleMode::Contains, "x")
            .unwrap()
            .with_enabled(false);
        assert!(!rule.matches(b"xxx"));
        assert_eq!(rule.apply(b"xxx"), b"xxx");
    }

    #[test]
    fn test_delete_prefix_and_suffix() {
        let prefix = Rule::delete("p", RuleMode::Prefix, "ab").unwrap();
        assert_eq!(prefix.apply(b"ababc"), b"abc");
        assert_eq!(prefix.apply(b"cab"), b"cab");

        let suffix = Rule::delete("s", RuleMode::Suffix, "ab").unwrap();
        assert_eq!(suffix.apply(b"cabab"), b"cab");
        assert_eq!(suffix.apply(b"abc"), b"abc");
    }

    #[test]
    fn test_delete_contains_removes_all() {
        let rule = Rule::delete("c", RuleMode::Contains, "na").unwrap();
        assert_eq!(rule.apply(b"banana"), b"ba");
    }

    #[test]
    fn test_delete_regex_removes_all_matches() {
        let rule = Rule::delete("r", RuleMode::Regex, r"\s*\d+").unwrap();
        assert_eq!(rule.apply(b"a 1 b 22 c"), b"a b c");
    }

    #[test]
    fn test_replace_prefix_only_boundary() {
        let rule = Rule::replace("p", RuleMode::Prefix, "foo", "bar").unwrap();
        assert_eq!(rule.apply(b"foofoo"), b"barfoo");
        assert_eq!(rule.apply(b"xfoo"), b"xfoo");
    }

    #[test]
    fn test_replace_suffix_only_boundary() {
        let rule = Rule::replace("s", RuleMode::Suffix, "foo", "bar").unwrap();
        assert_eq!(rule.apply(b"foofoo"), b"foobar");
        assert_eq!(rule.apply(b"foox"), b"foox");
    }

    #[test]
    fn test_replace_contains_all() {
        let rule = Rule::replace("c", RuleMode::Contains, "cat", "dog").unwrap();
        assert_eq!(rule.apply(b"cat catalog cat"), b"dog dogalog dog");
    }

    #[test]
    fn test_replace_regex_with_capture_groups() {
        let rule = Rule::replace("r", RuleMode::Regex, r"(\w+)@example\.com", "$1@redacted").unwrap();
        assert_eq!(
            rule.apply(b"mail alice@example.com and bob@example.com"),
            b"mail alice@redacted and bob@redacted"
        );
    }

    #[test]
    fn test_contains_pattern_is_literal() {
        let rule = Rule::replace("c", RuleMode::Contains, "a.b", "$0").unwrap();
        assert_eq!(rule.apply(b"a.b axb"), b"$0 axb");
    }

    #[test]
    fn test_non_utf8_content() {
        let delete = Rule::delete("c", RuleMode::Contains, "secret").unwrap();
        assert_eq!(delete.apply(b"token=secret;\xff"), b"token=;\xff");

        let prefix = Rule::replace("p", RuleMode::Prefix, "id=", "ID=").unwrap();
        assert_eq!(prefix.apply(b"id=\xfe\xff"), b"ID=\xfe\xff");

        let suffix = Rule::delete("s", RuleMode::Suffix, "\n").unwrap();
        assert_eq!(suffix.apply(b"\x80end\n"), b"\x80end");

        let regex = Rule::replace("r", RuleMode::Regex, r"\d+", "N").unwrap();
        assert!(regex.matches(b"\xc3\x28 42"));
        assert_eq!(regex.apply(b"\xc3\x28 42"), b"\xc3\x28 N");
    }

    #[test]
    fn test_replace_with_empty_value() {
        let rule = Rule::replace("c", RuleMode::Contains, "x", "").unwrap();
        assert_eq!(rule.apply(b"axbxc"), b"abc");
    }

    #[test]
    fn test_replace_is_not_idempotent_when_value_contains_pattern() {
        let rule = Rule::replace("c", RuleMode::Contains, "a", "aa").unwrap();
        let once = rule.apply(b"a");
        let twice = rule.apply(&once);
        assert_eq!(once, b"aa");
        assert_eq!(twice, b"aaaa");

        let safe = Rule::replace("c", RuleMode::Contains, "a", "b").unwrap();
        let once = safe.apply(b"aXa");
        assert_eq!(safe.apply(&once), once);
    }

    #[test]
    fn test_validation_errors() {
        let mut no_name = config(RuleMode::Contains, "x", RuleAction::Delete, None);
        no_name.name = String::new();
        assert!(Rule::compile(&no_name).is_err());

        let no_pattern = config(RuleMode::Contains, "", RuleAction::Delete, None);
        assert!(Rule::compile(&no_pattern).is_err());

        let no_value = config(RuleMode::Contains, "x", RuleAction::Replace, None);
        assert!(Rule::compile(&no_value).is_err());

        let bad_regex = config(RuleMode::Regex, "(unclosed", RuleAction::Delete, None);
        let err = Rule::compile(&bad_regex).unwrap_err();
        assert!(err.to_string().contains("invalid regular expression"));

        let delete_with_value = config(RuleMode::Contains, "x", RuleAction::Delete, Some("ignored"));
        assert_eq!(Rule::compile(&delete_with_value).unwrap().value(), "");
    }

    #[test]
    fn test_compile_rules_reports_index() {
        let configs = vec![
            config(RuleMode::Contains, "ok", RuleAction::Delete, None),
            config(RuleMode::Regex, "[", RuleAction::Delete, None),
        ];

        let err = compile_rules(&configs).unwrap_err();
        match err {
            RulesError::RuleSet { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compile_rules_preserves_order() {
        let configs = vec![
            config(RuleMode::Contains, "a", RuleAction::Delete, None),
            config(RuleMode::Prefix, "b", RuleAction::Replace, Some("c")),
        ];

        let rules = compile_rules(&configs).unwrap();
        assert_eq!(rules[0].pattern(), "a");
        assert_eq!(rules[1].pattern(), "b");
        assert_eq!(rules[1].value(), "c");
    }

    #[test]
    fn test_describe() {
        let rule = Rule::replace("mask", RuleMode::Contains, "secret", "***").unwrap();
        assert_eq!(rule.describe(), "mask: contains 'secret' -> replace with '***'");

        let off = rule.with_enabled(false);
        assert!(off.describe().ends_with("(disabled)"));
    }
}
