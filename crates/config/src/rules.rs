//! Rule file model and loader
//!
//! A rule file holds a standard `rules:` list, an "easy" shorthand
//! section, or both. Easy sections are expanded into ordinary
//! [`RuleConfig`] entries with synthesized names before anything else
//! sees them.

use crate::config::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How a rule's pattern is matched against content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    Prefix,
    Suffix,
    Contains,
    Regex,
}

impl std::fmt::Display for RuleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleMode::Prefix => "prefix",
            RuleMode::Suffix => "suffix",
            RuleMode::Contains => "contains",
            RuleMode::Regex => "regex",
        };
        f.write_str(name)
    }
}

/// What a rule does to matching content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Replace,
    Delete,
    DeleteJsonField,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleAction::Replace => "replace",
            RuleAction::Delete => "delete",
            RuleAction::DeleteJsonField => "delete_json_field",
        };
        f.write_str(name)
    }
}

/// A single rule as written in a rule file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub mode: RuleMode,

    #[serde(default)]
    pub pattern: String,

    pub action: RuleAction,

    /// Substitution text, used by `replace` only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    fn delete(name: String, mode: RuleMode, pattern: &str) -> Self {
        Self {
            name,
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action: RuleAction::Delete,
            value: None,
        }
    }

    fn replace(name: String, mode: RuleMode, pattern: &str, value: &str) -> Self {
        Self {
            name,
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action: RuleAction::Replace,
            value: Some(value.to_string()),
        }
    }
}

/// Shorthand rule sections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EasyRules {
    pub delete: Option<EasyDeleteRules>,
    pub replace: Option<EasyReplaceRules>,
    pub prefix: Option<EasyModeRules>,
    pub suffix: Option<EasyModeRules>,
    pub regex: Option<EasyModeRules>,
}

/// `delete:` section, patterns grouped by mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EasyDeleteRules {
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub prefix: Vec<String>,
    #[serde(default)]
    pub suffix: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
}

/// `replace:` section, pattern -> value maps grouped by mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EasyReplaceRules {
    #[serde(default)]
    pub contains: BTreeMap<String, String>,
    #[serde(default)]
    pub prefix: BTreeMap<String, String>,
    #[serde(default)]
    pub suffix: BTreeMap<String, String>,
    #[serde(default)]
    pub regex: BTreeMap<String, String>,
}

/// `prefix:` / `suffix:` / `regex:` sections, grouped by action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EasyModeRules {
    #[serde(default)]
    pub delete: Vec<String>,
    #[serde(default)]
    pub replace: BTreeMap<String, String>,
}

impl EasyRules {
    pub fn is_empty(&self) -> bool {
        self.to_rules().is_empty()
    }

    /// Expand every section into standard rules, in section order
    pub fn to_rules(&self) -> Vec<RuleConfig> {
        let mut rules = Vec::new();

        if let Some(delete) = &self.delete {
            for (mode, patterns) in [
                (RuleMode::Contains, &delete.contains),
                (RuleMode::Prefix, &delete.prefix),
                (RuleMode::Suffix, &delete.suffix),
                (RuleMode::Regex, &delete.regex),
            ] {
                for (i, pattern) in patterns.iter().enumerate() {
                    let name = format!("easy-delete-{}-{}", mode, i + 1);
                    rules.push(RuleConfig::delete(name, mode, pattern));
                }
            }
        }

        if let Some(replace) = &self.replace {
            for (mode, pairs) in [
                (RuleMode::Contains, &replace.contains),
                (RuleMode::Prefix, &replace.prefix),
                (RuleMode::Suffix, &replace.suffix),
                (RuleMode::Regex, &replace.regex),
            ] {
                for (pattern, value) in pairs {
                    let name = format!("easy-replace-{}-{}", mode, pattern_head(pattern));
                    rules.push(RuleConfig::replace(name, mode, pattern, value));
                }
            }
        }

        for (mode, section) in [
            (RuleMode::Prefix, &self.prefix),
            (RuleMode::Suffix, &self.suffix),
            (RuleMode::Regex, &self.regex),
        ] {
            let Some(section) = section else { continue };

            for (i, pattern) in section.delete.iter().enumerate() {
                let name = format!("{}-delete-{}", mode, i + 1);
                rules.push(RuleConfig::delete(name, mode, pattern));
            }
            for (pattern, value) in &section.replace {
                let name = format!("{}-replace-{}", mode, pattern_head(pattern));
                rules.push(RuleConfig::replace(name, mode, pattern, value));
            }
        }

        rules
    }

    /// Split `delete.contains` entries naming external rule files off
    fn split_file_refs(&self) -> (EasyRules, Vec<String>) {
        let mut easy = self.clone();
        let mut refs = Vec::new();

        if let Some(delete) = easy.delete.as_mut() {
            let (files, patterns): (Vec<_>, Vec<_>) = delete
                .contains
                .drain(..)
                .partition(|p| is_rule_file_ref(p));
            delete.contains = patterns;
            refs = files;
        }

        (easy, refs)
    }
}

fn pattern_head(pattern: &str) -> String {
    pattern.chars().take(10).collect()
}

fn is_rule_file_ref(pattern: &str) -> bool {
    pattern.ends_with(".yaml") || pattern.ends_with(".yml")
}

/// On-disk layout of a rule file
#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleConfig>,

    #[serde(default)]
    easy: Option<EasyRules>,

    /// Easy sections written at the top level of the file
    #[serde(flatten)]
    inline: EasyRules,
}

/// Load and concatenate several rule files, in the order given
pub fn load_rule_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RuleConfig>, ConfigError> {
    let mut all = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let rules = load_rule_file(path).map_err(|e| ConfigError::RuleFile {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        debug!(path = ?path, rules = rules.len(), "Loaded rule file");
        all.extend(rules);
    }

    Ok(all)
}

/// Load one rule file: standard rules, then top-level easy, then nested easy
pub fn load_rule_file(path: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let file: RuleFile = parse_document(path, &content)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut rules = file.rules;
    rules.extend(expand_easy(&file.inline, base_dir)?);
    if let Some(easy) = &file.easy {
        rules.extend(expand_easy(easy, base_dir)?);
    }

    Ok(rules)
}

fn expand_easy(easy: &EasyRules, base_dir: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
    let (easy, refs) = easy.split_file_refs();
    let mut rules = easy.to_rules();

    for reference in refs {
        let path: PathBuf = base_dir.join(&reference);
        let external = load_easy_file(&path).map_err(|e| ConfigError::RuleFile {
            path: path.clone(),
            source: Box::new(e),
        })?;
        debug!(path = ?path, rules = external.len(), "Loaded external easy rule file");
        rules.extend(external);
    }

    Ok(rules)
}

fn load_easy_file(path: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let easy: EasyRules = parse_document(path, &content)?;
    Ok(easy.to_rules())
}

fn parse_document<T: DeserializeOwned + Default>(path: &Path, content: &str) -> Result<T, ConfigError> {
    if content.trim().is_empty() {
        return Ok(T::default());
    }

    if path.extension().is_some_and(|ext| ext == "toml") {
        Ok(toml::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}
