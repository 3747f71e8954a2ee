//! content-proxy config: configuration model and rule file loading
//!
//! This crate parses the proxy's TOML configuration and the YAML/TOML
//! rule files into plain data. Compilation and validation of rules
//! happens in the `rules` crate.

pub mod config;
pub mod rules;

pub use config::*;
pub use rules::{load_rule_file, load_rule_files, EasyRules, RuleAction, RuleConfig, RuleMode};
