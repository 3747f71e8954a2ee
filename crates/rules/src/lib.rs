//! content-proxy rules: body rewriting rules and their runtime
//!
//! Rules are compiled from [`config::RuleConfig`] entries, held by a
//! [`RuleEngine`] that applies them in order, and kept current by a
//! [`RuleWatcher`] that reloads rule files when they change on disk.

pub mod engine;
pub mod error;
pub mod json;
pub mod rule;
pub mod watcher;

pub use config::{RuleAction, RuleConfig, RuleMode};
pub use engine::{load_rules, EngineStats, RuleEngine};
pub use error::*;
pub use rule::{compile_rules, Rule};
pub use watcher::{RuleWatcher, WatcherHandle, DEFAULT_DEBOUNCE};
