//! Rule engine: ordered application of the active rule set

use crate::error::{Result, RulesError};
use crate::rule::{compile_rules, Rule};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Load and compile rule files as one unit
pub fn load_rules<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Rule>> {
    let configs = config::load_rule_files(paths)?;
    compile_rules(&configs)
}

/// Rule counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
}

/// Holds the active rule set and applies it to request bodies.
///
/// The set is swapped as a whole, so a call to [`RuleEngine::process`]
/// always sees either the old or the new rules, never a mix.
pub struct RuleEngine {
    rules: RwLock<Arc<Vec<Rule>>>,
    stopped: AtomicBool,
    log_matches: bool,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            stopped: AtomicBool::new(false),
            log_matches: false,
        }
    }

    /// Log each rule that changes content at debug level
    pub fn with_match_logging(mut self, enabled: bool) -> Self {
        self.log_matches = enabled;
        self
    }

    /// Build an engine from rule files
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        Ok(Self::new(load_rules(paths)?))
    }

    /// Reload from rule files. On failure the current rules stay active.
    pub fn load_rules<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        let rules = load_rules(paths)?;
        let count = rules.len();
        self.update_rules(rules);
        Ok(count)
    }

    /// Replace the active rule set
    pub fn update_rules(&self, rules: Vec<Rule>) {
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        info!(rules = count, "Rule set updated");
    }

    /// Current rule set, shared with the engine
    pub fn snapshot(&self) -> Arc<Vec<Rule>> {
        Arc::clone(&self.rules.read())
    }

    /// Apply every enabled rule in order, each seeing the previous output
    pub fn process(&self, content: &[u8]) -> Result<Vec<u8>> {
        let rules = self.snapshot();
        let mut current = content.to_vec();

        for rule in rules.iter().filter(|r| r.is_enabled()) {
            if self.is_stopped() {
                return Err(RulesError::Stopped);
            }

            let next = rule.apply(&current);
            if self.log_matches && next != current {
                debug!(rule = %rule.describe(), "Rule applied");
            }
            current = next;
        }

        if self.is_stopped() {
            return Err(RulesError::Stopped);
        }

        Ok(current)
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.snapshot().as_ref().clone()
    }

    pub fn enabled_rules(&self) -> Vec<Rule> {
        self.snapshot()
            .iter()
            .filter(|r| r.is_enabled())
            .cloned()
            .collect()
    }

    pub fn rule(&self, name: &str) -> Option<Rule> {
        self.snapshot().iter().find(|r| r.name() == name).cloned()
    }

    pub fn enable_rule(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable_rule(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    // Applies to every rule sharing the name
    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut guard = self.rules.write();
        if !guard.iter().any(|r| r.name() == name) {
            return Err(RulesError::RuleNotFound(name.to_string()));
        }

        let updated = guard
            .iter()
            .map(|r| {
                if r.name() == name {
                    r.with_enabled(enabled)
                } else {
                    r.clone()
                }
            })
            .collect();
        *guard = Arc::new(updated);

        debug!(rule = %name, enabled, "Rule toggled");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let rules = self.snapshot();
        let enabled = rules.iter().filter(|r| r.is_enabled()).count();
        EngineStats {
            total: rules.len(),
            enabled,
            disabled: rules.len() - enabled,
        }
    }

    /// Refuse further processing. In-flight calls fail between rules.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("stats", &self.stats())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
