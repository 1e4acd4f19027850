//! Configuration for checked execution.

use std::sync::Arc;

use nanguard_core::EvalConfig;

use crate::rules::RuleTable;

/// Which checks to apply and how to evaluate the checked program.
#[derive(Debug, Clone)]
pub struct CheckifyConfig {
    /// Rule table consulted for every intercepted primitive.
    pub rules: Arc<RuleTable>,
    pub eval: EvalConfig,
}

impl Default for CheckifyConfig {
    fn default() -> Self {
        CheckifyConfig {
            rules: RuleTable::global(),
            eval: EvalConfig::default(),
        }
    }
}

impl CheckifyConfig {
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_eval(mut self, eval: EvalConfig) -> Self {
        self.eval = eval;
        self
    }
}
