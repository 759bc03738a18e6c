//! Keyword heuristics as injectable rule data.
//!
//! Kept out of the strategies themselves so dispatch behaviour can be
//! configured and tested on its own.

use crate::domain::models::config::{default_kind_rules, default_strategy_rules};
use crate::domain::models::{ExecutionKind, KeywordRule, KindRule, StrategyType};

/// Lowercased alphanumeric tokens of `text`; `api_call` yields `api`, `call`.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn any_keyword(keywords: &[String], texts: &[&str]) -> bool {
    texts.iter().any(|text| {
        tokens(text).any(|token| keywords.iter().any(|k| k.eq_ignore_ascii_case(&token)))
    })
}

/// Strategy-claiming keywords.
#[derive(Debug, Clone)]
pub struct KeywordRules {
    rules: Vec<KeywordRule>,
}

impl Default for KeywordRules {
    fn default() -> Self {
        Self::new(default_strategy_rules())
    }
}

impl KeywordRules {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    /// Whether any of `texts` carries a keyword registered for `strategy`.
    pub fn matches(&self, strategy: StrategyType, texts: &[&str]) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.strategy == strategy)
            .any(|rule| any_keyword(&rule.keywords, texts))
    }
}

/// Deterministic sub-kind classifier; first matching rule wins.
#[derive(Debug, Clone)]
pub struct KindRules {
    rules: Vec<KindRule>,
}

impl Default for KindRules {
    fn default() -> Self {
        Self::new(default_kind_rules())
    }
}

impl KindRules {
    pub fn new(rules: Vec<KindRule>) -> Self {
        Self { rules }
    }

    /// Falls back to [`ExecutionKind::DirectMapping`].
    pub fn classify(&self, texts: &[&str]) -> ExecutionKind {
        self.rules
            .iter()
            .find(|rule| any_keyword(&rule.keywords, texts))
            .map_or(ExecutionKind::DirectMapping, |rule| rule.kind)
    }
}
