//! Metric extraction from captured engine output.

use crate::config::{ConfigError, ScrapeRuleConfig};
use regex::Regex;
use std::collections::BTreeMap;

/// Metric name to values, in the order they appeared in the log.
pub type Metrics = BTreeMap<String, Vec<String>>;

/// A compiled scrape rule.
#[derive(Debug, Clone)]
struct ScrapeRule {
    metric: String,
    pattern: Regex,
}

impl ScrapeRule {
    fn capture<'a>(&self, line: &'a str) -> Option<&'a str> {
        let caps = self.pattern.captures(line)?;
        caps.name("data")
            .or_else(|| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Applies an ordered list of labeled patterns to every log line.
///
/// Several rules may record into the same metric, which lets one metric be
/// fed by differently formatted report lines.
#[derive(Debug, Clone)]
pub struct LogScraper {
    rules: Vec<ScrapeRule>,
}

impl LogScraper {
    /// Compile the given rules.
    pub fn from_rules(rules: &[ScrapeRuleConfig]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|pattern| ScrapeRule {
                        metric: rule.metric.clone(),
                        pattern,
                    })
                    .map_err(|source| ConfigError::ScrapePattern {
                        metric: rule.metric.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Extract every metric found in `output`.
    ///
    /// Metrics without a single match are absent from the result.
    #[must_use]
    pub fn scrape(&self, output: &str) -> Metrics {
        let mut metrics = Metrics::new();
        for line in output.lines() {
            for rule in &self.rules {
                if let Some(value) = rule.capture(line) {
                    metrics
                        .entry(rule.metric.clone())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }
        metrics
    }
}
