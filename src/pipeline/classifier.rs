//! Event classifier: ordered, first-match-wins outcome rules per source system.
//!
//! Each source system owns a list of `(pattern, outcome)` rules. The whole
//! list is run against the subject first, then against the body. The first
//! rule that matches decides the outcome, even if a later rule is more
//! specific. No match means `Outcome::Unknown`.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::RulesConfig;
use crate::pipeline::types::{ClassifiedEvent, Outcome, SourceSystem, WorkItemType};

/// Which email field a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedField {
    Subject,
    Body,
}

/// A single outcome rule with a compiled, case-insensitive regex.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    /// Pattern as configured.
    pub pattern: String,
    pub regex: Regex,
    pub outcome: Outcome,
}

impl ClassificationRule {
    pub fn new(pattern: &str, outcome: Outcome) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            outcome,
        })
    }
}

/// Classifies emails per source system.
#[derive(Debug, Clone, Default)]
pub struct EventClassifier {
    rules: HashMap<SourceSystem, Vec<ClassificationRule>>,
}

impl EventClassifier {
    /// Create a classifier with no rules (everything is `Unknown`).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile the rule lists from config.
    ///
    /// A source with any invalid pattern is left out entirely, so its senders
    /// degrade to unknown instead of being classified by a partial list.
    pub fn from_config(config: &RulesConfig) -> Self {
        let mut classifier = Self::empty();
        for (name, source_rules) in &config.sources {
            let compiled: Result<Vec<_>, _> = source_rules
                .classification
                .iter()
                .map(|spec| ClassificationRule::new(&spec.pattern, spec.outcome))
                .collect();

            match compiled {
                Ok(rules) => {
                    classifier.rules.insert(SourceSystem::new(name.clone()), rules);
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Invalid classification rule, source disabled");
                }
            }
        }
        classifier
    }

    /// Append a rule to a source's list.
    pub fn add_rule(
        &mut self,
        source: &SourceSystem,
        pattern: &str,
        outcome: Outcome,
    ) -> Result<(), regex::Error> {
        let rule = ClassificationRule::new(pattern, outcome)?;
        self.rules.entry(source.clone()).or_default().push(rule);
        Ok(())
    }

    /// Whether a usable rule set exists for this source.
    pub fn has_rules(&self, source: &SourceSystem) -> bool {
        self.rules.contains_key(source)
    }

    pub fn rules_for(&self, source: &SourceSystem) -> &[ClassificationRule] {
        self.rules.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn classify(&self, source: &SourceSystem, subject: &str, body: &str) -> ClassifiedEvent {
        let outcome = match self.first_match(source, subject, body) {
            Some((rule, field)) => {
                debug!(
                    source = %source,
                    rule = %rule.pattern,
                    field = ?field,
                    outcome = %rule.outcome,
                    "Classification rule matched"
                );
                rule.outcome
            }
            None => Outcome::Unknown,
        };

        ClassifiedEvent {
            source_system: source.clone(),
            outcome,
            work_item_type: WorkItemType::for_outcome(outcome),
        }
    }

    /// First matching rule, subject pass before body pass.
    fn first_match(
        &self,
        source: &SourceSystem,
        subject: &str,
        body: &str,
    ) -> Option<(&ClassificationRule, MatchedField)> {
        let rules = self.rules_for(source);
        [(subject, MatchedField::Subject), (body, MatchedField::Body)]
            .into_iter()
            .filter(|(text, _)| !text.trim().is_empty())
            .find_map(|(text, field)| {
                rules
                    .iter()
                    .find(|rule| rule.regex.is_match(text))
                    .map(|rule| (rule, field))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassificationRuleSpec, SourceRules};

    fn azure() -> SourceSystem {
        SourceSystem::new("azure-pipelines")
    }

    fn classifier() -> EventClassifier {
        let mut classifier = EventClassifier::empty();
        classifier.add_rule(&azure(), r"\bfailed\b", Outcome::Failure).unwrap();
        classifier.add_rule(&azure(), r"\bsucceeded\b", Outcome::Success).unwrap();
        classifier.add_rule(&azure(), r"\bwarning\b", Outcome::Warning).unwrap();
        classifier
    }

    #[test]
    fn failed_subject_is_failure_issue() {
        let event = classifier().classify(&azure(), "Build failed: nightly-run #42", "");
        assert_eq!(event.outcome, Outcome::Failure);
        assert_eq!(event.work_item_type, WorkItemType::Issue);
        assert_eq!(event.source_system, azure());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let event = classifier().classify(&azure(), "BUILD SUCCEEDED", "");
        assert_eq!(event.outcome, Outcome::Success);
        assert_eq!(event.work_item_type, WorkItemType::Task);
    }

    #[test]
    fn earlier_rule_wins_over_more_specific_later_rule() {
        let mut classifier = EventClassifier::empty();
        classifier.add_rule(&azure(), "build", Outcome::Success).unwrap();
        classifier
            .add_rule(&azure(), "build failed", Outcome::Failure)
            .unwrap();

        let event = classifier.classify(&azure(), "Build failed", "");
        assert_eq!(event.outcome, Outcome::Success);
    }

    #[test]
    fn subject_pass_runs_before_body_pass() {
        // The failure rule is first in the list but only the body matches it;
        // the subject matches the later warning rule and wins.
        let event = classifier().classify(
            &azure(),
            "Run finished with a warning",
            "one step failed",
        );
        assert_eq!(event.outcome, Outcome::Warning);
    }

    #[test]
    fn falls_back_to_body_when_subject_has_no_match() {
        let event = classifier().classify(&azure(), "Pipeline notification", "The run failed.");
        assert_eq!(event.outcome, Outcome::Failure);
    }

    #[test]
    fn no_match_is_unknown_task() {
        let event = classifier().classify(&azure(), "Weekly digest", "Nothing to report");
        assert_eq!(event.outcome, Outcome::Unknown);
        assert_eq!(event.work_item_type, WorkItemType::Task);
    }

    #[test]
    fn empty_subject_and_body_are_unknown() {
        let event = classifier().classify(&azure(), "", "");
        assert_eq!(event.outcome, Outcome::Unknown);
    }

    #[test]
    fn source_without_rules_is_unknown() {
        let event = classifier().classify(&SourceSystem::new("jenkins"), "Build failed", "");
        assert_eq!(event.outcome, Outcome::Unknown);
    }

    #[test]
    fn rules_are_per_source() {
        let mut classifier = classifier();
        let jenkins = SourceSystem::new("jenkins");
        classifier.add_rule(&jenkins, "unstable", Outcome::Warning).unwrap();

        assert_eq!(
            classifier.classify(&jenkins, "Build unstable", "").outcome,
            Outcome::Warning
        );
        assert_eq!(
            classifier.classify(&azure(), "Build unstable", "").outcome,
            Outcome::Unknown
        );
    }

    #[test]
    fn invalid_pattern_disables_source() {
        let mut config = RulesConfig::builtin();
        config.sources.insert(
            "broken".into(),
            SourceRules {
                classification: vec![ClassificationRuleSpec {
                    pattern: "(unclosed".into(),
                    outcome: Outcome::Failure,
                }],
                extraction: vec![],
            },
        );

        let classifier = EventClassifier::from_config(&config);
        assert!(!classifier.has_rules(&SourceSystem::new("broken")));
        assert!(classifier.has_rules(&azure()));
    }

    #[test]
    fn builtin_partially_succeeded_is_warning() {
        let classifier = EventClassifier::from_config(&RulesConfig::builtin());
        let event = classifier.classify(&azure(), "Build partially succeeded: main", "");
        assert_eq!(event.outcome, Outcome::Warning);
    }

    #[test]
    fn builtin_generic_spanish_keywords() {
        let classifier = EventClassifier::from_config(&RulesConfig::builtin());
        let cert = SourceSystem::new("test-certification");
        assert_eq!(
            classifier.classify(&cert, "Prueba fallida en QA", "").outcome,
            Outcome::Failure
        );
        assert_eq!(
            classifier.classify(&cert, "Ejecución exitosa", "").outcome,
            Outcome::Success
        );
    }
}
