//! Detail extractor: pulls structured fields out of notification bodies.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use crate::config::RulesConfig;
use crate::error::SyncError;
use crate::pipeline::types::{ExtractedDetails, SourceSystem, truncate_chars};

/// Upper bound for a single extracted value, in characters.
const MAX_VALUE_CHARS: usize = 500;

/// One labelled pattern writing to one field.
#[derive(Debug, Clone)]
pub struct ExtractionTemplate {
    pub label: String,
    pub regex: Regex,
    pub field: String,
}

impl ExtractionTemplate {
    pub fn new(label: &str, pattern: &str, field: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.to_string(),
            regex: Regex::new(pattern)?,
            field: field.to_string(),
        })
    }

    /// Capture group 1 if the pattern has one, otherwise the whole match.
    fn apply(&self, body: &str) -> Option<String> {
        let caps = self.regex.captures(body)?;
        let value = caps.get(1).or_else(|| caps.get(0))?.as_str().trim();
        if value.is_empty() {
            return None;
        }
        Some(truncate_chars(value, MAX_VALUE_CHARS))
    }
}

/// Applies per-source extraction templates. Pure and total.
#[derive(Debug, Clone)]
pub struct DetailExtractor {
    templates: HashMap<SourceSystem, Vec<ExtractionTemplate>>,
    summary_max_chars: usize,
}

impl DetailExtractor {
    pub fn new(summary_max_chars: usize) -> Self {
        Self {
            templates: HashMap::new(),
            summary_max_chars,
        }
    }

    /// Compile templates from config. Invalid templates are dropped one by one.
    pub fn from_config(config: &RulesConfig) -> Self {
        let mut extractor = Self::new(config.summary_max_chars);
        for (name, source_rules) in &config.sources {
            let source = SourceSystem::new(name.clone());
            for spec in &source_rules.extraction {
                if let Err(e) = extractor.add_template(&source, &spec.label, &spec.pattern, &spec.field) {
                    let fault = SyncError::MalformedTemplate {
                        field: spec.field.clone(),
                        reason: e.to_string(),
                    };
                    warn!(source = %name, label = %spec.label, error = %fault, "Skipping extraction template");
                }
            }
        }
        extractor
    }

    pub fn add_template(
        &mut self,
        source: &SourceSystem,
        label: &str,
        pattern: &str,
        field: &str,
    ) -> Result<(), regex::Error> {
        let template = ExtractionTemplate::new(label, pattern, field)?;
        self.templates.entry(source.clone()).or_default().push(template);
        Ok(())
    }

    pub fn extract(&self, source: &SourceSystem, body: &str) -> ExtractedDetails {
        let mut details = ExtractedDetails::new();

        for template in self.templates.get(source).into_iter().flatten() {
            // Earlier templates keep a field if two write the same one.
            if details.contains_key(&template.field) {
                continue;
            }
            if let Some(value) = template.apply(body) {
                details.insert(template.field.clone(), value);
            }
        }

        if details.is_empty() {
            details.insert(
                ExtractedDetails::SUMMARY,
                truncate_chars(body.trim(), self.summary_max_chars),
            );
        }

        details
    }
}
