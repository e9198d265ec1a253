//! Board state mapper: turns a classified event into a board target.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::config::{BoardMapping, OutcomeTargetSpec, RulesConfig};
use crate::error::SyncError;
use crate::pipeline::types::{BoardTarget, ClassifiedEvent, ExtractedDetails, Outcome, SourceSystem};

/// Maps outcomes to board state, tags and rendered field values.
#[derive(Debug, Clone)]
pub struct BoardStateMapper {
    mapping: BoardMapping,
}

impl BoardStateMapper {
    pub fn new(mapping: BoardMapping) -> Self {
        Self { mapping }
    }

    pub fn from_config(config: &RulesConfig) -> Self {
        Self::new(config.board.clone())
    }

    /// Tag that marks items as generated by this service.
    pub fn marker_tag(&self) -> &str {
        &self.mapping.marker_tag
    }

    /// Target board state for an outcome, ignoring per-source overrides.
    pub fn state_for(&self, outcome: Outcome) -> &str {
        self.mapping
            .outcomes
            .get(&outcome)
            .map(|target| target.state.as_str())
            .unwrap_or(self.mapping.fallback_state.as_str())
    }

    /// Source-specific target when one is configured, else the shared one.
    fn spec_for(&self, source: &SourceSystem, outcome: Outcome) -> Option<&OutcomeTargetSpec> {
        self.mapping
            .sources
            .get(source.as_str())
            .and_then(|overrides| overrides.get(&outcome))
            .or_else(|| self.mapping.outcomes.get(&outcome))
    }

    pub fn map(&self, event: &ClassifiedEvent, details: &ExtractedDetails) -> BoardTarget {
        let spec = self.spec_for(&event.source_system, event.outcome);

        let mut tags: BTreeSet<String> = spec
            .map(|s| s.tags.iter().cloned().collect())
            .unwrap_or_default();
        tags.insert(self.mapping.marker_tag.clone());

        let fields = spec
            .map(|s| self.render_fields(s, details))
            .unwrap_or_default();

        let state = spec
            .map(|s| s.state.clone())
            .unwrap_or_else(|| self.mapping.fallback_state.clone());

        BoardTarget {
            state,
            tags,
            fields,
        }
    }

    fn render_fields(
        &self,
        spec: &OutcomeTargetSpec,
        details: &ExtractedDetails,
    ) -> BTreeMap<String, String> {
        spec.fields
            .iter()
            .map(|(field, template)| {
                let value = render_template(template, details).unwrap_or_else(|reason| {
                    let fault = SyncError::MalformedTemplate {
                        field: field.clone(),
                        reason,
                    };
                    warn!(error = %fault, "Field template degraded to empty value");
                    String::new()
                });
                (field.clone(), value)
            })
            .collect()
    }
}

/// Render a `{key}` template. Missing keys render as empty strings.
///
/// Errors on an unclosed `{` or an empty `{}` placeholder.
pub fn render_template(template: &str, details: &ExtractedDetails) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unclosed placeholder at byte {}", template.len() - rest.len() + start))?;
        let key = after[..end].trim();
        if key.is_empty() {
            return Err("empty placeholder".to_string());
        }
        out.push_str(details.get(key).unwrap_or_default());
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::WorkItemType;

    fn event(outcome: Outcome) -> ClassifiedEvent {
        ClassifiedEvent {
            source_system: SourceSystem::new("azure-pipelines"),
            outcome,
            work_item_type: WorkItemType::for_outcome(outcome),
        }
    }

    fn mapper() -> BoardStateMapper {
        let mut mapping = BoardMapping::default();
        mapping.outcomes.insert(
            Outcome::Failure,
            OutcomeTargetSpec {
                state: "Doing".into(),
                tags: vec!["Auto-Generated".into(), "Failure".into()],
                fields: BTreeMap::from([
                    ("System.Title".to_string(), "Failed: {subject}".to_string()),
                    ("Custom.RunId".to_string(), "#{run_id}".to_string()),
                    ("Custom.Broken".to_string(), "{unclosed".to_string()),
                ]),
            },
        );
        BoardStateMapper::new(mapping)
    }

    #[test]
    fn failure_maps_to_configured_state_and_tags() {
        let target = mapper().map(&event(Outcome::Failure), &ExtractedDetails::new());
        assert_eq!(target.state, "Doing");
        let expected: BTreeSet<String> =
            ["Auto-Generated", "Failure"].iter().map(|s| s.to_string()).collect();
        assert_eq!(target.tags, expected);
    }

    #[test]
    fn marker_tag_always_present() {
        let target = mapper().map(&event(Outcome::Success), &ExtractedDetails::new());
        assert!(target.tags.contains("Auto-Generated"));
        assert_eq!(target.state, "To Do");
        assert!(target.fields.is_empty());
    }

    #[test]
    fn fields_render_details_and_missing_keys_are_empty() {
        let mut details = ExtractedDetails::new();
        details.insert("subject", "Build failed: nightly-run #42");
        let target = mapper().map(&event(Outcome::Failure), &details);

        assert_eq!(target.fields["System.Title"], "Failed: Build failed: nightly-run #42");
        assert_eq!(target.fields["Custom.RunId"], "#");
    }

    #[test]
    fn malformed_field_template_degrades_to_empty() {
        let target = mapper().map(&event(Outcome::Failure), &ExtractedDetails::new());
        assert_eq!(target.fields["Custom.Broken"], "");
        assert_eq!(target.fields.len(), 3);
    }

    #[test]
    fn render_template_errors() {
        let details = ExtractedDetails::new();
        assert!(render_template("{", &details).is_err());
        assert!(render_template("a {} b", &details).is_err());
        assert_eq!(render_template("no placeholders }", &details).unwrap(), "no placeholders }");
    }

    #[test]
    fn render_template_multibyte_text() {
        let mut details = ExtractedDetails::new();
        details.insert("error", "falló");
        assert_eq!(
            render_template("⚠ Error: {error} ✓", &details).unwrap(),
            "⚠ Error: falló ✓"
        );
    }

    #[test]
    fn builtin_mapping_titles_name_the_source() {
        let mapper = BoardStateMapper::from_config(&RulesConfig::builtin());
        let mut details = ExtractedDetails::new();
        details.insert("subject", "Build failed");
        details.insert("sender", "azuredevops@microsoft.com");

        let target = mapper.map(&event(Outcome::Failure), &details);
        assert_eq!(target.state, "To Do");
        assert_eq!(target.fields["System.Title"], "Azure DevOps pipeline failed: Build failed");
        assert!(target.fields["System.Description"].contains("azuredevops@microsoft.com"));
        assert!(target.tags.contains("Failure"));

        let mut certification = event(Outcome::Success);
        certification.source_system = SourceSystem::new("test-certification");
        let target = mapper.map(&certification, &details);
        assert_eq!(target.fields["System.Title"], "Certification test passed: Build failed");
        assert_eq!(target.state, "Done");
    }

    #[test]
    fn source_override_replaces_shared_target() {
        let mut mapping = mapper().mapping;
        mapping.sources.insert(
            "azure-pipelines".into(),
            BTreeMap::from([(
                Outcome::Failure,
                OutcomeTargetSpec {
                    state: "Blocked".into(),
                    tags: vec!["Pipeline".into()],
                    fields: BTreeMap::from([(
                        "System.Title".to_string(),
                        "Pipeline {subject}".to_string(),
                    )]),
                },
            )]),
        );
        let mapper = BoardStateMapper::new(mapping);
        let mut details = ExtractedDetails::new();
        details.insert("subject", "broke");

        let target = mapper.map(&event(Outcome::Failure), &details);
        assert_eq!(target.state, "Blocked");
        assert_eq!(target.fields.len(), 1);
        assert_eq!(target.fields["System.Title"], "Pipeline broke");
        assert!(target.tags.contains("Pipeline"));
        assert!(target.tags.contains("Auto-Generated"));
        // Transitions carry no source and keep the shared state.
        assert_eq!(mapper.state_for(Outcome::Failure), "Doing");

        let mut other = event(Outcome::Failure);
        other.source_system = SourceSystem::new("jenkins");
        let target = mapper.map(&other, &details);
        assert_eq!(target.state, "Doing");
        assert_eq!(target.fields["System.Title"], "Failed: broke");
    }
}
