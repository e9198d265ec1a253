//! Configuration types.
//!
//! Everything is loaded once at startup and is immutable afterwards. The
//! rule tables (`RulesConfig`) are plain serde structures so they can be
//! replaced by a JSON file; components compile them at construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::azure::BoardConfig;
use crate::channels::email::EmailConfig;
use crate::error::ConfigError;
use crate::pipeline::types::Outcome;

/// Default summary bound, in characters.
const DEFAULT_SUMMARY_MAX_CHARS: usize = 1000;

/// Default poll interval.
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

// ── Rule tables ─────────────────────────────────────────────────────

/// Sender, classification, extraction and board-mapping tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Sender address or domain → source system. Exact addresses win over domains.
    #[serde(default)]
    pub senders: Vec<SenderMapping>,
    /// Per source system rule lists, keyed by source system name.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceRules>,
    /// Outcome → board target table.
    #[serde(default)]
    pub board: BoardMapping,
    /// Bound for the fallback `summary` field.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

/// Maps one sender pattern to a source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderMapping {
    /// `user@host` (exact), `@host` or `host` (domain suffix).
    pub pattern: String,
    pub source: String,
}

/// Ordered rule lists for one source system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRules {
    /// Evaluated in order; first match wins.
    #[serde(default)]
    pub classification: Vec<ClassificationRuleSpec>,
    #[serde(default)]
    pub extraction: Vec<ExtractionTemplateSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRuleSpec {
    /// Case-insensitive regular expression.
    pub pattern: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTemplateSpec {
    pub label: String,
    /// Regular expression; capture group 1 is the value when present.
    pub pattern: String,
    pub field: String,
}

/// Outcome → board target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardMapping {
    /// Tag added to every generated item; transitions require it.
    #[serde(default = "default_marker_tag")]
    pub marker_tag: String,
    /// State used for outcomes missing from `outcomes`.
    #[serde(default = "default_fallback_state")]
    pub fallback_state: String,
    #[serde(default)]
    pub outcomes: BTreeMap<Outcome, OutcomeTargetSpec>,
    /// Per source system overrides, keyed by source name. An entry here
    /// replaces the shared `outcomes` entry for that source.
    #[serde(default)]
    pub sources: BTreeMap<String, BTreeMap<Outcome, OutcomeTargetSpec>>,
}

impl Default for BoardMapping {
    fn default() -> Self {
        Self {
            marker_tag: default_marker_tag(),
            fallback_state: default_fallback_state(),
            outcomes: BTreeMap::new(),
            sources: BTreeMap::new(),
        }
    }
}

/// Board target for one outcome. Field values are `{key}` templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeTargetSpec {
    pub state: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_summary_max_chars() -> usize {
    DEFAULT_SUMMARY_MAX_CHARS
}

fn default_marker_tag() -> String {
    "Auto-Generated".to_string()
}

fn default_fallback_state() -> String {
    "To Do".to_string()
}

impl RulesConfig {
    /// Load rule tables from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    /// Built-in tables for Azure DevOps pipelines and the certification test runner.
    pub fn builtin() -> Self {
        let senders = vec![
            SenderMapping {
                pattern: "azuredevops@microsoft.com".into(),
                source: "azure-pipelines".into(),
            },
            SenderMapping {
                pattern: "os-certificacionoperaciones@osde.com.ar".into(),
                source: "test-certification".into(),
            },
        ];

        let mut azure = vec![
            rule(r"partially succeeded", Outcome::Warning),
            rule(r"\bfailed\b", Outcome::Failure),
            rule(r"\bsucceeded\b", Outcome::Success),
            rule(r"\bwarning\b", Outcome::Warning),
        ];
        azure.extend(generic_rules());

        let mut certification = vec![
            rule(r"\bfailed\b", Outcome::Failure),
            rule(r"\bsuccess\b", Outcome::Success),
            rule(r"\bunstable\b", Outcome::Warning),
        ];
        certification.extend(generic_rules());

        let mut azure_extraction = vec![
            template("run id", r"(?i)(?:run|build)\s*#\s*(\d+)", "run_id"),
            template("pipeline", r"(?im)^\s*pipeline[:\s]+(.+)$", "job_name"),
        ];
        azure_extraction.extend(generic_templates());

        let mut sources = BTreeMap::new();
        sources.insert(
            "azure-pipelines".to_string(),
            SourceRules {
                classification: azure,
                extraction: azure_extraction,
            },
        );
        sources.insert(
            "test-certification".to_string(),
            SourceRules {
                classification: certification,
                extraction: generic_templates(),
            },
        );

        Self {
            senders,
            sources,
            board: builtin_board_mapping(),
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

fn rule(pattern: &str, outcome: Outcome) -> ClassificationRuleSpec {
    ClassificationRuleSpec {
        pattern: pattern.to_string(),
        outcome,
    }
}

fn template(label: &str, pattern: &str, field: &str) -> ExtractionTemplateSpec {
    ExtractionTemplateSpec {
        label: label.to_string(),
        pattern: pattern.to_string(),
        field: field.to_string(),
    }
}

/// Keyword fallbacks shared by every source, appended after the source's own rules.
fn generic_rules() -> Vec<ClassificationRuleSpec> {
    let groups: [(&[&str], Outcome); 3] = [
        (
            &["failed", "failure", "error", "falló", "fallo", "fallida"],
            Outcome::Failure,
        ),
        (
            &["succeeded", "success", "exitoso", "completado", "exitosa"],
            Outcome::Success,
        ),
        (
            &["warning", "unstable", "advertencia", "inestable"],
            Outcome::Warning,
        ),
    ];

    groups
        .iter()
        .flat_map(|(words, outcome)| {
            words
                .iter()
                .map(move |word| rule(&regex::escape(word), *outcome))
        })
        .collect()
}

fn generic_templates() -> Vec<ExtractionTemplateSpec> {
    vec![
        template(
            "duration",
            r"(?i)(?:time|duration|tiempo|duracion)[:\s]*([0-9:.]+\s*(?:seconds|secs|minutos|minutes|ms|s)\b)",
            "duration",
        ),
        template(
            "error",
            r"(?i)(?:error|exception|failed|failure)[:\s]+(.+)",
            "error",
        ),
        template(
            "result",
            r"(?i)(?:result|status|estado)[:\s]*(success|failed|passed|completed|completado)",
            "result",
        ),
        template("report link", r#"(https?://[^\s<>"]+|www\.[^\s<>"]+)"#, "link"),
    ]
}

fn builtin_board_mapping() -> BoardMapping {
    let description = |heading: &str| {
        format!(
            "<h3>{heading}</h3>\
             <p><strong>Sender:</strong> {{sender}}</p>\
             <ul>\
             <li><strong>Run:</strong> {{job_name}} #{{run_id}}</li>\
             <li><strong>Error:</strong> {{error}}</li>\
             <li><strong>Duration:</strong> {{duration}}</li>\
             <li><strong>Result:</strong> {{result}}</li>\
             <li><strong>Report:</strong> {{link}}</li>\
             </ul>\
             <pre>{{body}}</pre>"
        )
    };
    let fields = |title: &str, heading: &str| {
        BTreeMap::from([
            ("System.Title".to_string(), format!("{title}: {{subject}}")),
            ("System.Description".to_string(), description(heading)),
            (
                "System.History".to_string(),
                "Work item generated from a run reported by {sender}".to_string(),
            ),
        ])
    };

    let target = |state: &str, tag: &str, title: &str, heading: &str| OutcomeTargetSpec {
        state: state.into(),
        tags: vec![tag.into()],
        fields: fields(title, heading),
    };

    let outcomes = BTreeMap::from([
        (
            Outcome::Failure,
            target("To Do", "Failure", "Execution failed", "Execution error"),
        ),
        (
            Outcome::Warning,
            target("Doing", "Warning", "Execution warning", "Execution finished with warnings"),
        ),
        (
            Outcome::Success,
            target("Done", "Success", "Execution succeeded", "Execution succeeded"),
        ),
    ]);

    let sources = BTreeMap::from([
        (
            "azure-pipelines".to_string(),
            BTreeMap::from([
                (
                    Outcome::Failure,
                    target("To Do", "Failure", "Azure DevOps pipeline failed", "Pipeline error"),
                ),
                (
                    Outcome::Warning,
                    target(
                        "Doing",
                        "Warning",
                        "Azure DevOps pipeline warning",
                        "Pipeline finished with warnings",
                    ),
                ),
                (
                    Outcome::Success,
                    target("Done", "Success", "Azure DevOps pipeline succeeded", "Pipeline succeeded"),
                ),
            ]),
        ),
        (
            "test-certification".to_string(),
            BTreeMap::from([
                (
                    Outcome::Failure,
                    target("To Do", "Failure", "Certification test failed", "Test failure"),
                ),
                (
                    Outcome::Success,
                    target("Done", "Success", "Certification test passed", "Test passed"),
                ),
            ]),
        ),
    ]);

    BoardMapping {
        marker_tag: default_marker_tag(),
        fallback_state: default_fallback_state(),
        outcomes,
        sources,
    }
}

// ── Process configuration ───────────────────────────────────────────

/// Full service configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub email: EmailConfig,
    pub board: BoardConfig,
    pub rules: RulesConfig,
    pub poll_interval: Duration,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// `SYNC_RULES_FILE` replaces the built-in rule tables when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let email = EmailConfig::from_env()?;
        let board = BoardConfig::from_env()?;

        let rules = match std::env::var("SYNC_RULES_FILE") {
            Ok(path) if !path.trim().is_empty() => RulesConfig::from_file(Path::new(path.trim()))?,
            _ => RulesConfig::builtin(),
        };

        let poll_interval =
            Duration::from_secs(env_parse("CHECK_INTERVAL", DEFAULT_CHECK_INTERVAL_SECS)?);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_INTERVAL".into(),
                message: "must be greater than zero".into(),
            });
        }

        let log_file = std::env::var("LOG_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            email,
            board,
            rules,
            poll_interval,
            log_file,
        })
    }
}

// ── Env helpers ─────────────────────────────────────────────────────

/// Read a required, non-empty environment variable.
pub(crate) fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable, falling back to `default` when unset.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_cover_every_mapped_source() {
        let rules = RulesConfig::builtin();
        for mapping in &rules.senders {
            assert!(
                rules.sources.contains_key(&mapping.source),
                "no rules for {}",
                mapping.source
            );
        }
    }

    #[test]
    fn builtin_generic_rules_follow_source_rules() {
        let rules = RulesConfig::builtin();
        let azure = &rules.sources["azure-pipelines"].classification;
        assert_eq!(azure[0].pattern, "partially succeeded");
        assert_eq!(azure[1].outcome, Outcome::Failure);
        assert!(azure.iter().any(|r| r.pattern == "falló"));
    }

    #[test]
    fn builtin_board_mapping_has_all_outcomes_but_unknown() {
        let mapping = RulesConfig::builtin().board;
        assert_eq!(mapping.marker_tag, "Auto-Generated");
        assert!(mapping.outcomes.contains_key(&Outcome::Failure));
        assert!(mapping.outcomes.contains_key(&Outcome::Warning));
        assert!(mapping.outcomes.contains_key(&Outcome::Success));
        assert!(!mapping.outcomes.contains_key(&Outcome::Unknown));
    }

    #[test]
    fn builtin_overrides_name_known_sources_and_keep_shared_states() {
        let rules = RulesConfig::builtin();
        for (source, overrides) in &rules.board.sources {
            assert!(rules.sources.contains_key(source), "{source}");
            for (outcome, spec) in overrides {
                assert_eq!(spec.state, rules.board.outcomes[outcome].state, "{source} {outcome:?}");
            }
        }
        assert!(rules.board.sources["azure-pipelines"][&Outcome::Failure].fields["System.Title"]
            .starts_with("Azure DevOps pipeline failed"));
    }

    #[test]
    fn rules_config_parses_minimal_json() {
        let json = r#"{
            "senders": [{"pattern": "ci@azure.example", "source": "azure-pipelines"}],
            "sources": {
                "azure-pipelines": {
                    "classification": [{"pattern": "failed", "outcome": "failure"}]
                }
            },
            "board": {
                "outcomes": {
                    "failure": {"state": "Doing", "tags": ["Failure"]}
                }
            }
        }"#;
        let rules: RulesConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rules.summary_max_chars, DEFAULT_SUMMARY_MAX_CHARS);
        assert_eq!(rules.board.marker_tag, "Auto-Generated");
        assert_eq!(rules.board.fallback_state, "To Do");
        assert_eq!(rules.board.outcomes[&Outcome::Failure].state, "Doing");
        assert!(rules.sources["azure-pipelines"].extraction.is_empty());
        assert!(rules.board.sources.is_empty());
    }

    #[test]
    fn rules_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let json = serde_json::to_string(&RulesConfig::builtin()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = RulesConfig::from_file(&path).unwrap();
        assert_eq!(loaded.senders.len(), 2);
        assert_eq!(
            loaded.sources["azure-pipelines"].classification.len(),
            RulesConfig::builtin().sources["azure-pipelines"]
                .classification
                .len()
        );
    }

    #[test]
    fn rules_config_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = RulesConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" a@x.com, ,b.org ,"),
            vec!["a@x.com".to_string(), "b.org".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
