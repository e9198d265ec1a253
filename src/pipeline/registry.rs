//! Sender registry: maps sender addresses/domains to source systems.

use std::collections::HashMap;

use crate::config::RulesConfig;
use crate::pipeline::types::SourceSystem;

/// Resolves a sender address to the CI system that sent it.
///
/// Exact addresses are checked first, then domain suffixes. Matching is
/// case-insensitive. Unresolved senders yield `None`.
#[derive(Debug, Clone, Default)]
pub struct SenderRegistry {
    exact: HashMap<String, SourceSystem>,
    /// Lowercased domain (no leading `@`) → source, in configuration order.
    domains: Vec<(String, SourceSystem)>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the sender table.
    pub fn from_config(config: &RulesConfig) -> Self {
        let mut registry = Self::new();
        for mapping in &config.senders {
            registry.register(&mapping.pattern, SourceSystem::new(mapping.source.clone()));
        }
        registry
    }

    /// Add a mapping.
    ///
    /// - `user@domain.com` → exact address
    /// - `@domain.com` or `domain.com` → domain (and subdomains)
    pub fn register(&mut self, pattern: &str, source: SourceSystem) {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() {
            return;
        }
        if let Some(domain) = pattern.strip_prefix('@') {
            self.domains.push((domain.to_string(), source));
        } else if pattern.contains('@') {
            self.exact.insert(pattern, source);
        } else {
            self.domains.push((pattern, source));
        }
    }

    /// Drop every mapping whose source fails `keep`.
    pub fn retain_sources(&mut self, keep: impl Fn(&SourceSystem) -> bool) {
        self.exact.retain(|_, source| keep(source));
        self.domains.retain(|(_, source)| keep(source));
    }

    pub fn resolve(&self, sender: &str) -> Option<SourceSystem> {
        let address = normalize_address(sender);
        if address.is_empty() {
            return None;
        }

        if let Some(source) = self.exact.get(&address) {
            return Some(source.clone());
        }

        let (_, domain) = address.rsplit_once('@')?;
        self.domains
            .iter()
            .find(|(suffix, _)| domain == suffix || domain.ends_with(&format!(".{suffix}")))
            .map(|(_, source)| source.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.domains.is_empty()
    }
}

/// Lowercase bare address from `addr` or `Display Name <addr>`.
pub fn normalize_address(sender: &str) -> String {
    let trimmed = sender.trim();
    let bare = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    };
    bare.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SenderRegistry {
        let mut registry = SenderRegistry::new();
        registry.register("ci@azure.example", SourceSystem::new("azure-pipelines"));
        registry.register("@jenkins.example", SourceSystem::new("jenkins"));
        registry.register("gitlab.example", SourceSystem::new("gitlab"));
        registry.register("release@jenkins.example", SourceSystem::new("release"));
        registry
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let registry = registry();
        assert_eq!(
            registry.resolve("CI@Azure.Example"),
            Some(SourceSystem::new("azure-pipelines"))
        );
    }

    #[test]
    fn exact_match_wins_over_domain() {
        let registry = registry();
        assert_eq!(
            registry.resolve("release@jenkins.example"),
            Some(SourceSystem::new("release"))
        );
        assert_eq!(
            registry.resolve("builds@jenkins.example"),
            Some(SourceSystem::new("jenkins"))
        );
    }

    #[test]
    fn domain_match_with_and_without_at_prefix() {
        let registry = registry();
        assert_eq!(
            registry.resolve("noreply@gitlab.example"),
            Some(SourceSystem::new("gitlab"))
        );
        assert_eq!(
            registry.resolve("ci@eu.gitlab.example"),
            Some(SourceSystem::new("gitlab"))
        );
    }

    #[test]
    fn domain_match_requires_label_boundary() {
        let registry = registry();
        assert_eq!(registry.resolve("ci@notgitlab.example"), None);
    }

    #[test]
    fn display_name_form_is_normalized() {
        let registry = registry();
        assert_eq!(
            registry.resolve("Azure DevOps <CI@azure.example>"),
            Some(SourceSystem::new("azure-pipelines"))
        );
    }

    #[test]
    fn unknown_and_empty_senders_resolve_to_none() {
        let registry = registry();
        assert_eq!(registry.resolve("someone@else.example"), None);
        assert_eq!(registry.resolve(""), None);
        assert_eq!(registry.resolve("not-an-address"), None);
    }

    #[test]
    fn retain_sources_drops_mappings() {
        let mut registry = registry();
        registry.retain_sources(|s| s.as_str() != "jenkins");
        assert_eq!(registry.resolve("builds@jenkins.example"), None);
        assert_eq!(
            registry.resolve("release@jenkins.example"),
            Some(SourceSystem::new("release"))
        );
    }

    #[test]
    fn retaining_no_source_empties_registry() {
        let mut registry = registry();
        assert!(!registry.is_empty());
        registry.retain_sources(|_| false);
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("ci@azure.example"), None);
    }

    #[test]
    fn from_builtin_config() {
        let registry = SenderRegistry::from_config(&RulesConfig::builtin());
        assert_eq!(
            registry.resolve("AzureDevOps@Microsoft.com"),
            Some(SourceSystem::new("azure-pipelines"))
        );
    }
}
