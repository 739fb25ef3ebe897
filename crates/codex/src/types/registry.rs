//! # Type Registry
//!
//! Maps file paths to artifact types by glob pattern, in priority order.
//! The cache manager consults the registry to pick a TTL for freshly
//! fetched content.

use regex::Regex;

use crate::patterns::compile_pattern;

use super::builtin::{ArtifactType, DEFAULT_TTL, builtin_types};

struct RegisteredType {
    definition: ArtifactType,
    compiled: Vec<Regex>,
}

/// Registry of artifact types with priority-ordered pattern matching.
///
/// Types are matched highest priority first; within a type, the first
/// matching pattern wins. Construct an owned instance explicitly —
/// [`TypeRegistry::new`] for an empty registry or
/// [`TypeRegistry::with_builtins`] for the default set — and pass it to
/// whatever needs TTL policy.
pub struct TypeRegistry {
    // Kept sorted by priority descending; rebuilt on register/unregister
    types: Vec<RegisteredType>,
    default_ttl: u64,
}

impl TypeRegistry {
    /// Create an empty registry with the standard default TTL.
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Create a registry pre-populated with the built-in types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for definition in builtin_types() {
            registry.register(definition);
        }
        registry
    }

    /// Override the TTL returned when no type matches.
    pub fn with_default_ttl(mut self, default_ttl: u64) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    /// Register an artifact type, replacing any existing type of the same
    /// name. Patterns that fail to compile are dropped from matching.
    pub fn register(&mut self, definition: ArtifactType) {
        self.types.retain(|t| t.definition.name != definition.name);

        let compiled = definition
            .patterns
            .iter()
            .filter_map(|pattern| compile_pattern(pattern).ok())
            .collect();

        self.types.push(RegisteredType {
            definition,
            compiled,
        });
        self.types
            .sort_by(|a, b| b.definition.priority.cmp(&a.definition.priority));
    }

    /// Unregister a type by name. Returns true if a type was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.types.len();
        self.types.retain(|t| t.definition.name != name);
        self.types.len() != before
    }

    /// Get a registered type by name.
    pub fn get(&self, name: &str) -> Option<&ArtifactType> {
        self.types
            .iter()
            .find(|t| t.definition.name == name)
            .map(|t| &t.definition)
    }

    /// Find the highest-priority type whose patterns match a path.
    pub fn match_path(&self, path: &str) -> Option<&ArtifactType> {
        let normalized = path.replace('\\', "/");
        let normalized = normalized.trim_start_matches('/');

        self.types
            .iter()
            .find(|t| t.compiled.iter().any(|regex| regex.is_match(normalized)))
            .map(|t| &t.definition)
    }

    /// TTL in seconds for a path, falling back to the registry default.
    pub fn get_ttl(&self, path: &str) -> u64 {
        self.match_path(path)
            .map(|t| t.ttl)
            .unwrap_or(self.default_ttl)
    }

    /// All registered types, priority descending.
    pub fn list_types(&self) -> Vec<&ArtifactType> {
        self.types.iter().map(|t| &t.definition).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::builtin::ttl;

    #[test]
    fn docs_paths_get_a_day() {
        let registry = TypeRegistry::with_builtins();
        assert_eq!(registry.get_ttl("docs/api.md"), ttl::DAY);
        assert_eq!(registry.get_ttl("docs/guides/intro.mdx"), ttl::DAY);
    }

    #[test]
    fn config_paths_get_an_hour() {
        let registry = TypeRegistry::with_builtins();
        assert_eq!(registry.get_ttl("config.yaml"), ttl::HOUR);
        assert_eq!(registry.get_ttl(".fractary/settings.yaml"), ttl::HOUR);
    }

    #[test]
    fn unmatched_paths_fall_back_to_default() {
        let registry = TypeRegistry::with_builtins();
        assert_eq!(registry.get_ttl("src/main.rs"), DEFAULT_TTL);
    }

    #[test]
    fn priority_orders_matching() {
        // prompts (prio 50) should win over docs (prio 10) for prompt markdown
        let registry = TypeRegistry::with_builtins();
        let matched = registry.match_path("prompts/summary.md").unwrap();
        assert_eq!(matched.name, "prompts");
        assert_eq!(registry.get_ttl("prompts/summary.md"), ttl::HOUR);
    }

    #[test]
    fn custom_type_overrides_builtin() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register(ArtifactType::new(
            "api-docs",
            vec!["docs/api/**/*.md".to_string()],
            ttl::HOUR,
            100,
        ));

        assert_eq!(registry.get_ttl("docs/api/endpoints.md"), ttl::HOUR);
        // Other docs keep the builtin TTL
        assert_eq!(registry.get_ttl("docs/readme.md"), ttl::DAY);
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = TypeRegistry::new();
        registry.register(ArtifactType::new(
            "docs",
            vec!["docs/**".to_string()],
            100,
            1,
        ));
        registry.register(ArtifactType::new(
            "docs",
            vec!["docs/**".to_string()],
            200,
            1,
        ));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_ttl("docs/a.md"), 200);
    }

    #[test]
    fn unregister_removes_type() {
        let mut registry = TypeRegistry::with_builtins();
        assert!(registry.contains("docs"));
        assert!(registry.unregister("docs"));
        assert!(!registry.contains("docs"));
        assert!(!registry.unregister("docs"));
    }

    #[test]
    fn empty_registry_uses_custom_default() {
        let registry = TypeRegistry::new().with_default_ttl(42);
        assert_eq!(registry.get_ttl("anything/at/all"), 42);
    }
}
