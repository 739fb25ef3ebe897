//! # Built-in Artifact Types
//!
//! Default artifact types recognized by the SDK, with their default cache
//! TTLs. The set matches the TypeScript SDK's built-ins.

use serde::{Deserialize, Serialize};

/// Time-to-live constants, in seconds.
pub mod ttl {
    pub const MINUTE: u64 = 60;
    pub const HOUR: u64 = 3600;
    pub const DAY: u64 = 86_400;
    pub const WEEK: u64 = 604_800;
    /// 30 days
    pub const MONTH: u64 = 2_592_000;
    /// 365 days
    pub const YEAR: u64 = 31_536_000;

    // Common aliases
    pub const FIVE_MINUTES: u64 = 300;
    pub const FIFTEEN_MINUTES: u64 = 900;
    pub const THIRTY_MINUTES: u64 = 1800;
    pub const SIX_HOURS: u64 = 21_600;
    pub const TWELVE_HOURS: u64 = 43_200;
    pub const TWO_DAYS: u64 = 172_800;
    pub const THREE_DAYS: u64 = 259_200;
}

/// TTL used when no registered type matches a path.
pub const DEFAULT_TTL: u64 = ttl::DAY;

/// Definition of an artifact type: a named pattern set with a TTL policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactType {
    /// Unique identifier for the type (e.g. `docs`, `config`)
    pub name: String,
    /// Glob patterns that match this type
    pub patterns: Vec<String>,
    /// Default TTL in seconds for caching
    pub ttl: u64,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Priority for pattern matching (higher = checked first)
    #[serde(default)]
    pub priority: i32,
}

impl ArtifactType {
    pub fn new(name: impl Into<String>, patterns: Vec<String>, ttl: u64, priority: i32) -> Self {
        Self {
            name: name.into(),
            patterns,
            ttl,
            description: String::new(),
            priority,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

fn patterns(values: &[&str]) -> Vec<String> {
    values.iter().map(|p| (*p).to_string()).collect()
}

/// The built-in artifact types, unsorted.
pub fn builtin_types() -> Vec<ArtifactType> {
    vec![
        ArtifactType::new(
            "docs",
            patterns(&["docs/**/*.md", "docs/**/*.mdx", "*.md"]),
            ttl::DAY,
            10,
        )
        .with_description("Documentation files"),
        ArtifactType::new(
            "config",
            patterns(&[
                "*.yaml",
                "*.yml",
                "*.json",
                "*.toml",
                ".fractary/**",
                "config/**",
            ]),
            ttl::HOUR,
            20,
        )
        .with_description("Configuration files"),
        ArtifactType::new(
            "schema",
            patterns(&[
                "schemas/**/*.json",
                "schemas/**/*.yaml",
                "**/*.schema.json",
                "**/*.schema.yaml",
            ]),
            ttl::DAY,
            30,
        )
        .with_description("Schema definition files"),
        ArtifactType::new(
            "templates",
            patterns(&["templates/**/*", "**/*.template.*", "**/*.tmpl"]),
            ttl::WEEK,
            15,
        )
        .with_description("Template files"),
        ArtifactType::new(
            "specs",
            patterns(&["specs/**/*.md", "specifications/**/*.md"]),
            ttl::DAY,
            25,
        )
        .with_description("Specification documents"),
        ArtifactType::new(
            "workflows",
            patterns(&[".github/workflows/**/*.yaml", ".github/workflows/**/*.yml"]),
            ttl::SIX_HOURS,
            40,
        )
        .with_description("CI/CD workflow files"),
        ArtifactType::new(
            "scripts",
            patterns(&["scripts/**/*.sh", "scripts/**/*.py", "bin/**/*"]),
            ttl::TWELVE_HOURS,
            35,
        )
        .with_description("Script files"),
        ArtifactType::new(
            "prompts",
            patterns(&["prompts/**/*.md", "prompts/**/*.txt", "**/*.prompt.md"]),
            ttl::HOUR,
            50,
        )
        .with_description("AI prompt templates"),
        ArtifactType::new(
            "agents",
            patterns(&["agents/**/*", "**/*.agent.yaml", "**/*.agent.md"]),
            ttl::HOUR,
            45,
        )
        .with_description("AI agent definitions"),
        ArtifactType::new(
            "skills",
            patterns(&["skills/**/*", "**/*.skill.yaml", "**/*.skill.md"]),
            ttl::HOUR,
            45,
        )
        .with_description("AI skill definitions"),
    ]
}
