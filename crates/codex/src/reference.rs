//! # Reference Parsing
//!
//! `codex://org/project/path` URIs name documents across organizations and
//! projects. This module parses and builds those URIs and converts legacy
//! `$ref:` references to the current form.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ReferenceError;

pub const CODEX_URI_PREFIX: &str = "codex://";
pub const LEGACY_REF_PREFIX: &str = "$ref:";

const MAX_ORG_LENGTH: usize = 100;
const MAX_PROJECT_LENGTH: usize = 100;
const MAX_PATH_LENGTH: usize = 1000;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").expect("valid name regex"));

/// Parsed components of a `codex://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    /// Organization name (e.g. `fractary`)
    pub org: String,
    /// Project name (e.g. `codex`)
    pub project: String,
    /// Path within the project (e.g. `docs/api.md`)
    pub path: String,
    /// The original URI string
    pub original: String,
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", build_uri(&self.org, &self.project, &self.path))
    }
}

/// Parse a `codex://` URI into its components.
pub fn parse_reference(uri: &str) -> Result<ParsedReference, ReferenceError> {
    if uri.is_empty() {
        return Err(ReferenceError::Empty);
    }

    let Some(rest) = uri.strip_prefix(CODEX_URI_PREFIX) else {
        return Err(ReferenceError::InvalidPrefix {
            uri: uri.to_string(),
        });
    };

    let mut parts = rest.splitn(3, '/');
    let (org, project, path) = match (parts.next(), parts.next(), parts.next()) {
        (Some(org), Some(project), Some(path))
            if !org.is_empty() && !project.is_empty() && !path.is_empty() =>
        {
            (org, project, path)
        }
        _ => {
            return Err(ReferenceError::InvalidFormat {
                uri: uri.to_string(),
            });
        }
    };

    if !NAME_PATTERN.is_match(org) {
        return Err(ReferenceError::InvalidOrg {
            name: org.to_string(),
        });
    }
    if org.len() > MAX_ORG_LENGTH {
        return Err(ReferenceError::TooLong {
            field: "organization name",
            length: org.len(),
            max: MAX_ORG_LENGTH,
        });
    }

    if !NAME_PATTERN.is_match(project) {
        return Err(ReferenceError::InvalidProject {
            name: project.to_string(),
        });
    }
    if project.len() > MAX_PROJECT_LENGTH {
        return Err(ReferenceError::TooLong {
            field: "project name",
            length: project.len(),
            max: MAX_PROJECT_LENGTH,
        });
    }

    if path.len() > MAX_PATH_LENGTH {
        return Err(ReferenceError::TooLong {
            field: "path",
            length: path.len(),
            max: MAX_PATH_LENGTH,
        });
    }

    Ok(ParsedReference {
        org: org.to_string(),
        project: project.to_string(),
        path: path.to_string(),
        original: uri.to_string(),
    })
}

/// Build a `codex://` URI from components.
pub fn build_uri(org: &str, project: &str, path: &str) -> String {
    let normalized_path = path.trim_start_matches('/');
    format!("{CODEX_URI_PREFIX}{org}/{project}/{normalized_path}")
}

/// Check whether a string is a valid `codex://` URI.
pub fn is_valid_uri(uri: &str) -> bool {
    parse_reference(uri).is_ok()
}

/// Check whether text is a legacy `$ref:` reference.
pub fn is_legacy_reference(text: &str) -> bool {
    text.starts_with(LEGACY_REF_PREFIX)
}

/// Convert a legacy `$ref:docs/api.md` reference to `codex://` form.
///
/// When the legacy reference carries no project, `default_project` is used,
/// falling back to `default_org`.
pub fn convert_legacy_reference(
    legacy_ref: &str,
    default_org: &str,
    default_project: Option<&str>,
) -> Result<String, ReferenceError> {
    let Some(path) = legacy_ref.strip_prefix(LEGACY_REF_PREFIX) else {
        return Err(ReferenceError::NotLegacy {
            reference: legacy_ref.to_string(),
        });
    };

    if path.is_empty() {
        return Err(ReferenceError::EmptyLegacyPath);
    }

    let project = default_project.unwrap_or(default_org);
    Ok(build_uri(default_org, project, path))
}
