//! Read-only gate for SQL text and table identifiers
//!
//! Keyword and pattern filtering only. Nothing here parses SQL; the database
//! credentials are expected to be least-privilege as well.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const DEFAULT_MAX_QUERY_LENGTH: usize = 10_000;

pub const WRITE_KEYWORDS: [&str; 11] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "GRANT", "REVOKE",
];

pub const ALLOWED_STATEMENTS: [&str; 5] = ["SELECT", "EXPLAIN", "DESCRIBE", "SHOW", "WITH"];

const DANGEROUS_IDENTIFIER_FRAGMENTS: [&str; 7] =
    ["--", "/*", "*/", ";", "DROP", "DELETE", "UPDATE"];

static WRITE_KEYWORD_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    WRITE_KEYWORDS
        .iter()
        .map(|keyword| {
            let pattern = Regex::new(&format!(r"\b{keyword}\b")).expect("valid keyword pattern");
            (*keyword, pattern)
        })
        .collect()
});

static DANGEROUS_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "statement separator followed by a write keyword",
            r"(?i);\s*(DROP|DELETE|UPDATE|INSERT|CREATE|ALTER|TRUNCATE)",
        ),
        ("line comment", r"--"),
        ("block comment", r"(?s)/\*.*\*/"),
        ("xp_cmdshell", r"(?i)xp_cmdshell"),
        ("exec call", r"(?i)exec\s*\("),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("valid injection pattern")))
    .collect()
});

static IDENTIFIER_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[A-Za-z0-9_.`"]+$"#).expect("valid identifier pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("query exceeds maximum length of {max} bytes")]
    TooLong { max: usize },
    #[error("query cannot be empty")]
    Empty,
    #[error("write operation detected: {0} is not allowed")]
    WriteKeyword(&'static str),
    #[error("query must start with SELECT, EXPLAIN, DESCRIBE, SHOW, or WITH")]
    DisallowedStatement,
    #[error("potentially dangerous SQL pattern detected: {0}")]
    DangerousPattern(&'static str),
    #[error("table name cannot be empty")]
    EmptyIdentifier,
    #[error("invalid table name: {0}")]
    InvalidIdentifier(String),
    #[error("potentially dangerous table name: {0}")]
    DangerousIdentifier(String),
}

#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_query_length: usize,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUERY_LENGTH)
    }
}

impl QueryValidator {
    /// A zero limit falls back to [`DEFAULT_MAX_QUERY_LENGTH`].
    pub fn new(max_query_length: usize) -> Self {
        let max_query_length = if max_query_length == 0 {
            DEFAULT_MAX_QUERY_LENGTH
        } else {
            max_query_length
        };
        Self { max_query_length }
    }

    pub fn max_query_length(&self) -> usize {
        self.max_query_length
    }

    /// Checks run in a fixed order and the first failure is returned.
    pub fn validate_read_only_query(&self, query: &str) -> Result<(), Rejection> {
        if query.len() > self.max_query_length {
            return Err(Rejection::TooLong {
                max: self.max_query_length,
            });
        }

        let normalized = query.trim();
        if normalized.is_empty() {
            return Err(Rejection::Empty);
        }
        let upper = normalized.to_uppercase();

        if let Some(keyword) = find_write_keyword(&upper) {
            return Err(Rejection::WriteKeyword(keyword));
        }

        if !ALLOWED_STATEMENTS
            .iter()
            .any(|statement| upper.starts_with(statement))
        {
            return Err(Rejection::DisallowedStatement);
        }

        // Patterns run against the caller's text, not the normalized copy.
        if let Some((label, _)) = DANGEROUS_PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(query))
        {
            return Err(Rejection::DangerousPattern(label));
        }

        Ok(())
    }
}

/// Accepts `table`, `schema.table` and quoted forms of either.
pub fn validate_identifier(name: &str) -> Result<(), Rejection> {
    if name.is_empty() {
        return Err(Rejection::EmptyIdentifier);
    }

    if !IDENTIFIER_CHARS.is_match(name) {
        return Err(Rejection::InvalidIdentifier(name.to_string()));
    }

    let upper = name.to_uppercase();
    if DANGEROUS_IDENTIFIER_FRAGMENTS
        .iter()
        .any(|fragment| upper.contains(fragment))
    {
        return Err(Rejection::DangerousIdentifier(name.to_string()));
    }

    Ok(())
}

fn find_write_keyword(upper: &str) -> Option<&'static str> {
    WRITE_KEYWORD_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(upper))
        .map(|(keyword, _)| *keyword)
}
