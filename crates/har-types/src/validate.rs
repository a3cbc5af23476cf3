//! Configuration validation.
//!
//! All rules are checked atomically: every violation is collected and
//! reported together rather than stopping at the first failure, so a
//! caller fixing its configuration doesn't have to round-trip once per
//! mistake.

use crate::options::{Options, ResponseBodyScope};
use std::fmt;

/// One violated configuration rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    CompressionWithFallbackAdapter,
    BodyScopeNoneWithMaxSize,
    OutputSizeCapWithoutPath,
    EmptyCreatorName,
    EmptyPattern { list: &'static str, index: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::CompressionWithFallbackAdapter => write!(
                f,
                "enable_compression and force_fallback_adapter cannot both be true"
            ),
            Violation::BodyScopeNoneWithMaxSize => write!(
                f,
                "response_body_scope = None conflicts with max_response_body_size > 0"
            ),
            Violation::OutputSizeCapWithoutPath => write!(
                f,
                "max_output_file_size > 0 requires output_file_path to be set"
            ),
            Violation::EmptyCreatorName => write!(f, "creator_name must be non-empty"),
            Violation::EmptyPattern { list, index } => {
                write!(f, "{list}[{index}] must be non-empty")
            }
        }
    }
}

/// Aggregate validation failure: every rule `Options` broke, in check order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {}", join_violations(.0))]
pub struct ValidationError(pub Vec<Violation>);

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Check every rule, returning every violation found rather than the first.
pub fn validate(options: &Options) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    if options.enable_compression && options.force_fallback_adapter {
        violations.push(Violation::CompressionWithFallbackAdapter);
    }
    if options.response_body_scope == ResponseBodyScope::None
        && options.max_response_body_size > 0
    {
        violations.push(Violation::BodyScopeNoneWithMaxSize);
    }
    if options.max_output_file_size > 0 && options.output_file_path.is_none() {
        violations.push(Violation::OutputSizeCapWithoutPath);
    }
    if options.creator_name.is_empty() {
        violations.push(Violation::EmptyCreatorName);
    }
    for (index, pattern) in options.url_include_patterns.iter().enumerate() {
        if pattern.is_empty() {
            violations.push(Violation::EmptyPattern {
                list: "url_include_patterns",
                index,
            });
        }
    }
    for (index, pattern) in options.url_exclude_patterns.iter().enumerate() {
        if pattern.is_empty() {
            violations.push(Violation::EmptyPattern {
                list: "url_exclude_patterns",
                index,
            });
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError(violations))
    }
}
