//! Static expression analysis
//!
//! Runs before any evaluation: a token denylist catches attempts to reach
//! host facilities, the parser establishes well-formedness, and the node
//! count is compared against the complexity ceiling. The denylist is a
//! defence against expressions pasted in from other runtimes; the grammar
//! itself has no way to express I/O.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::error::SandboxError;

use super::ast::Expr;
use super::parser::parse_expression;

/// Identifiers that reference host facilities in common scripting runtimes
const DENIED_IDENTIFIERS: &[&str] = &[
    "eval",
    "require",
    "import",
    "exec",
    "spawn",
    "process",
    "child_process",
    "fs",
    "net",
    "http",
    "https",
    "socket",
    "fetch",
    "XMLHttpRequest",
    "globalThis",
    "window",
    "document",
    "Function",
    "constructor",
    "prototype",
    "__proto__",
    "while",
    "for",
    "Deno",
    "Bun",
];

fn denied_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = DENIED_IDENTIFIERS.join("|");
        Regex::new(&format!(r"\b({})\b", alternatives)).expect("denylist pattern is well-formed")
    })
}

fn assignment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A bare `=` that is not part of ==, !=, <= or >=.
    RE.get_or_init(|| Regex::new(r"(^|[^=!<>])=($|[^=])").expect("pattern is well-formed"))
}

/// Full static pass: denylist, parse, complexity ceiling
///
/// Returns the parsed AST so callers evaluating right away do not parse
/// twice.
pub fn check_expression(source: &str, complexity_ceiling: usize) -> Result<Expr, SandboxError> {
    if source.trim().is_empty() {
        return Err(SandboxError::Syntax("empty expression".to_string()));
    }
    if let Some(found) = denied_pattern().find(source) {
        return Err(SandboxError::Denied(format!(
            "token '{}' is not allowed",
            found.as_str()
        )));
    }
    if assignment_pattern().is_match(source) {
        return Err(SandboxError::Denied("assignment is not allowed".to_string()));
    }
    if source.contains(';') {
        return Err(SandboxError::Denied("statements are not allowed".to_string()));
    }

    let parsed = parse_expression(source)?;

    let nodes = parsed.complexity();
    if nodes > complexity_ceiling {
        return Err(SandboxError::Complexity {
            nodes,
            ceiling: complexity_ceiling,
        });
    }
    Ok(parsed)
}
