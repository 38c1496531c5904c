//! The comparison mini-language used by outcome `when` expressions.
//!
//! Operators `<`, `<=`, `==`, `!=`, `>=`, `>` (and a lone `=` as equality)
//! compare numbers, semantic versions, durations, and Kubernetes resource
//! quantities. Version comparison is lenient: an optional `v` prefix and
//! missing minor/patch components defaulting to zero.

use std::time::Duration;

use crate::core::errors::{PeriscopeError, Result};

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==` or `=`
    Eq,
    /// `!=`
    Ne,
    /// `>=`
    Ge,
    /// `>`
    Gt,
}

impl Op {
    fn holds<T: PartialOrd>(self, actual: &T, expected: &T) -> bool {
        match self {
            Self::Lt => actual < expected,
            Self::Le => actual <= expected,
            Self::Eq => actual == expected,
            Self::Ne => actual != expected,
            Self::Ge => actual >= expected,
            Self::Gt => actual > expected,
        }
    }
}

/// Split an expression like ">= 1.22.0" into operator and operand.
pub fn parse_expr(expr: &str) -> Result<(Op, &str)> {
    let expr = expr.trim();
    for (token, op) in [
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<", Op::Lt),
        (">", Op::Gt),
        ("=", Op::Eq),
    ] {
        if let Some(rest) = expr.strip_prefix(token) {
            let operand = rest.trim();
            if operand.is_empty() {
                return Err(PeriscopeError::spec(
                    "",
                    "invalid-when",
                    format!("missing operand in {expr:?}"),
                ));
            }
            return Ok((op, operand));
        }
    }
    Err(PeriscopeError::spec(
        "",
        "invalid-when",
        format!("no comparison operator in {expr:?}"),
    ))
}

/// Bare numeric comparison: actual against "op number".
pub fn compare_numbers(actual: f64, expr: &str) -> Result<bool> {
    let (op, operand) = parse_expr(expr)?;
    let expected: f64 = operand.parse().map_err(|_| {
        PeriscopeError::spec("", "invalid-when", format!("not a number: {operand:?}"))
    })?;
    Ok(op.holds(&actual, &expected))
}

/// Lenient semver key: optional `v` prefix, build/pre-release suffixes
/// ignored, missing components default to zero.
pub fn version_key(raw: &str) -> Result<(u64, u64, u64)> {
    let trimmed = raw.trim().trim_start_matches('v');
    let core: &str = trimmed
        .split(|c: char| c == '-' || c == '+')
        .next()
        .unwrap_or_default();
    let mut parts = core.split('.');
    let mut component = |name: &str| -> Result<u64> {
        match parts.next() {
            None | Some("") => Ok(0),
            Some(p) => p.trim().parse().map_err(|_| {
                PeriscopeError::spec(
                    "",
                    "invalid-version",
                    format!("bad {name} component in {raw:?}"),
                )
            }),
        }
    };
    let major = component("major")?;
    let minor = component("minor")?;
    let patch = component("patch")?;
    Ok((major, minor, patch))
}

/// Semantic version comparison: actual against "op version".
pub fn compare_versions(actual: &str, expr: &str) -> Result<bool> {
    let (op, operand) = parse_expr(expr)?;
    let actual = version_key(actual)?;
    let expected = version_key(operand)?;
    Ok(op.holds(&actual, &expected))
}

/// Parse a Kubernetes resource quantity into a float (base units).
///
/// Suffixes: `m` (milli), decimal `k M G T P E`, binary `Ki Mi Gi Ti Pi Ei`.
pub fn parse_quantity(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PeriscopeError::spec("", "invalid-quantity", "empty quantity"));
    }

    let (number, multiplier) = if let Some(prefix) = raw.strip_suffix("Ki") {
        (prefix, 1024f64)
    } else if let Some(prefix) = raw.strip_suffix("Mi") {
        (prefix, 1024f64.powi(2))
    } else if let Some(prefix) = raw.strip_suffix("Gi") {
        (prefix, 1024f64.powi(3))
    } else if let Some(prefix) = raw.strip_suffix("Ti") {
        (prefix, 1024f64.powi(4))
    } else if let Some(prefix) = raw.strip_suffix("Pi") {
        (prefix, 1024f64.powi(5))
    } else if let Some(prefix) = raw.strip_suffix("Ei") {
        (prefix, 1024f64.powi(6))
    } else if let Some(prefix) = raw.strip_suffix('m') {
        (prefix, 0.001)
    } else if let Some(prefix) = raw.strip_suffix('k') {
        (prefix, 1e3)
    } else if let Some(prefix) = raw.strip_suffix('M') {
        (prefix, 1e6)
    } else if let Some(prefix) = raw.strip_suffix('G') {
        (prefix, 1e9)
    } else if let Some(prefix) = raw.strip_suffix('T') {
        (prefix, 1e12)
    } else if let Some(prefix) = raw.strip_suffix('P') {
        (prefix, 1e15)
    } else if let Some(prefix) = raw.strip_suffix('E') {
        (prefix, 1e18)
    } else {
        (raw, 1f64)
    };

    let value: f64 = number.trim().parse().map_err(|_| {
        PeriscopeError::spec("", "invalid-quantity", format!("bad quantity {raw:?}"))
    })?;
    Ok(value * multiplier)
}

/// Quantity comparison: actual (base units) against "op quantity".
pub fn compare_quantities(actual: f64, expr: &str) -> Result<bool> {
    let (op, operand) = parse_expr(expr)?;
    let expected = parse_quantity(operand)?;
    Ok(op.holds(&actual, &expected))
}

/// Duration comparison: actual against "op humantime-duration".
pub fn compare_durations(actual: Duration, expr: &str) -> Result<bool> {
    let (op, operand) = parse_expr(expr)?;
    let expected = humantime::parse_duration(operand).map_err(|e| {
        PeriscopeError::spec("", "invalid-when", format!("bad duration {operand:?}: {e}"))
    })?;
    Ok(op.holds(&actual, &expected))
}

/// String equality comparison: actual against "op word" or a bare word
/// (treated as equality).
pub fn compare_strings(actual: &str, expr: &str) -> Result<bool> {
    match parse_expr(expr) {
        Ok((Op::Eq, operand)) => Ok(actual == operand),
        Ok((Op::Ne, operand)) => Ok(actual != operand),
        Ok((op, _)) => Err(PeriscopeError::spec(
            "",
            "invalid-when",
            format!("operator {op:?} does not apply to strings"),
        )),
        Err(_) => Ok(actual == expr.trim()),
    }
}
