//! Ref name validation following git's `check-ref-format` rules.
//!
//! Valid ref names:
//! - Must be non-empty
//! - Must not contain whitespace, control characters, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..` (double dot) or `@{`, and must not be the single character `@`
//! - Must not start or end with `/`, and must not end with `.`
//! - No component may start with `.` or end with `.lock`
//! - Must not contain consecutive slashes (`//`)

use crate::error::{RefError, Result};

/// Characters that are forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

fn invalid(name: &str, reason: impl Into<String>) -> RefError {
    RefError::InvalidRefName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a full ref name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use odb_refs::names::validate_ref_name;
///
/// assert!(validate_ref_name("refs/heads/main").is_ok());
/// assert!(validate_ref_name("refs/replace/4b825dc642cb6eb9a060e54bf8d69288fbee4904").is_ok());
/// assert!(validate_ref_name("").is_err());
/// assert!(validate_ref_name("refs/heads/bad..name").is_err());
/// ```
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "ref name must not be empty"));
    }
    if name == "@" {
        return Err(invalid(name, "ref name must not be '@'"));
    }

    if let Some(ch) = name.chars().find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c)) {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }

    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }

    if name.contains("@{") {
        return Err(invalid(name, "must not contain '@{'"));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid(name, "must not start or end with '/'"));
    }

    if name.ends_with('.') {
        return Err(invalid(name, "must not end with '.'"));
    }

    if name.contains("//") {
        return Err(invalid(name, "must not contain consecutive slashes '//'"));
    }

    for component in name.split('/') {
        if component.starts_with('.') {
            return Err(invalid(
                name,
                format!("component must not start with '.': {component:?}"),
            ));
        }
        if component.ends_with(".lock") {
            return Err(invalid(
                name,
                format!("component must not end with '.lock': {component:?}"),
            ));
        }
    }

    Ok(())
}
