//! Validated identifiers for values that end up inside SQL text or file paths.
//!
//! Table and column names cannot be bound as query parameters, so any name
//! that reaches a dynamic query must first become an [`Identifier`]. The only
//! ways to build one run the allow-list check.

use std::fmt;

use crate::error::{Error, Result};

/// Prefix reserved by `SQLite` for its internal tables.
const RESERVED_PREFIX: &str = "sqlite_";

/// A name made only of ASCII alphanumerics and `_`, safe to interpolate into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Accept `raw` only if every character is already allowed.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || is_reserved(raw) || !raw.chars().all(is_identifier_char) {
            return Err(Error::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Drop every disallowed character from `raw`.
    ///
    /// Mirrors how request path segments are cleaned before they name a
    /// table: `od_readings;--` becomes `od_readings`. Reserved names and
    /// values that scrub down to nothing are rejected.
    pub fn scrub(raw: &str) -> Result<Self> {
        let cleaned: String = raw.chars().filter(|c| is_identifier_char(*c)).collect();
        if cleaned.is_empty() || is_reserved(&cleaned) {
            return Err(Error::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `SQLite` matches table names case-insensitively.
fn is_reserved(name: &str) -> bool {
    name.get(..RESERVED_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(RESERVED_PREFIX))
}

const fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Returns true if `name` is a plain file name: `[a-zA-Z0-9._-]+`, no separators.
pub fn is_valid_unix_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
