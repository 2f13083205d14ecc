//! Sub-domain selectors
//!
//! A selector decides whether a route serves a requested sub-domain. For the
//! host `a.b.test.com` under the domain `test.com`, the sub-domain is `a.b`.
//!
//! Pattern selectors are compiled while the configuration is deserialized, so
//! a bad pattern is a configuration error and concurrent matching never
//! touches mutable state.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a selector expression is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Byte-for-byte comparison
    #[default]
    #[serde(alias = "string")]
    Exact,
    /// Full match against a regular expression
    #[serde(alias = "regexp", alias = "regex")]
    Pattern,
}

/// Serialized form of a selector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSpec {
    /// Selector kind, defaults to exact
    #[serde(rename = "type", default)]
    pub kind: SelectorKind,

    /// Expression to match against the sub-domain
    pub exp: String,
}

/// A compiled match rule for a sub-domain
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "SelectorSpec", into = "SelectorSpec")]
pub struct Selector {
    kind: SelectorKind,
    expression: String,
    compiled: Option<Regex>,
}

impl Selector {
    /// Create an exact selector
    pub fn exact(expression: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::Exact,
            expression: expression.into(),
            compiled: None,
        }
    }

    /// Create a pattern selector, compiling the expression up front
    pub fn pattern(expression: impl Into<String>) -> Result<Self> {
        let expression = expression.into();
        // Anchored so the whole sub-domain has to match, not a fragment of it.
        let compiled = Regex::new(&format!("^(?:{})$", expression)).map_err(|source| {
            Error::Pattern {
                pattern: expression.clone(),
                source,
            }
        })?;

        Ok(Self {
            kind: SelectorKind::Pattern,
            expression,
            compiled: Some(compiled),
        })
    }

    /// Selector kind
    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    /// Original expression
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Check whether a sub-domain satisfies this selector
    pub fn matches(&self, subdomain: &str) -> bool {
        match (&self.kind, &self.compiled) {
            (SelectorKind::Exact, _) => self.expression == subdomain,
            (SelectorKind::Pattern, Some(re)) => re.is_match(subdomain),
            (SelectorKind::Pattern, None) => false,
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("kind", &self.kind)
            .field("expression", &self.expression)
            .finish()
    }
}

impl TryFrom<SelectorSpec> for Selector {
    type Error = Error;

    fn try_from(spec: SelectorSpec) -> Result<Self> {
        match spec.kind {
            SelectorKind::Exact => Ok(Self::exact(spec.exp)),
            SelectorKind::Pattern => Self::pattern(spec.exp),
        }
    }
}

impl From<Selector> for SelectorSpec {
    fn from(selector: Selector) -> Self {
        Self {
            kind: selector.kind,
            exp: selector.expression,
        }
    }
}
