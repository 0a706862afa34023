//! Data models for pinstall
//!
//! A `PackageSpec` is one requirement as pip understands it:
//! `name[extras] constraint ; marker`. Extras and markers are opaque text,
//! carried through verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::Error;

static NAME_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").unwrap());

/// Version comparison operators, longest first so `===` wins over `==`
const OPERATORS: [&str; 8] = ["===", "==", "!=", "~=", "<=", ">=", "<", ">"];

/// Normalize a package name for comparison (PEP 503)
///
/// `NumPy`, `numpy`, `zope.interface` and `Zope_Interface` all collapse to
/// lowercase with `-` separators.
pub fn normalize_name(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(name, "-")
        .to_lowercase()
}

/// A requested package, optionally constrained
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSpec {
    /// Name as the user typed it; casing is preserved when written
    pub name: String,
    /// Extras including brackets, e.g. `[socks]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extras: Option<String>,
    /// Version constraint such as `==1.21.0` or `>=1.0,<2`, or `@ <url>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
    /// Environment marker (text after `;`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

impl PackageSpec {
    /// Name used for matching entries
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Everything after the name, whitespace-insensitive
    ///
    /// Two specs for the same package with equal keys need no manifest change.
    pub fn requirement_key(&self) -> String {
        let mut key = String::new();
        for part in [&self.extras, &self.version_constraint, &self.marker]
            .into_iter()
            .flatten()
        {
            key.push('|');
            key.extend(part.chars().filter(|c| !c.is_whitespace()));
        }
        key
    }

    /// Same package pinned to an exact version
    pub fn pinned(&self, version: &str) -> Self {
        Self {
            version_constraint: Some(format!("=={}", version.trim())),
            ..self.clone()
        }
    }

    pub fn is_versioned(&self) -> bool {
        self.version_constraint.is_some()
    }

    /// `name @ url` rather than a version constraint
    pub fn is_direct_reference(&self) -> bool {
        self.version_constraint
            .as_deref()
            .is_some_and(|c| c.starts_with('@'))
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(extras) = &self.extras {
            write!(f, "{}", extras)?;
        }
        if let Some(constraint) = &self.version_constraint {
            if self.is_direct_reference() {
                write!(f, " {}", constraint)?;
            } else {
                write!(f, "{}", constraint)?;
            }
        }
        if let Some(marker) = &self.marker {
            // A URL needs whitespace before `;` or pip reads it as part of the URL
            if self.is_direct_reference() {
                write!(f, " ; {}", marker)?;
            } else {
                write!(f, "; {}", marker)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for PackageSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_spec(s).map_err(|reason| Error::InvalidSpec {
            spec: s.to_string(),
            reason,
        })
    }
}

fn parse_spec(input: &str) -> Result<PackageSpec, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty package name".to_string());
    }

    let name_len = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(s.len());
    let name = &s[..name_len];
    if name.is_empty() {
        return Err("missing package name".to_string());
    }
    let bounded = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !bounded(name.chars().next()) || !bounded(name.chars().last()) {
        return Err(format!("'{}' is not a valid package name", name));
    }

    let mut rest = s[name_len..].trim_start();

    let extras = if rest.starts_with('[') {
        let close = rest.find(']').ok_or("unclosed extras bracket")?;
        let extras = rest[..=close].to_string();
        rest = rest[close + 1..].trim_start();
        Some(extras)
    } else {
        None
    };

    let (constraint, marker) = match rest.split_once(';') {
        Some((constraint, marker)) => {
            let marker = marker.trim();
            if marker.is_empty() {
                return Err("empty environment marker".to_string());
            }
            (constraint.trim(), Some(marker.to_string()))
        }
        None => (rest.trim(), None),
    };

    let version_constraint = if constraint.is_empty() {
        None
    } else if let Some(url) = constraint.strip_prefix('@') {
        let url = url.trim();
        if url.is_empty() {
            return Err("empty direct reference".to_string());
        }
        Some(format!("@ {}", url))
    } else {
        Some(parse_constraint(constraint)?)
    };

    Ok(PackageSpec {
        name: name.to_string(),
        extras,
        version_constraint,
        marker,
    })
}

/// Validate a comma separated list of `<op><version>` clauses, dropping whitespace
fn parse_constraint(text: &str) -> Result<String, String> {
    let inner = match text.strip_prefix('(') {
        Some(open) => open
            .strip_suffix(')')
            .ok_or("unclosed parenthesis in version constraint")?,
        None => text,
    };

    let mut clauses = Vec::new();
    for clause in inner.split(',') {
        let clause = clause.trim();
        let op = OPERATORS
            .iter()
            .find(|op| clause.starts_with(*op))
            .ok_or_else(|| format!("unexpected text '{}'", clause))?;
        let version = clause[op.len()..].trim();
        if version.is_empty() {
            return Err(format!("missing version after '{}'", op));
        }
        if !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '-' | '_'))
        {
            return Err(format!("invalid version '{}'", version));
        }
        clauses.push(format!("{}{}", op, version));
    }
    Ok(clauses.join(","))
}
