//! Requirements manifest: tokenizer, reconciler and atomic writer
//!
//! Every line of the file is classified into a [`LineKind`] and keeps its raw
//! text, so lines the reconciler does not touch are written back byte for
//! byte. Only package entries are actionable; comments, blanks, pip option
//! lines and anything unparsable pass through.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::PackageSpec;

/// A parsed requirement line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub spec: PackageSpec,
    /// Text after the requirement, kept verbatim: pip options such as
    /// `--hash=...`, a trailing `\` continuation, an inline `# comment`
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Package(ManifestEntry),
    Comment,
    Blank,
    /// pip option lines: `-r base.txt`, `--index-url ...`, `-e .`
    Directive,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    /// Line text without its terminator
    pub raw: String,
    /// Whether the line ended in `\r\n`
    crlf: bool,
}

impl Line {
    /// Classify one line of manifest text
    pub fn parse(raw: &str) -> Self {
        let (text, crlf) = match raw.strip_suffix('\r') {
            Some(text) => (text, true),
            None => (raw, false),
        };
        Self {
            kind: classify(text),
            raw: text.to_string(),
            crlf,
        }
    }

    pub fn entry(&self) -> Option<&ManifestEntry> {
        match &self.kind {
            LineKind::Package(entry) => Some(entry),
            _ => None,
        }
    }
}

fn classify(text: &str) -> LineKind {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with('#') {
        return LineKind::Comment;
    }
    if trimmed.starts_with('-') {
        return LineKind::Directive;
    }

    let (body, suffix) = split_suffix(text);
    match body.parse::<PackageSpec>() {
        Ok(spec) => LineKind::Package(ManifestEntry {
            spec,
            suffix: suffix.map(str::to_string),
        }),
        Err(err) => {
            debug!("passing through unparsable line {:?}: {}", text, err);
            LineKind::Malformed
        }
    }
}

/// Split a requirement line into the requirement and its trailing text
///
/// The suffix starts at the first whitespace-preceded `#` (pip keeps URL
/// fragments like `#egg=`), the first whitespace-preceded option (`--hash=`,
/// `-C`), or a final `\` continuation. Quoted marker text is skipped.
fn split_suffix(text: &str) -> (&str, Option<&str>) {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    let mut cut = None;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        let after_space = i > 0 && bytes[i - 1].is_ascii_whitespace();
        let is_option = b == b'-'
            && bytes
                .get(i + 1)
                .is_some_and(|&n| n == b'-' || n.is_ascii_alphabetic());
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'#' if after_space => {
                cut = Some(i);
                break;
            }
            _ if is_option && after_space => {
                cut = Some(i);
                break;
            }
            _ => {}
        }
    }

    let cut = cut.or_else(|| {
        let end = text.trim_end();
        end.ends_with('\\').then(|| end.len() - 1)
    });

    match cut {
        Some(i) => {
            let body = text[..i].trim_end();
            (body, Some(&text[body.len()..]))
        }
        None => (text, None),
    }
}

/// A continued entry must be followed by option lines (`--hash=...`)
///
/// Anything else means the requirement itself spans lines, which the
/// reconciler cannot rewrite safely.
fn demote_split_requirements(lines: &mut [Line]) {
    for i in 0..lines.len() {
        let continued = lines[i]
            .entry()
            .and_then(|e| e.suffix.as_deref())
            .is_some_and(|s| s.trim_end().ends_with('\\'));
        if !continued {
            continue;
        }
        let next_is_option = lines
            .get(i + 1)
            .is_some_and(|next| matches!(next.kind, LineKind::Directive));
        if !next_is_option {
            debug!("passing through multi-line requirement {:?}", lines[i].raw);
            lines[i].kind = LineKind::Malformed;
        }
    }
}

/// What reconciliation did for one requested package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Outcome {
    Added,
    Updated { previous: String },
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub package: String,
    /// The manifest line for this package after reconciliation
    pub requirement: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// An in-memory requirements file
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    lines: Vec<Line>,
    trailing_newline: bool,
    exists: bool,
    modified: bool,
}

impl Manifest {
    /// An empty manifest for a file that does not exist yet
    pub fn empty() -> Self {
        Self {
            trailing_newline: true,
            ..Self::default()
        }
    }

    /// Tokenize manifest text
    pub fn parse(content: &str) -> Self {
        if content.is_empty() {
            return Self {
                exists: true,
                ..Self::empty()
            };
        }

        let trailing_newline = content.ends_with('\n');
        let body = content.strip_suffix('\n').unwrap_or(content);
        let mut lines: Vec<Line> = body.split('\n').map(Line::parse).collect();
        demote_split_requirements(&mut lines);

        debug!(
            "parsed manifest: {} lines, {} entries",
            lines.len(),
            lines.iter().filter(|l| l.entry().is_some()).count()
        );

        Self {
            lines,
            trailing_newline,
            exists: true,
            modified: false,
        }
    }

    /// Load a manifest from disk; a missing file is an empty manifest
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("manifest {:?} not found, starting empty", path);
                Ok(Self::empty())
            }
            Err(source) => Err(Error::ManifestRead {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Whether the manifest was read from an existing file
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether reconciliation changed anything
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Merge installed specs into the manifest
    ///
    /// New packages are appended in request order; entries whose requirement
    /// differs are rewritten in place keeping their name casing and trailing
    /// text; matching entries are left alone. A package requested more than
    /// once yields a single change, measured against the file as loaded.
    pub fn reconcile(&mut self, specs: &[PackageSpec]) -> Vec<Change> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, line) in self.lines.iter().enumerate() {
            if let Some(entry) = line.entry() {
                index.entry(entry.spec.normalized_name()).or_insert(i);
            }
        }

        let mut changes: Vec<Change> = Vec::with_capacity(specs.len());
        // normalized name -> (slot in `changes`, entry as loaded)
        let mut seen: HashMap<String, (usize, Option<PackageSpec>)> = HashMap::new();

        for spec in specs {
            let key = spec.normalized_name();
            let (before, current) = match index.get(&key) {
                Some(&i) => {
                    let before = self.lines[i].entry().map(|e| e.spec.clone());
                    (before, self.update_line(i, spec))
                }
                None => {
                    let current = self.append(spec);
                    index.insert(key.clone(), self.lines.len() - 1);
                    (None, current)
                }
            };

            let (slot, original) = match seen.get(&key) {
                Some((slot, original)) => (Some(*slot), original.clone()),
                None => (None, before),
            };

            let outcome = match &original {
                None => Outcome::Added,
                Some(orig) if orig.requirement_key() == current.requirement_key() => {
                    Outcome::Unchanged
                }
                Some(orig) => Outcome::Updated {
                    previous: orig.to_string(),
                },
            };
            debug!("{}: {:?}", current.name, outcome);

            let change = Change {
                package: current.name.clone(),
                requirement: current.to_string(),
                outcome,
            };
            match slot {
                Some(slot) => changes[slot] = change,
                None => {
                    seen.insert(key, (changes.len(), original));
                    changes.push(change);
                }
            }
        }
        changes
    }

    /// Rewrite entry `i` for `spec` if its requirement differs; returns the entry's spec
    fn update_line(&mut self, i: usize, spec: &PackageSpec) -> PackageSpec {
        let line = &mut self.lines[i];
        let LineKind::Package(entry) = &mut line.kind else {
            unreachable!("index only holds package lines");
        };

        if entry.spec.requirement_key() != spec.requirement_key() {
            entry.spec = PackageSpec {
                name: entry.spec.name.clone(),
                ..spec.clone()
            };
            line.raw = format!(
                "{}{}",
                entry.spec,
                entry.suffix.as_deref().unwrap_or_default()
            );
            self.modified = true;
        }
        entry.spec.clone()
    }

    fn append(&mut self, spec: &PackageSpec) -> PackageSpec {
        let crlf = self.lines.last().is_some_and(|l| l.crlf);
        self.lines.push(Line {
            kind: LineKind::Package(ManifestEntry {
                spec: spec.clone(),
                suffix: None,
            }),
            raw: spec.to_string(),
            crlf,
        });
        self.modified = true;
        spec.clone()
    }

    /// Render the manifest back to text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            out.push_str(&line.raw);
            let last = i + 1 == self.lines.len();
            if !last || self.trailing_newline {
                if line.crlf {
                    out.push('\r');
                }
                out.push('\n');
            } else if line.crlf {
                // A lone trailing '\r' was part of the original text
                out.push('\r');
            }
        }
        out
    }

    /// Write the manifest atomically (temp file in the same directory, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let write_err = |source| Error::ManifestWrite {
            path: path.to_path_buf(),
            source,
        };

        // Write through symlinks rather than replacing them
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(self.render().as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        match fs::metadata(&target) {
            Ok(meta) => fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_err)?,
            Err(_) => set_default_permissions(tmp.path()).map_err(write_err)?,
        }

        tmp.persist(&target).map_err(|e| write_err(e.error))?;
        info!("wrote manifest {:?}", target);
        Ok(())
    }
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
