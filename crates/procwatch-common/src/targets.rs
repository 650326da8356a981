//! Target declarations and argv pattern matching
//!
//! A target is a user-declared logical thing to watch, identified by a
//! sequence of shell-style glob patterns compared element-wise against the
//! argument vector of live processes.

use std::borrow::Cow;
use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while compiling or applying argv patterns
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("Invalid glob pattern {pattern:?}: {reason}")]
    PatternSyntax { pattern: String, reason: String },

    #[error("Target {0:?} has an empty argv pattern")]
    EmptyPattern(String),

    #[error("Duplicate target name: {0}")]
    DuplicateTarget(String),
}

/// Result type for matching operations
pub type MatchResult<T> = Result<T, MatchError>;

/// `*` and `?` never match a path separator, as in shell filename globbing.
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Collapse runs of `*` outside character classes
///
/// `glob` only accepts `**` as a whole path component, where it crosses
/// separators. In an argv pattern it means the same as a single `*`.
fn collapse_stars(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains("**") {
        return Cow::Borrowed(pattern);
    }

    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                // Copied verbatim; a leading `]` (after an optional `!`) is literal
                out.push(c);
                if let Some(neg) = chars.next_if_eq(&'!') {
                    out.push(neg);
                }
                if let Some(close) = chars.next_if_eq(&']') {
                    out.push(close);
                }
                for c in chars.by_ref() {
                    out.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            '*' => {
                out.push(c);
                while chars.next_if_eq(&'*').is_some() {}
            }
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn compile(pattern: &str) -> MatchResult<Pattern> {
    Pattern::new(&collapse_stars(pattern)).map_err(|e| MatchError::PatternSyntax {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })
}

/// Decide whether an observed argv matches a pattern sequence
///
/// The shorter of the two sequences drives the comparison (the pattern on a
/// tie): each of its elements is used as a glob against the element at the
/// same index of the longer one. Trailing elements of the longer sequence
/// are ignored, so a pattern can name just an interpreter and script while
/// the real invocation carries extra flags.
pub fn matches_argv<P, A>(pattern: &[P], argv: &[A]) -> MatchResult<bool>
where
    P: AsRef<str>,
    A: AsRef<str>,
{
    if argv.len() < pattern.len() {
        element_wise(argv, pattern)
    } else {
        element_wise(pattern, argv)
    }
}

fn element_wise<S, L>(short: &[S], long: &[L]) -> MatchResult<bool>
where
    S: AsRef<str>,
    L: AsRef<str>,
{
    for (glob, value) in short.iter().zip(long) {
        if !compile(glob.as_ref())?.matches_with(value.as_ref(), GLOB_OPTIONS) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Target declaration, as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Report name. Defaults to the basename of the first pattern element.
    #[serde(default)]
    pub name: String,

    /// Ordered glob patterns compared against the process argv
    #[serde(default)]
    pub argv: Vec<String>,

    /// Report under the target name alone instead of per process
    #[serde(default)]
    pub stable_identity: bool,

    /// Program looked up through `PATH` at startup; its absolute path
    /// becomes the first argv pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, argv: Vec<String>, stable_identity: bool) -> Self {
        Self {
            name: name.into(),
            argv,
            stable_identity,
            exe: None,
        }
    }

    /// Name used in reports
    pub fn effective_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.argv
            .first()
            .and_then(|arg0| Path::new(arg0).file_name())
            .map(|base| base.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Target with its patterns compiled up front
///
/// Compiling validates every pattern, so a target that compiles can only fail
/// to match later when the observed argv is the shorter side and itself
/// contains a malformed glob.
#[derive(Debug, Clone)]
pub struct CompiledTarget {
    pub target: Target,
    name: String,
    patterns: Vec<Pattern>,
}

impl CompiledTarget {
    /// Compile a target for matching
    pub fn new(target: Target) -> MatchResult<Self> {
        let name = target.effective_name();
        if target.argv.is_empty() {
            return Err(MatchError::EmptyPattern(name));
        }

        let patterns = target
            .argv
            .iter()
            .map(|p| compile(p))
            .collect::<MatchResult<Vec<_>>>()?;

        Ok(Self {
            target,
            name,
            patterns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stable_identity(&self) -> bool {
        self.target.stable_identity
    }

    /// Check an observed argv against this target
    pub fn matches(&self, argv: &[String]) -> MatchResult<bool> {
        if argv.len() < self.patterns.len() {
            return element_wise(argv, &self.target.argv);
        }
        Ok(self
            .patterns
            .iter()
            .zip(argv)
            .all(|(pattern, arg)| pattern.matches_with(arg, GLOB_OPTIONS)))
    }
}

/// Ordered collection of compiled targets
///
/// Declaration order is significant: when patterns overlap, the first
/// declared target claims the process.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    targets: Vec<CompiledTarget>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list of declarations, rejecting bad patterns and duplicates
    pub fn compile(targets: Vec<Target>) -> MatchResult<Self> {
        let mut set = Self::new();
        for target in targets {
            set.add(target)?;
        }
        Ok(set)
    }

    /// Add a single target at the end of the declaration order
    pub fn add(&mut self, target: Target) -> MatchResult<()> {
        let compiled = CompiledTarget::new(target)?;
        if self.get(compiled.name()).is_some() {
            return Err(MatchError::DuplicateTarget(compiled.name().to_string()));
        }
        self.targets.push(compiled);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CompiledTarget> {
        self.targets.iter().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledTarget> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
