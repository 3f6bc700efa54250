//! Python package requirements declared under `pip-requirements`.
//!
//! Accepted forms: `"name (constraint)"`, `"name constraint"` and bare
//! `"name"`, each optionally with extras (`name[extra]`) and an environment
//! marker (`; ...`). Extras and markers are passed on to the installer but
//! markers are not evaluated. Versions follow PEP 440 ordering: the whole
//! release segment counts, and pre-, post- and dev-releases sort where pip
//! sorts them.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementError {
    #[error("Empty requirement")]
    Empty,

    #[error("Invalid package name in requirement '{raw}'")]
    InvalidName { raw: String },

    #[error("Invalid version constraint in requirement '{raw}': {message}")]
    InvalidConstraint { raw: String, message: String },
}

/// Canonical form of a package name: lowercase, with `_` and `.` mapped to `-`
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Parse a Python version string, see [`PackageVersion::parse`]
pub fn parse_version(raw: &str) -> Option<PackageVersion> {
    PackageVersion::parse(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha,
    Beta,
    Candidate,
}

impl PreRelease {
    fn tag(self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Candidate => "rc",
        }
    }
}

/// A version as Python packaging understands it.
///
/// Equality and ordering ignore trailing zeros of the release segment
/// (`1.0 == 1.0.0`) and local labels (`+ubuntu1`).
#[derive(Debug, Clone)]
pub struct PackageVersion {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease, u64),
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Final,
}

impl PackageVersion {
    /// Lenient parse accepting the spellings pip normalizes: a leading `v`,
    /// `alpha`/`beta`/`c`/`pre`/`preview`, `rev`/`r` and implicit `-N`
    /// post-releases, and `.`/`-`/`_` separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let text = lowered.strip_prefix('v').unwrap_or(&lowered);
        let text = text.split('+').next().unwrap_or_default();
        let (epoch, mut rest) = match text.split_once('!') {
            Some((epoch, rest)) => (epoch.parse().ok()?, rest),
            None => (0, text),
        };

        let mut release = Vec::new();
        loop {
            let digits = leading_digits(rest);
            if digits.is_empty() {
                return None;
            }
            release.push(digits.parse().ok()?);
            rest = &rest[digits.len()..];
            match rest.strip_prefix('.') {
                Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => rest = next,
                _ => break,
            }
        }

        let pre = take_segment(
            &mut rest,
            &[
                ("alpha", PreRelease::Alpha),
                ("a", PreRelease::Alpha),
                ("beta", PreRelease::Beta),
                ("b", PreRelease::Beta),
                ("rc", PreRelease::Candidate),
                ("preview", PreRelease::Candidate),
                ("pre", PreRelease::Candidate),
                ("c", PreRelease::Candidate),
            ],
        );
        let post = take_segment(&mut rest, &[("post", ()), ("rev", ()), ("r", ())])
            .map(|(_, n)| n)
            .or_else(|| take_implicit_post(&mut rest));
        let dev = take_segment(&mut rest, &[("dev", ())]).map(|(_, n)| n);

        rest.is_empty().then_some(Self {
            epoch,
            release,
            pre,
            post,
            dev,
        })
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    fn is_final_release(&self) -> bool {
        self.pre.is_none() && self.post.is_none() && self.dev.is_none()
    }

    fn trimmed_release(&self) -> &[u64] {
        let end = self.release.iter().rposition(|&n| n != 0).map_or(1, |i| i + 1);
        &self.release[..end.min(self.release.len())]
    }

    /// Whether the release segment, zero-padded, starts with `prefix`
    fn in_series(&self, epoch: u64, prefix: &[u64]) -> bool {
        self.epoch == epoch
            && prefix
                .iter()
                .enumerate()
                .all(|(i, n)| self.release.get(i).copied().unwrap_or(0) == *n)
    }

    fn same_release(&self, other: &Self) -> bool {
        self.epoch == other.epoch && self.trimmed_release() == other.trimmed_release()
    }

    fn sort_key(&self) -> (u64, &[u64], PreKey, Option<u64>, DevKey) {
        let pre = match (self.pre, self.post, self.dev) {
            (Some((kind, n)), _, _) => PreKey::Pre(kind, n),
            (None, None, Some(_)) => PreKey::DevOnly,
            _ => PreKey::Final,
        };
        let dev = self.dev.map_or(DevKey::Final, DevKey::Dev);
        (self.epoch, self.trimmed_release(), pre, self.post, dev)
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        f.write_str(&release.join("."))?;
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{}", kind.tag(), n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        Ok(())
    }
}

fn leading_digits(s: &str) -> &str {
    &s[..s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len())]
}

/// Consume `[sep]tag[sep][N]` from the front of `rest`; a missing number is 0
fn take_segment<'a, T: Copy>(rest: &mut &'a str, tags: &[(&str, T)]) -> Option<(T, u64)> {
    let current: &'a str = *rest;
    let body = current.strip_prefix(['.', '-', '_']).unwrap_or(current);
    let (tag, after) = tags
        .iter()
        .find_map(|&(name, tag)| body.strip_prefix(name).map(|after| (tag, after)))?;
    let number_at = after
        .strip_prefix(['.', '-', '_'])
        .filter(|s| s.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(after);
    let digits = leading_digits(number_at);
    let number = if digits.is_empty() { 0 } else { digits.parse().ok()? };
    *rest = &number_at[digits.len()..];
    Some((tag, number))
}

/// `1.0-3` is the post-release `1.0.post3`
fn take_implicit_post(rest: &mut &str) -> Option<u64> {
    let current: &str = *rest;
    let digits = leading_digits(current.strip_prefix('-')?);
    if digits.is_empty() {
        return None;
    }
    let number = digits.parse().ok()?;
    let skip = 1 + digits.len();
    *rest = &current[skip..];
    Some(number)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equal,
    NotEqual,
    Compatible,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Operator,
    version: PackageVersion,
    wildcard: bool,
}

impl Clause {
    fn matches(&self, candidate: &PackageVersion) -> bool {
        let target = &self.version;
        match self.op {
            Operator::Equal if self.wildcard => candidate.in_series(target.epoch, &target.release),
            Operator::Equal => candidate == target,
            Operator::NotEqual if self.wildcard => !candidate.in_series(target.epoch, &target.release),
            Operator::NotEqual => candidate != target,
            Operator::Compatible => {
                let series = &target.release[..target.release.len() - 1];
                candidate >= target && candidate.in_series(target.epoch, series)
            }
            Operator::GreaterEqual => candidate >= target,
            Operator::LessEqual => candidate <= target,
            // `<V` leaves out pre-releases of V, `>V` leaves out its post-releases
            Operator::Less => {
                candidate < target
                    && !(candidate.is_prerelease() && !target.is_prerelease() && candidate.same_release(target))
            }
            Operator::Greater => {
                candidate > target
                    && !(candidate.is_postrelease() && !target.is_postrelease() && candidate.same_release(target))
            }
        }
    }
}

/// A pip version constraint: comma-separated clauses that must all hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    clauses: Vec<Clause>,
}

impl VersionConstraint {
    /// Constraint matching every version
    pub fn any() -> Self {
        Self {
            raw: String::new(),
            clauses: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, RequirementError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::any());
        }
        let invalid = |message: String| RequirementError::InvalidConstraint {
            raw: raw.to_string(),
            message,
        };

        let mut clauses = Vec::new();
        let mut normalized = Vec::new();
        for clause in raw.split(',').map(str::trim) {
            if clause.is_empty() {
                return Err(invalid("empty clause".to_string()));
            }
            let (op, version) = split_operator(clause);
            let version = version.trim();
            let (release, wildcard) = match version.strip_suffix(".*") {
                Some(release) => (release, true),
                None => (version, false),
            };
            let parsed = Some(release)
                .filter(|r| r.starts_with(|c: char| c.is_ascii_digit()))
                .and_then(PackageVersion::parse)
                .ok_or_else(|| invalid(format!("'{}' is not a version", version)))?;
            if wildcard && !parsed.is_final_release() {
                return Err(invalid(format!("'{}' is not a release prefix", version)));
            }

            let operator = match (op, wildcard) {
                ("==" | "===" | "", _) => Operator::Equal,
                ("!=", _) => Operator::NotEqual,
                ("~=" | ">=" | "<=" | ">" | "<", true) => {
                    return Err(invalid(format!("'{}' does not take a wildcard", op)))
                }
                ("~=", false) if parsed.release.len() < 2 => {
                    return Err(invalid("'~=' needs at least two version components".to_string()))
                }
                ("~=", false) => Operator::Compatible,
                (">=", false) => Operator::GreaterEqual,
                ("<=", false) => Operator::LessEqual,
                (">", false) => Operator::Greater,
                ("<", false) => Operator::Less,
                (op, _) => return Err(invalid(format!("unsupported operator '{}'", op))),
            };
            clauses.push(Clause {
                op: operator,
                version: parsed,
                wildcard,
            });
            let op = if op.is_empty() { "==" } else { op };
            normalized.push(format!("{}{}", op, version));
        }

        Ok(Self {
            raw: normalized.join(","),
            clauses,
        })
    }

    pub fn matches(&self, version: &PackageVersion) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_operator(clause: &str) -> (&str, &str) {
    const OPERATORS: [&str; 8] = ["===", "~=", "==", "!=", ">=", "<=", ">", "<"];
    for op in OPERATORS {
        if let Some(rest) = clause.strip_prefix(op) {
            return (op, rest);
        }
    }
    // Anything else that is not a digit is an operator we do not know
    let op_len = clause
        .find(|c: char| c.is_ascii_alphanumeric() || c.is_whitespace())
        .unwrap_or(clause.len());
    clause.split_at(op_len)
}

/// One entry of a module's `pip-requirements`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    name: String,
    normalized: String,
    extras: Vec<String>,
    constraint: VersionConstraint,
    marker: Option<String>,
}

impl Requirement {
    pub fn parse(raw: &str) -> Result<Self, RequirementError> {
        let (text, marker) = match raw.split_once(';') {
            Some((text, marker)) => (text.trim(), Some(marker.trim()).filter(|m| !m.is_empty())),
            None => (raw.trim(), None),
        };
        if text.is_empty() {
            return Err(RequirementError::Empty);
        }
        let invalid_name = || RequirementError::InvalidName { raw: raw.to_string() };

        let name_end = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(text.len());
        let (name, rest) = text.split_at(name_end);
        if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(invalid_name());
        }

        let (extras, rest) = match rest.trim_start().strip_prefix('[') {
            Some(inner) => {
                let close = inner.find(']').ok_or_else(invalid_name)?;
                let extras: Vec<String> = inner[..close]
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect();
                let valid = |e: &String| e.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
                if !extras.iter().all(valid) {
                    return Err(invalid_name());
                }
                (extras, &inner[close + 1..])
            }
            None => (Vec::new(), rest),
        };

        let rest = rest.trim();
        let constraint_part = match rest.strip_prefix('(') {
            Some(inner) => inner.strip_suffix(')').ok_or_else(|| RequirementError::InvalidConstraint {
                raw: raw.to_string(),
                message: "unbalanced parenthesis".to_string(),
            })?,
            None => rest,
        };
        let constraint = VersionConstraint::parse(constraint_part).map_err(|e| match e {
            RequirementError::InvalidConstraint { message, .. } => RequirementError::InvalidConstraint {
                raw: raw.to_string(),
                message,
            },
            other => other,
        })?;

        Ok(Self {
            name: name.to_string(),
            normalized: normalize_name(name),
            extras,
            constraint,
            marker: marker.map(str::to_string),
        })
    }

    /// Package name as written
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normalized_name(&self) -> &str {
        &self.normalized
    }

    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn constraint(&self) -> &VersionConstraint {
        &self.constraint
    }

    /// Satisfied when the package is installed in a version the constraint accepts
    pub fn is_satisfied_by(&self, installed: &InstalledPackages) -> bool {
        installed
            .version_of(&self.normalized)
            .is_some_and(|version| self.constraint.matches(version))
    }

    /// The argument passed to the package manager, e.g. `requests[socks]>=2.0,<3`
    pub fn install_arg(&self) -> String {
        let mut arg = self.name.clone();
        if !self.extras.is_empty() {
            arg.push_str(&format!("[{}]", self.extras.join(",")));
        }
        arg.push_str(&self.constraint.to_string());
        if let Some(marker) = &self.marker {
            arg.push_str("; ");
            arg.push_str(marker);
        }
        arg
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.install_arg())
    }
}

/// Snapshot of installed packages keyed by normalized name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledPackages {
    packages: HashMap<String, PackageVersion>,
}

#[derive(Debug, Deserialize)]
struct ListedPackage {
    name: String,
    version: String,
}

impl InstalledPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, version)` pairs. Unparseable versions are skipped.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut packages = Self::new();
        for (name, version) in entries {
            packages.insert(name, version);
        }
        packages
    }

    /// Parse the JSON array printed by `pip list --format=json`
    pub fn from_pip_json(json: &str) -> Result<Self, serde_json::Error> {
        let listed: Vec<ListedPackage> = serde_json::from_str(json)?;
        Ok(Self::from_entries(
            listed.iter().map(|p| (p.name.as_str(), p.version.as_str())),
        ))
    }

    pub fn insert(&mut self, name: &str, version: &str) -> bool {
        match parse_version(version) {
            Some(parsed) => {
                self.packages.insert(normalize_name(name), parsed);
                true
            }
            None => {
                log::debug!("Ignoring package '{}' with unparseable version '{}'", name, version);
                false
            }
        }
    }

    pub fn version_of(&self, name: &str) -> Option<&PackageVersion> {
        self.packages.get(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
