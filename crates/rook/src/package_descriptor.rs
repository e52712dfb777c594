//
// package_descriptor.rs
//
// DESCRIPTION manifest parsing (DCF format) and R package version
// ordering. Versions are sequences of numeric components; '.' and '-'
// both separate components, so "1.2-3" and "1.2.3" compare equal.
//

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use serde::Serialize;

/// A parsed package version: ordered numeric components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RVersion {
    components: Vec<u64>,
    text: String,
}

impl RVersion {
    pub fn components(&self) -> &[u64] {
        &self.components
    }
}

impl FromStr for RVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        // The empty string is the empty version, ordering below all others.
        if s.is_empty() {
            return Ok(Self {
                components: Vec::new(),
                text: String::new(),
            });
        }
        let mut components = Vec::new();
        for part in s.split(['.', '-']) {
            if part.is_empty() {
                bail!("empty component in version {s:?}");
            }
            let value = part
                .parse::<u64>()
                .map_err(|_| anyhow!("non-numeric component {part:?} in version {s:?}"))?;
            components.push(value);
        }
        Ok(Self {
            components,
            text: s.to_string(),
        })
    }
}

impl fmt::Display for RVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Ord for RVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Component-wise; a shorter version that matches the longer one's
        // prefix orders before it ("1.2" < "1.2.0").
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for RVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One dependency entry, e.g. `dplyr (>= 1.0)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyRequest {
    pub name: String,
    pub bounds: VersionBounds,
}

/// Folded lower/upper version bounds. Multiple constraints on the same
/// package fold into the tightest interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionBounds {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bound {
    pub version: RVersion,
    pub inclusive: bool,
}

impl VersionBounds {
    pub fn satisfied_by(&self, version: &RVersion) -> bool {
        if let Some(lower) = &self.lower {
            let ok = match version.cmp(&lower.version) {
                Ordering::Greater => true,
                Ordering::Equal => lower.inclusive,
                Ordering::Less => false,
            };
            if !ok {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            let ok = match version.cmp(&upper.version) {
                Ordering::Less => true,
                Ordering::Equal => upper.inclusive,
                Ordering::Greater => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn fold(&mut self, operator: &str, version: RVersion) {
        match operator {
            ">=" | ">" => {
                let candidate = Bound {
                    version,
                    inclusive: operator == ">=",
                };
                let tighter = match &self.lower {
                    None => true,
                    Some(existing) => match candidate.version.cmp(&existing.version) {
                        Ordering::Greater => true,
                        Ordering::Equal => !candidate.inclusive && existing.inclusive,
                        Ordering::Less => false,
                    },
                };
                if tighter {
                    self.lower = Some(candidate);
                }
            }
            "<=" | "<" => {
                let candidate = Bound {
                    version,
                    inclusive: operator == "<=",
                };
                let tighter = match &self.upper {
                    None => true,
                    Some(existing) => match candidate.version.cmp(&existing.version) {
                        Ordering::Less => true,
                        Ordering::Equal => !candidate.inclusive && existing.inclusive,
                        Ordering::Greater => false,
                    },
                };
                if tighter {
                    self.upper = Some(candidate);
                }
            }
            "==" => {
                self.lower = Some(Bound {
                    version: version.clone(),
                    inclusive: true,
                });
                self.upper = Some(Bound {
                    version,
                    inclusive: true,
                });
            }
            _ => {}
        }
    }
}

/// The fields of a DESCRIPTION file this crate consumes.
#[derive(Debug, Clone, Serialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: RVersion,
    pub title: Option<String>,
    pub depends: Vec<DependencyRequest>,
    pub imports: Vec<DependencyRequest>,
    pub suggests: Vec<DependencyRequest>,
}

fn dependency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)(?: \((>=|<=|>|<|==) (.+?)\))?$").unwrap())
}

/// Parse a comma-separated dependency field, folding repeated names.
/// The pseudo-package `R` names the interpreter requirement and is kept.
/// Entries whose version fails to parse keep the name with open bounds.
pub fn parse_dependency_field(field: &str) -> Vec<DependencyRequest> {
    let mut order: Vec<String> = Vec::new();
    let mut bounds: HashMap<String, VersionBounds> = HashMap::new();
    for entry in field.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some(captures) = dependency_regex().captures(entry) else {
            continue;
        };
        let name = captures[1].trim().to_string();
        if !bounds.contains_key(&name) {
            order.push(name.clone());
        }
        let folded = bounds.entry(name).or_default();
        if let (Some(op), Some(version)) = (captures.get(2), captures.get(3)) {
            match version.as_str().parse::<RVersion>() {
                Ok(version) => folded.fold(op.as_str(), version),
                Err(e) => log::debug!("ignoring malformed version in {entry:?}: {e}"),
            }
        }
    }
    order
        .into_iter()
        .map(|name| {
            let bounds = bounds.remove(&name).unwrap_or_default();
            DependencyRequest { name, bounds }
        })
        .collect()
}

/// Parse DCF text into raw fields. Continuation lines (leading whitespace)
/// extend the previous field with a space-joined value; a lone `.` line is
/// DCF's paragraph break and is kept verbatim.
fn parse_dcf(text: &str) -> HashMap<String, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(key) = &current {
                if let Some(value) = fields.get_mut(key) {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            }
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                let key = key.trim().to_string();
                fields.insert(key.clone(), value.trim().to_string());
                current = Some(key);
            }
            None => current = None,
        }
    }
    fields
}

impl PackageDescriptor {
    /// Parse a DESCRIPTION file's contents. `Package` and `Version` are
    /// required; everything else is optional.
    pub fn parse(text: &str) -> Result<Self> {
        let fields = parse_dcf(text);
        let name = fields
            .get("Package")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("DESCRIPTION has no Package field"))?
            .clone();
        let version = fields
            .get("Version")
            .ok_or_else(|| anyhow!("DESCRIPTION for {name} has no Version field"))?
            .parse::<RVersion>()?;
        let dependency_field = |key: &str| {
            fields
                .get(key)
                .map(|v| parse_dependency_field(v))
                .unwrap_or_default()
        };
        Ok(Self {
            name,
            version,
            title: fields.get("Title").cloned().filter(|t| !t.is_empty()),
            depends: dependency_field("Depends"),
            imports: dependency_field("Imports"),
            suggests: dependency_field("Suggests"),
        })
    }

    /// The interpreter requirement from `Depends`, if declared.
    pub fn r_requirement(&self) -> Option<&VersionBounds> {
        self.depends
            .iter()
            .find(|d| d.name == "R")
            .map(|d| &d.bounds)
    }
}
