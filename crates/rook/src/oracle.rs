//
// oracle.rs
//
// Interpreter oracle: optional live-session queries against a real R
// process. Every call is bounded by a cancellation token; a missing or
// unresponsive interpreter degrades to errors the resolver treats as
// "no enrichment", never as failure of static resolution.
//
// The wire protocol is line oriented. Fields within a line are separated
// by \x01, which cannot occur in R symbol or package names.
//

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::stub_index::StubPriority;

const FIELD_SEPARATOR: char = '\u{1}';
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A binding in the live session's global environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleBinding {
    pub name: String,
    /// R's `class()` of the value, first element.
    pub class: String,
}

/// A package attached in the live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPackage {
    pub name: String,
    pub priority: StubPriority,
}

/// Introspected shape of a class known to the live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleClassInfo {
    pub name: String,
    pub slots: Vec<String>,
    pub superclasses: Vec<String>,
}

/// Queries answered by a live interpreter. All methods honor the token:
/// cancellation aborts the underlying process and returns an error.
#[async_trait]
pub trait InterpreterOracle: Send + Sync {
    /// Global-environment bindings with their classes.
    async fn variable_bindings(&self, token: &CancellationToken) -> Result<Vec<OracleBinding>>;

    /// Attached packages with their install priority.
    async fn loaded_packages(&self, token: &CancellationToken) -> Result<Vec<LoadedPackage>>;

    /// Evaluate an expression yielding a character vector; answers the
    /// distinct values in first-seen order.
    async fn eval_distinct_strings(
        &self,
        code: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Slot and superclass structure of a class, if the session knows it.
    async fn class_introspection(
        &self,
        class_name: &str,
        token: &CancellationToken,
    ) -> Result<Option<OracleClassInfo>>;
}

/// Oracle backed by spawning the R executable per query
/// (`R --vanilla -s -e <code>`).
pub struct RSessionOracle {
    r_path: PathBuf,
}

impl RSessionOracle {
    /// Discover an R executable on PATH. `None` when the host has no R;
    /// callers then run without oracle enrichment.
    pub fn new() -> Option<Self> {
        Self::with_path(None)
    }

    pub fn with_path(r_path: Option<PathBuf>) -> Option<Self> {
        let path = match r_path {
            Some(p) if is_r_executable(&p) => Some(p),
            Some(p) => {
                log::trace!("not a usable R executable: {}", p.display());
                None
            }
            None => discover_r(),
        }?;
        log::debug!("interpreter oracle using R at {}", path.display());
        Some(Self { r_path: path })
    }

    pub fn r_path(&self) -> &PathBuf {
        &self.r_path
    }

    async fn run(&self, code: &str, token: &CancellationToken) -> Result<String> {
        let mut cmd = Command::new(&self.r_path);
        cmd.args(["--vanilla", "-s", "-e", code])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to spawn R: {e}"))?;

        let output = tokio::select! {
            _ = token.cancelled() => bail!("oracle query cancelled"),
            result = tokio::time::timeout(QUERY_TIMEOUT, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|e| anyhow!("R process failed: {e}"))?,
                Err(_) => bail!("oracle query timed out after {QUERY_TIMEOUT:?}"),
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("R exited with {}: {}", output.status, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl InterpreterOracle for RSessionOracle {
    async fn variable_bindings(&self, token: &CancellationToken) -> Result<Vec<OracleBinding>> {
        let code = r#"for (n in ls(globalenv())) cat(n, "\x01", class(get(n, envir = globalenv()))[1], "\n", sep = "")"#;
        let output = self.run(code, token).await?;
        Ok(parse_separated_lines(&output)
            .into_iter()
            .filter_map(|fields| match fields.as_slice() {
                [name, class] => Some(OracleBinding {
                    name: name.clone(),
                    class: class.clone(),
                }),
                _ => None,
            })
            .collect())
    }

    async fn loaded_packages(&self, token: &CancellationToken) -> Result<Vec<LoadedPackage>> {
        let code = r#"for (p in .packages()) cat(p, "\x01", format(packageDescription(p, fields = "Priority")), "\n", sep = "")"#;
        let output = self.run(code, token).await?;
        Ok(parse_separated_lines(&output)
            .into_iter()
            .filter_map(|fields| match fields.as_slice() {
                [name, priority] => Some(LoadedPackage {
                    name: name.clone(),
                    priority: parse_priority(priority),
                }),
                _ => None,
            })
            .collect())
    }

    async fn eval_distinct_strings(
        &self,
        code: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>> {
        let wrapped = format!(r#"cat(unique(as.character({code})), sep = "\n")"#);
        let output = self.run(&wrapped, token).await?;
        let mut seen = std::collections::HashSet::new();
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| seen.insert(l.to_string()))
            .map(String::from)
            .collect())
    }

    async fn class_introspection(
        &self,
        class_name: &str,
        token: &CancellationToken,
    ) -> Result<Option<OracleClassInfo>> {
        if !is_plain_symbol(class_name) {
            bail!("refusing to introspect suspicious class name {class_name:?}");
        }
        let code = format!(
            r#"if (methods::isClass("{0}")) {{
  d <- methods::getClassDef("{0}")
  cat("slots", "\x01", paste(names(d@slots), collapse = "\x01"), "\n", sep = "")
  cat("contains", "\x01", paste(names(d@contains), collapse = "\x01"), "\n", sep = "")
}}"#,
            class_name
        );
        let output = self.run(&code, token).await?;
        let mut slots = Vec::new();
        let mut superclasses = Vec::new();
        let mut known = false;
        for fields in parse_separated_lines(&output) {
            let Some((tag, rest)) = fields.split_first() else {
                continue;
            };
            known = true;
            let values: Vec<String> = rest.iter().filter(|v| !v.is_empty()).cloned().collect();
            match tag.as_str() {
                "slots" => slots = values,
                "contains" => superclasses = values,
                _ => {}
            }
        }
        if !known {
            return Ok(None);
        }
        Ok(Some(OracleClassInfo {
            name: class_name.to_string(),
            slots,
            superclasses,
        }))
    }
}

fn parse_separated_lines(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(|l| l.split(FIELD_SEPARATOR).map(String::from).collect())
        .collect()
}

fn parse_priority(text: &str) -> StubPriority {
    match text.trim() {
        "base" => StubPriority::Base,
        "recommended" => StubPriority::Recommended,
        "NA" => StubPriority::Na,
        _ => StubPriority::Optional,
    }
}

fn is_plain_symbol(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '.')
}

fn discover_r() -> Option<PathBuf> {
    let output = std::process::Command::new("which").arg("R").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    is_r_executable(&path).then_some(path)
}

fn is_r_executable(path: &PathBuf) -> bool {
    if !path.exists() {
        return false;
    }
    match std::process::Command::new(path).arg("--version").output() {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            output.status.success()
                || stderr.contains("R version")
                || stdout.contains("R version")
        }
        Err(_) => false,
    }
}
