//
// stub_index.rs
//
// Binary stub files ("skeletons") summarizing an installed package's
// symbols, plus a concurrent index over a directory of them. A directory
// carries a format-version marker; stubs written by an older format are
// deleted wholesale rather than parsed.
//

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::package_descriptor::RVersion;

const STUB_MAGIC: &[u8; 4] = b"RSTB";
const STUB_FORMAT_VERSION: u32 = 3;
const VERSION_MARKER: &str = ".stub-format";
const STUB_EXTENSION: &str = "rstub";

/// Library priority, highest first. Lookup results are ordered by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum StubPriority {
    Na,
    Base,
    Recommended,
    Optional,
}

impl StubPriority {
    fn to_byte(self) -> u8 {
        match self {
            StubPriority::Na => 0,
            StubPriority::Base => 1,
            StubPriority::Recommended => 2,
            StubPriority::Optional => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(StubPriority::Na),
            1 => Ok(StubPriority::Base),
            2 => Ok(StubPriority::Recommended),
            3 => Ok(StubPriority::Optional),
            other => bail!("unknown priority byte {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StubKind {
    Function,
    Generic,
    Method,
    Other,
}

impl StubKind {
    fn to_byte(self) -> u8 {
        match self {
            StubKind::Function => 0,
            StubKind::Generic => 1,
            StubKind::Method => 2,
            StubKind::Other => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(StubKind::Function),
            1 => Ok(StubKind::Generic),
            2 => Ok(StubKind::Method),
            3 => Ok(StubKind::Other),
            other => bail!("unknown symbol kind byte {other}"),
        }
    }
}

/// One symbol of a package stub.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StubSymbol {
    pub name: String,
    pub kind: StubKind,
    pub exported: bool,
    /// Parameter names, for functions.
    pub parameters: Vec<String>,
}

/// The full stub of one package.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PackageStub {
    pub name: String,
    pub version: String,
    pub priority: StubPriority,
    pub symbols: Vec<StubSymbol>,
}

impl PackageStub {
    /// Canonical file name, `<name>-<version>.rstub`.
    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", self.name, self.version, STUB_EXTENSION)
    }
}

// --- binary encoding ---

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_u32(input: &mut &[u8]) -> Result<u32> {
    let mut buf = [0u8; 4];
    input
        .read_exact(&mut buf)
        .context("truncated stub: expected u32")?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u8(input: &mut &[u8]) -> Result<u8> {
    let mut buf = [0u8; 1];
    input
        .read_exact(&mut buf)
        .context("truncated stub: expected byte")?;
    Ok(buf[0])
}

fn read_str(input: &mut &[u8]) -> Result<String> {
    let len = read_u32(input)? as usize;
    if len > input.len() {
        bail!("truncated stub: string length {len} exceeds remaining input");
    }
    let (bytes, rest) = input.split_at(len);
    let s = std::str::from_utf8(bytes).context("stub string is not UTF-8")?;
    *input = rest;
    Ok(s.to_string())
}

/// Serialize a package stub to its binary form.
pub fn encode_stub(stub: &PackageStub) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(STUB_MAGIC);
    out.extend_from_slice(&STUB_FORMAT_VERSION.to_le_bytes());
    write_str(&mut out, &stub.name);
    write_str(&mut out, &stub.version);
    out.push(stub.priority.to_byte());
    out.extend_from_slice(&(stub.symbols.len() as u32).to_le_bytes());
    for symbol in &stub.symbols {
        write_str(&mut out, &symbol.name);
        out.push(symbol.kind.to_byte());
        out.push(symbol.exported as u8);
        out.extend_from_slice(&(symbol.parameters.len() as u32).to_le_bytes());
        for parameter in &symbol.parameters {
            write_str(&mut out, parameter);
        }
    }
    out
}

/// Parse a binary stub. Fails on wrong magic or format version; a stale
/// format is a hard error so callers regenerate instead of misreading.
pub fn decode_stub(mut input: &[u8]) -> Result<PackageStub> {
    let mut magic = [0u8; 4];
    input
        .read_exact(&mut magic)
        .context("truncated stub: no magic")?;
    if &magic != STUB_MAGIC {
        bail!("not a stub file (bad magic {magic:?})");
    }
    let format = read_u32(&mut input)?;
    if format != STUB_FORMAT_VERSION {
        bail!("stub format {format} does not match expected {STUB_FORMAT_VERSION}");
    }
    let name = read_str(&mut input)?;
    let version = read_str(&mut input)?;
    let priority = StubPriority::from_byte(read_u8(&mut input)?)?;
    let count = read_u32(&mut input)? as usize;
    let mut symbols = Vec::with_capacity(count.min(64 * 1024));
    for _ in 0..count {
        let name = read_str(&mut input)?;
        let kind = StubKind::from_byte(read_u8(&mut input)?)?;
        let exported = read_u8(&mut input)? != 0;
        let param_count = read_u32(&mut input)? as usize;
        let mut parameters = Vec::with_capacity(param_count.min(1024));
        for _ in 0..param_count {
            parameters.push(read_str(&mut input)?);
        }
        symbols.push(StubSymbol {
            name,
            kind,
            exported,
            parameters,
        });
    }
    Ok(PackageStub {
        name,
        version,
        priority,
        symbols,
    })
}

pub fn write_stub_file(dir: &Path, stub: &PackageStub) -> Result<PathBuf> {
    let path = dir.join(stub.file_name());
    fs::File::create(&path)
        .and_then(|mut f| f.write_all(&encode_stub(stub)))
        .with_context(|| format!("writing stub {}", path.display()))?;
    Ok(path)
}

pub fn read_stub_file(path: &Path) -> Result<PackageStub> {
    let bytes = fs::read(path).with_context(|| format!("reading stub {}", path.display()))?;
    decode_stub(&bytes).with_context(|| format!("decoding stub {}", path.display()))
}

/// Bring a stub directory up to the current format: if the version marker
/// is missing or stale, delete every stub file and rewrite the marker.
/// Returns true when existing stubs were discarded.
pub fn ensure_format_version(dir: &Path) -> Result<bool> {
    fs::create_dir_all(dir)?;
    let marker = dir.join(VERSION_MARKER);
    let current = fs::read_to_string(&marker)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    if current == Some(STUB_FORMAT_VERSION) {
        return Ok(false);
    }
    log::info!(
        "stub directory {} has format {:?}, clearing for format {}",
        dir.display(),
        current,
        STUB_FORMAT_VERSION
    );
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == STUB_EXTENSION) {
            fs::remove_file(&path)
                .with_context(|| format!("removing stale stub {}", path.display()))?;
        }
    }
    fs::write(&marker, format!("{STUB_FORMAT_VERSION}\n"))?;
    Ok(true)
}

/// A candidate from a lookup, tied to the package that provides it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StubHit {
    pub package: String,
    pub package_version: String,
    pub priority: StubPriority,
    pub symbol: StubSymbol,
}

/// Concurrent symbol index over loaded package stubs.
#[derive(Default)]
pub struct StubIndex {
    packages: DashMap<String, Arc<PackageStub>>,
}

impl StubIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stub under `dir` in parallel. Unreadable files are
    /// logged and skipped. Returns the number of packages loaded.
    pub fn load_directory(&self, dir: &Path) -> Result<usize> {
        ensure_format_version(dir)?;
        let paths: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|e| e == STUB_EXTENSION))
            .collect();
        let stubs: Vec<PackageStub> = paths
            .par_iter()
            .filter_map(|path| match read_stub_file(path) {
                Ok(stub) => Some(stub),
                Err(e) => {
                    log::warn!("skipping stub {}: {e:#}", path.display());
                    None
                }
            })
            .collect();
        let count = stubs.len();
        for stub in stubs {
            self.insert(stub);
        }
        log::debug!("loaded {count} package stubs from {}", dir.display());
        Ok(count)
    }

    pub fn insert(&self, stub: PackageStub) {
        self.packages.insert(stub.name.clone(), Arc::new(stub));
    }

    pub fn package(&self, name: &str) -> Option<Arc<PackageStub>> {
        self.packages.get(name).map(|p| Arc::clone(p.value()))
    }

    pub fn package_version(&self, name: &str) -> Option<RVersion> {
        self.package(name).and_then(|p| p.version.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All packages that provide `name`, ordered by priority. Exported
    /// symbols only unless `include_internal` (the `:::` form).
    pub fn lookup(&self, name: &str, include_internal: bool) -> Vec<StubHit> {
        let mut hits: Vec<StubHit> = self
            .packages
            .iter()
            .flat_map(|entry| {
                let stub = entry.value();
                stub.symbols
                    .iter()
                    .filter(|s| s.name == name && (s.exported || include_internal))
                    .map(|s| StubHit {
                        package: stub.name.clone(),
                        package_version: stub.version.clone(),
                        priority: stub.priority,
                        symbol: s.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        hits.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.package.cmp(&b.package)));
        hits
    }

    /// Lookup within one package, the `pkg::name` / `pkg:::name` forms.
    pub fn lookup_in(&self, package: &str, name: &str, include_internal: bool) -> Vec<StubHit> {
        let Some(stub) = self.package(package) else {
            return Vec::new();
        };
        stub.symbols
            .iter()
            .filter(|s| s.name == name && (s.exported || include_internal))
            .map(|s| StubHit {
                package: stub.name.clone(),
                package_version: stub.version.clone(),
                priority: stub.priority,
                symbol: s.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stub(name: &str, priority: StubPriority) -> PackageStub {
        PackageStub {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            priority,
            symbols: vec![
                StubSymbol {
                    name: "filter".to_string(),
                    kind: StubKind::Function,
                    exported: true,
                    parameters: vec!["x".to_string(), "...".to_string()],
                },
                StubSymbol {
                    name: "summary".to_string(),
                    kind: StubKind::Generic,
                    exported: true,
                    parameters: vec!["object".to_string(), "...".to_string()],
                },
                StubSymbol {
                    name: "internal_helper".to_string(),
                    kind: StubKind::Function,
                    exported: false,
                    parameters: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let stub = sample_stub("dplyr", StubPriority::Optional);
        let decoded = decode_stub(&encode_stub(&stub)).unwrap();
        assert_eq!(decoded, stub);
    }

    #[test]
    fn test_decode_rejects_bad_magic_and_version() {
        assert!(decode_stub(b"NOPE").is_err());
        let mut bytes = encode_stub(&sample_stub("p", StubPriority::Base));
        bytes[4] = 99;
        let err = decode_stub(&bytes).unwrap_err();
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn test_decode_truncated_input() {
        let bytes = encode_stub(&sample_stub("p", StubPriority::Base));
        assert!(decode_stub(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_file_name_is_name_dash_version() {
        let stub = sample_stub("stats", StubPriority::Base);
        assert_eq!(stub.file_name(), "stats-1.0.0.rstub");
    }

    #[test]
    fn test_lookup_respects_export_visibility() {
        let index = StubIndex::new();
        index.insert(sample_stub("dplyr", StubPriority::Optional));
        assert_eq!(index.lookup("filter", false).len(), 1);
        assert!(index.lookup("internal_helper", false).is_empty());
        assert_eq!(index.lookup("internal_helper", true).len(), 1);
    }

    #[test]
    fn test_lookup_orders_by_priority() {
        let index = StubIndex::new();
        index.insert(sample_stub("zoo", StubPriority::Optional));
        index.insert(sample_stub("stats", StubPriority::Base));
        let hits = index.lookup("filter", false);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].package, "stats");
        assert_eq!(hits[1].package, "zoo");
    }

    #[test]
    fn test_lookup_in_package() {
        let index = StubIndex::new();
        index.insert(sample_stub("dplyr", StubPriority::Optional));
        assert_eq!(index.lookup_in("dplyr", "filter", false).len(), 1);
        assert!(index.lookup_in("missing", "filter", false).is_empty());
        assert_eq!(index.lookup_in("dplyr", "internal_helper", true).len(), 1);
    }

    #[test]
    fn test_directory_round_trip_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_format_version(dir.path()).unwrap());
        write_stub_file(dir.path(), &sample_stub("dplyr", StubPriority::Optional)).unwrap();
        write_stub_file(dir.path(), &sample_stub("stats", StubPriority::Base)).unwrap();

        let index = StubIndex::new();
        assert_eq!(index.load_directory(dir.path()).unwrap(), 2);
        assert_eq!(index.len(), 2);
        // Second pass is a no-op: the marker matches.
        assert!(!ensure_format_version(dir.path()).unwrap());
    }

    #[test]
    fn test_stale_marker_clears_stubs() {
        let dir = tempfile::tempdir().unwrap();
        ensure_format_version(dir.path()).unwrap();
        let path =
            write_stub_file(dir.path(), &sample_stub("dplyr", StubPriority::Optional)).unwrap();
        fs::write(dir.path().join(VERSION_MARKER), "1\n").unwrap();

        assert!(ensure_format_version(dir.path()).unwrap());
        assert!(!path.exists());
    }
}
