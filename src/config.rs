//! Run configuration (`tally.toml`).
//!
//! The file is optional; every value can also come from the command line.
//! [`TallyConfig::apply`] layers CLI overrides on top of the file, and
//! [`TallyConfig::resolve`] validates the result into [`RunSettings`],
//! naming the missing key when something required is absent.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tally_core::StorageLocation;
use tally_storage::Subject;

use crate::inventory::DEFAULT_PAGE_SIZE;
use crate::policy::PolicyKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Missing sections use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TallyConfig {
    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inventory database settings.
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// What to reconcile and how.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Storage backend settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Which adapter to use.
    #[serde(default)]
    pub adapter: StorageKind,

    /// Root directory of the filesystem adapter.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Built-in storage adapters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// [`FileSystemStorage`](tally_storage::FileSystemStorage).
    #[default]
    Filesystem,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
        }
    }
}

// ---------------------------------------------------------------------------
// InventoryConfig
// ---------------------------------------------------------------------------

/// Inventory database settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryConfig {
    /// Path to the SQLite database.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Rows fetched per cursor page (default: 1000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            database: None,
            page_size: default_page_size(),
        }
    }
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

// ---------------------------------------------------------------------------
// ReconcileConfig
// ---------------------------------------------------------------------------

/// What to reconcile and how.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// The bucket to reconcile. Surrounding whitespace is ignored.
    #[serde(default)]
    pub bucket: Option<String>,

    /// The resolution policy.
    #[serde(default)]
    pub policy: Option<PolicyKind>,

    /// Report decisions without applying them (default: false).
    #[serde(default)]
    pub report_only: bool,

    /// Principal to run storage requests as. Anonymous when unset.
    #[serde(default)]
    pub run_as: Option<String>,
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Values supplied on the command line. `None` keeps the file's value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    /// `--bucket`.
    pub bucket: Option<String>,
    /// `--policy`.
    pub policy: Option<PolicyKind>,
    /// `--report-only`. Can only switch report-only on.
    pub report_only: bool,
    /// `--database`.
    pub database: Option<PathBuf>,
    /// `--storage-root`.
    pub storage_root: Option<PathBuf>,
    /// `--run-as`.
    pub run_as: Option<String>,
}

// ---------------------------------------------------------------------------
// RunSettings
// ---------------------------------------------------------------------------

/// Validated settings for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSettings {
    /// Storage adapter.
    pub storage: StorageKind,
    /// Storage root directory.
    pub storage_root: PathBuf,
    /// Inventory database path.
    pub database: PathBuf,
    /// Cursor page size.
    pub page_size: usize,
    /// Trimmed, validated bucket.
    pub bucket: String,
    /// Policy to apply.
    pub policy: PolicyKind,
    /// Suppress corrections.
    pub report_only: bool,
    /// Identity for storage requests.
    pub subject: Subject,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A configuration problem, located as precisely as possible.
///
/// Renders as `<file>: <key>: <message>`, with `tally config` in place of
/// the file when the error did not come from one.
#[derive(Debug)]
pub struct ConfigError {
    /// The file being loaded, if any.
    pub path: Option<PathBuf>,
    /// Dotted key at fault (`reconcile.bucket`), when it can be located.
    pub key: Option<String>,
    /// What is wrong. Parse errors start with the line number.
    pub message: String,
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self {
            path: None,
            key: Some(key.to_owned()),
            message: message.into(),
        }
    }

    fn missing(key: &str, flag: &str) -> Self {
        Self::invalid(key, format!("not set\n  To fix: set it in tally.toml or pass {flag}"))
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .path
            .as_ref()
            .map_or_else(|| "tally config".to_owned(), |p| p.display().to_string());
        write!(f, "{source}: ")?;
        if let Some(key) = &self.key {
            write!(f, "`{key}`: ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for ConfigError {}

/// The dotted `table.key` written on the line containing byte `offset`, or
/// the table name when the line is a table header.
fn key_at(toml_str: &str, offset: usize) -> Option<String> {
    let offset = offset.min(toml_str.len());
    let line_start = toml_str[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = toml_str[offset..].find('\n').map_or(toml_str.len(), |i| offset + i);
    let line = toml_str[line_start..line_end].trim();
    if let Some(table) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
        return Some(table.trim().to_owned());
    }
    let key = line.split_once('=').map(|(k, _)| k.trim()).filter(|k| !k.is_empty())?;
    let table = toml_str[..line_start]
        .lines()
        .rev()
        .map(str::trim)
        .find_map(|l| l.strip_prefix('[').and_then(|l| l.strip_suffix(']')));
    Some(table.map_or_else(|| key.to_owned(), |t| format!("{}.{key}", t.trim())))
}

impl TallyConfig {
    /// Read `tally.toml` from `path`.
    ///
    /// A missing file is not an error: every value may still come from the
    /// command line, and [`resolve`](Self::resolve) reports whatever is
    /// still unset.
    ///
    /// # Errors
    /// Returns `ConfigError` carrying `path` when the file cannot be read or
    /// does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    key: None,
                    message: format!("cannot read tally config: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|e| ConfigError {
            path: Some(path.to_owned()),
            ..e
        })
    }

    /// Parse a `tally.toml` document.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, an unknown table or key, or an
    /// unknown adapter or policy name. The error names the offending key and
    /// its line.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let (key, message) = e.span().map_or_else(
                || (None, e.message().to_owned()),
                |span| {
                    let line = toml_str[..span.start.min(toml_str.len())].matches('\n').count() + 1;
                    (key_at(toml_str, span.start), format!("line {line}: {}", e.message()))
                },
            );
            ConfigError {
                path: None,
                key,
                message,
            }
        })
    }

    /// Layer command-line values over the file's.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(bucket) = overrides.bucket {
            self.reconcile.bucket = Some(bucket);
        }
        if let Some(policy) = overrides.policy {
            self.reconcile.policy = Some(policy);
        }
        if overrides.report_only {
            self.reconcile.report_only = true;
        }
        if let Some(database) = overrides.database {
            self.inventory.database = Some(database);
        }
        if let Some(root) = overrides.storage_root {
            self.storage.root = Some(root);
        }
        if let Some(run_as) = overrides.run_as {
            self.reconcile.run_as = Some(run_as);
        }
    }

    /// Validate into settings for one run.
    ///
    /// # Errors
    /// Returns `ConfigError` naming the first missing or invalid key.
    pub fn resolve(self) -> Result<RunSettings, ConfigError> {
        let bucket = self
            .reconcile
            .bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ConfigError::missing("reconcile.bucket", "--bucket"))?
            .to_owned();
        StorageLocation::validate_bucket(&bucket)
            .map_err(|e| ConfigError::invalid("reconcile.bucket", e.to_string()))?;
        let policy = self
            .reconcile
            .policy
            .ok_or_else(|| ConfigError::missing("reconcile.policy", "--policy"))?;
        let storage_root = self
            .storage
            .root
            .ok_or_else(|| ConfigError::missing("storage.root", "--storage-root"))?;
        let database = self
            .inventory
            .database
            .ok_or_else(|| ConfigError::missing("inventory.database", "--database"))?;
        if self.inventory.page_size == 0 {
            return Err(ConfigError::invalid("inventory.page_size", "must be at least 1"));
        }
        let subject = match self.reconcile.run_as.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Subject::named(name),
            _ => Subject::anonymous(),
        };
        Ok(RunSettings {
            storage: self.storage.adapter,
            storage_root,
            database,
            page_size: self.inventory.page_size,
            bucket,
            policy,
            report_only: self.reconcile.report_only,
            subject,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[storage]
adapter = "filesystem"
root = "/srv/objects"

[inventory]
database = "/var/lib/tally/inventory.db"
page_size = 250

[reconcile]
bucket = "  a1  "
policy = "inventory-is-always-right"
report_only = true
run_as = "svc-tally"
"#;

    #[test]
    fn defaults_all_fields() {
        let cfg = TallyConfig::default();
        assert_eq!(cfg.storage.adapter, StorageKind::Filesystem);
        assert_eq!(cfg.inventory.page_size, 1000);
        assert!(!cfg.reconcile.report_only);
        assert_eq!(cfg.reconcile.policy, None);
    }

    #[test]
    fn parse_full_file() {
        let cfg = TallyConfig::parse(FULL).unwrap();
        assert_eq!(cfg.storage.root.as_deref(), Some(Path::new("/srv/objects")));
        assert_eq!(cfg.inventory.page_size, 250);
        assert_eq!(cfg.reconcile.policy, Some(PolicyKind::InventoryIsAlwaysRight));
        let run = cfg.resolve().unwrap();
        assert_eq!(run.bucket, "a1");
        assert!(run.report_only);
        assert_eq!(run.subject, Subject::named("svc-tally"));
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let err = TallyConfig::parse("[reconcile]\nbuckets = \"a\"\n").unwrap_err();
        assert!(err.message.starts_with("line 2:"), "{}", err.message);
        assert_eq!(err.key.as_deref(), Some("reconcile.buckets"));
    }

    #[test]
    fn parse_rejects_unknown_policy() {
        let err = TallyConfig::parse("[storage]\nroot = \"/srv\"\n\n[reconcile]\npolicy = \"coin-flip\"\n")
            .unwrap_err();
        assert!(err.message.starts_with("line 5:"), "{}", err.message);
        assert_eq!(err.key.as_deref(), Some("reconcile.policy"));
        assert!(err.to_string().starts_with("tally config: `reconcile.policy`: line 5:"), "{err}");
    }

    #[test]
    fn overrides_win_over_file() {
        let mut cfg = TallyConfig::parse(FULL).unwrap();
        cfg.apply(Overrides {
            bucket: Some("b2".into()),
            policy: Some(PolicyKind::StorageIsAlwaysRight),
            database: Some("/tmp/other.db".into()),
            ..Overrides::default()
        });
        let run = cfg.resolve().unwrap();
        assert_eq!(run.bucket, "b2");
        assert_eq!(run.policy, PolicyKind::StorageIsAlwaysRight);
        assert_eq!(run.database, PathBuf::from("/tmp/other.db"));
        // Absent flag does not switch report-only off.
        assert!(run.report_only);
    }

    #[test]
    fn blank_bucket_names_the_key() {
        let mut cfg = TallyConfig::parse(FULL).unwrap();
        cfg.reconcile.bucket = Some("   ".into());
        let err = cfg.resolve().unwrap_err();
        assert_eq!(err.key.as_deref(), Some("reconcile.bucket"));
        assert!(err.message.contains("--bucket"));
        assert!(err.to_string().contains("`reconcile.bucket`: not set"));
    }

    #[test]
    fn missing_policy_names_the_key() {
        let mut cfg = TallyConfig::parse(FULL).unwrap();
        cfg.reconcile.policy = None;
        assert_eq!(cfg.resolve().unwrap_err().key.as_deref(), Some("reconcile.policy"));
    }

    #[test]
    fn malformed_bucket_is_rejected() {
        let mut cfg = TallyConfig::parse(FULL).unwrap();
        cfg.reconcile.bucket = Some("a/b".into());
        let err = cfg.resolve().unwrap_err();
        assert_eq!(err.key.as_deref(), Some("reconcile.bucket"));
        assert!(err.message.contains('/'), "{}", err.message);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let mut cfg = TallyConfig::parse(FULL).unwrap();
        cfg.inventory.page_size = 0;
        assert_eq!(cfg.resolve().unwrap_err().key.as_deref(), Some("inventory.page_size"));
    }

    #[test]
    fn blank_run_as_is_anonymous() {
        let mut cfg = TallyConfig::parse(FULL).unwrap();
        cfg.reconcile.run_as = Some(" ".into());
        assert_eq!(cfg.resolve().unwrap().subject, Subject::anonymous());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = TallyConfig::load(Path::new("/nonexistent/tally.toml")).unwrap();
        assert_eq!(cfg, TallyConfig::default());
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = TallyConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().starts_with(&path.display().to_string()));
    }

    #[test]
    fn unknown_table_is_named() {
        let err = TallyConfig::parse("[storage]\nroot = \"/srv\"\n[sqlite]\npath = \"x\"\n").unwrap_err();
        assert!(err.key.as_deref().is_some_and(|k| k.starts_with("sqlite")), "{err:?}");
    }

    #[test]
    fn key_at_locates_table_and_key() {
        let doc = "[inventory]\ndatabase = \"x\"\n\n[reconcile]\n  bucket = 3\n";
        assert_eq!(key_at(doc, doc.find("3").unwrap()).as_deref(), Some("reconcile.bucket"));
        assert_eq!(key_at(doc, 2).as_deref(), Some("inventory"));
        assert_eq!(key_at("top = 1", 6).as_deref(), Some("top"));
        assert_eq!(key_at("", 0), None);
    }

    #[test]
    fn example_file_resolves() {
        let cfg = TallyConfig::parse(include_str!("../tally.example.toml")).unwrap();
        let settings = cfg.resolve().unwrap();
        assert_eq!(settings.bucket, "a1");
        assert_eq!(settings.policy, PolicyKind::StorageIsAlwaysRight);
        assert!(settings.report_only);
        assert_eq!(settings.subject, Subject::named("ops"));
    }
}
