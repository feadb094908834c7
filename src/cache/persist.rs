//! On-disk format for the fingerprint cache.
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "<64 hex digits>": { "formula": "=SUM(A:A)", "created_at": "...", "hit_count": 3 }
//!   }
//! }
//! ```
//!
//! Loading is tolerant: a missing, unreadable or version-mismatched file is
//! an empty cache, and individual entries that fail validation are dropped.
//! Saving writes a temporary file and renames it into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fingerprint::Fingerprint;
use super::store::CacheEntry;
use crate::{FormulaError, Result};

/// Current cache file format version.
pub const CACHE_FILE_VERSION: u32 = 1;

/// Default cache path: `~/.cache/formulaspark/formula_cache.json`.
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("formulaspark")
        .join("formula_cache.json")
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    formula: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    hit_count: u64,
}

#[derive(Serialize)]
struct CacheFile<'a> {
    version: u32,
    entries: BTreeMap<&'a str, PersistedEntry>,
}

/// Entries stay as raw JSON so one bad entry cannot poison the rest.
#[derive(Deserialize)]
struct RawCacheFile {
    version: u32,
    entries: serde_json::Map<String, serde_json::Value>,
}

/// Parse a cache file body, keeping only well-formed entries.
pub(crate) fn parse_entries(json: &str) -> Result<Vec<CacheEntry>> {
    let raw: RawCacheFile = serde_json::from_str(json)?;
    if raw.version != CACHE_FILE_VERSION {
        return Err(FormulaError::CachePersistence(format!(
            "unsupported cache file version {} (expected {CACHE_FILE_VERSION})",
            raw.version
        )));
    }

    let mut entries = Vec::with_capacity(raw.entries.len());
    for (key, value) in raw.entries {
        let Some(fingerprint) = Fingerprint::parse(&key) else {
            debug!(key, "dropping cache entry with malformed fingerprint");
            continue;
        };
        match serde_json::from_value::<PersistedEntry>(value) {
            Ok(entry) if !entry.formula.trim().is_empty() => entries.push(CacheEntry {
                fingerprint,
                formula: entry.formula,
                created_at: entry.created_at,
                hit_count: entry.hit_count,
            }),
            Ok(_) => debug!(key, "dropping cache entry with empty formula"),
            Err(e) => debug!(key, error = %e, "dropping malformed cache entry"),
        }
    }
    Ok(entries)
}

/// Load cached entries from disk.
///
/// Returns an empty list on a missing or corrupt file (logs a warning on
/// corrupt).
pub fn load_entries(path: &Path) -> Vec<CacheEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read formula cache");
            return Vec::new();
        }
    };
    match parse_entries(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring corrupt formula cache");
            Vec::new()
        }
    }
}

/// Save entries to disk (atomic write via tmp + rename).
pub fn save_entries(path: &Path, entries: &[CacheEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            FormulaError::CachePersistence(format!(
                "failed to create cache dir {}: {e}",
                parent.display()
            ))
        })?;
    }

    let file = CacheFile {
        version: CACHE_FILE_VERSION,
        entries: entries
            .iter()
            .map(|e| {
                (
                    e.fingerprint.as_str(),
                    PersistedEntry {
                        formula: e.formula.clone(),
                        created_at: e.created_at,
                        hit_count: e.hit_count,
                    },
                )
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| FormulaError::CachePersistence(format!("failed to serialize cache: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(|e| {
        FormulaError::CachePersistence(format!(
            "failed to write cache file {}: {e}",
            tmp_path.display()
        ))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        FormulaError::CachePersistence(format!(
            "failed to rename cache file {} → {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })?;

    Ok(())
}
