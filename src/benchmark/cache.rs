//! Durable benchmark cache with per-result submission flags.
//!
//! The cache is the at-least-once witness for benchmark submission: results
//! persisted with `submitted = true` are never re-sent, and results
//! persisted unsubmitted are retried on the next loop iteration or restart.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::restrict_file_permissions;

/// One benchmark measurement plus its durable submission flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Device index as reported by the cracker.
    pub device: u32,
    /// Hash type code.
    pub hash_type: u32,
    /// Kernel runtime in milliseconds.
    pub runtime_ms: i64,
    /// Time per hash in milliseconds.
    pub hash_time_ms: f64,
    /// Speed in hashes per second.
    pub speed_hs: f64,
    /// Whether the coordinator has acknowledged this result. Absent in
    /// older caches, which reads as false so those entries are retried.
    #[serde(default)]
    pub submitted: bool,
}

/// Parses one machine-readable benchmark line.
///
/// The format is six colon-separated fields:
/// `device:hashType:name:runtimeMs:hashTimeMs:speedHs`. Anything else
/// yields `None`; the device name is parsed but not retained.
#[must_use]
pub fn parse_benchmark_line(line: &str) -> Option<BenchmarkResult> {
    let fields: Vec<&str> = line.trim().split(':').collect();
    if fields.len() != 6 {
        return None;
    }
    Some(BenchmarkResult {
        device: fields[0].parse().ok()?,
        hash_type: fields[1].parse().ok()?,
        runtime_ms: fields[3].parse().ok()?,
        hash_time_ms: fields[4].parse().ok()?,
        speed_hs: fields[5].parse().ok()?,
        submitted: false,
    })
}

/// True when every result has been acknowledged; vacuously true when empty.
#[must_use]
pub fn all_submitted(results: &[BenchmarkResult]) -> bool {
    results.iter().all(|r| r.submitted)
}

/// Indices of the results still awaiting acknowledgment.
#[must_use]
pub fn unsubmitted_indices(results: &[BenchmarkResult]) -> Vec<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.submitted)
        .map(|(i, _)| i)
        .collect()
}

/// The results still awaiting acknowledgment.
#[must_use]
pub fn unsubmitted_results(results: &[BenchmarkResult]) -> Vec<BenchmarkResult> {
    results.iter().filter(|r| !r.submitted).cloned().collect()
}

/// Loads the cache.
///
/// A missing file, corrupt JSON, or an empty array all load as `None`;
/// corrupt files are deleted so the next run starts clean.
#[must_use]
pub fn load_cache(path: &Path) -> Option<Vec<BenchmarkResult>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to read benchmark cache");
            }
            return None;
        }
    };
    match serde_json::from_str::<Vec<BenchmarkResult>>(&raw) {
        Ok(results) if results.is_empty() => None,
        Ok(results) => {
            debug!(path = %path.display(), count = results.len(), "benchmark cache loaded");
            Some(results)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "benchmark cache corrupt, deleting");
            let _ = std::fs::remove_file(path);
            None
        }
    }
}

/// Persists the cache atomically: write a sibling `.tmp`, then rename.
///
/// # Errors
///
/// Returns the underlying error on serialization or filesystem failure; the
/// temp file is removed before the error propagates.
pub fn save_cache(path: &Path, results: &[BenchmarkResult]) -> std::io::Result<()> {
    let payload = serde_json::to_vec_pretty(results)?;
    let mut tmp_name = path.file_name().map_or_else(
        || std::ffi::OsString::from("benchmark_cache.json"),
        std::ffi::OsStr::to_os_string,
    );
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(err) = std::fs::write(&tmp_path, &payload) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = restrict_file_permissions(&tmp_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    debug!(path = %path.display(), count = results.len(), "benchmark cache persisted");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(device: u32, submitted: bool) -> BenchmarkResult {
        BenchmarkResult {
            device,
            hash_type: 1000,
            runtime_ms: 100,
            hash_time_ms: 50.0,
            speed_hs: 12345.67,
            submitted,
        }
    }

    // ───── parse_benchmark_line ─────────────────────────────────────────────

    #[test]
    fn test_parse_line_six_fields() {
        let parsed = parse_benchmark_line("1:0:name:100:50:12345.67").unwrap();
        assert_eq!(parsed.device, 1);
        assert_eq!(parsed.hash_type, 0);
        assert_eq!(parsed.runtime_ms, 100);
        assert!((parsed.hash_time_ms - 50.0).abs() < f64::EPSILON);
        assert!((parsed.speed_hs - 12345.67).abs() < f64::EPSILON);
        assert!(!parsed.submitted);
    }

    #[test]
    fn test_parse_line_wrong_field_count_is_none() {
        assert!(parse_benchmark_line("1:0:name:100:50").is_none());
        assert!(parse_benchmark_line("1:0:name:100:50:12345.67:extra").is_none());
        assert!(parse_benchmark_line("").is_none());
        assert!(parse_benchmark_line("Started: benchmarking").is_none());
    }

    #[test]
    fn test_parse_line_non_numeric_fields_is_none() {
        assert!(parse_benchmark_line("x:0:name:100:50:12345.67").is_none());
        assert!(parse_benchmark_line("1:0:name:abc:50:12345.67").is_none());
    }

    // ───── submission helpers ───────────────────────────────────────────────

    #[test]
    fn test_all_submitted_empty_is_true() {
        assert!(all_submitted(&[]));
    }

    #[test]
    fn test_all_submitted_requires_every_entry() {
        assert!(all_submitted(&[result(1, true), result(2, true)]));
        assert!(!all_submitted(&[result(1, true), result(2, false)]));
    }

    #[test]
    fn test_unsubmitted_results_filters_by_flag() {
        let results = vec![result(1, true), result(2, false), result(3, false)];
        let pending = unsubmitted_results(&results);
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| !r.submitted));
        assert_eq!(pending[0].device, 2);
        assert_eq!(pending[1].device, 3);
        assert_eq!(unsubmitted_indices(&results), vec![1, 2]);
    }

    // ───── cache round trips ────────────────────────────────────────────────

    #[test]
    fn test_cache_round_trip_preserves_order_and_flags() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("benchmark_cache.json");
        let results = vec![result(2, true), result(1, false), result(3, true)];

        save_cache(&path, &results).unwrap();
        let loaded = load_cache(&path).unwrap();
        assert_eq!(loaded, results);
    }

    #[test]
    fn test_load_missing_cache_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load_cache(&tmp.path().join("absent.json")).is_none());
    }

    #[test]
    fn test_load_empty_array_is_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("benchmark_cache.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(load_cache(&path).is_none());
    }

    #[test]
    fn test_load_corrupt_cache_is_none_and_deleted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("benchmark_cache.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_cache(&path).is_none());
        assert!(!path.exists(), "corrupt cache must be deleted");
    }

    #[test]
    fn test_load_missing_submitted_field_reads_as_false() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("benchmark_cache.json");
        std::fs::write(
            &path,
            r#"[{"device":1,"hash_type":0,"runtime_ms":100,"hash_time_ms":50.0,"speed_hs":1.5}]"#,
        )
        .unwrap();
        let loaded = load_cache(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].submitted);
    }

    #[test]
    fn test_save_cache_leaves_no_tmp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("benchmark_cache.json");
        save_cache(&path, &[result(1, false)]).unwrap();
        assert!(path.exists());
        assert!(!path.with_file_name("benchmark_cache.json.tmp").exists());
    }

    #[test]
    fn test_save_cache_unwritable_path_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing-dir").join("cache.json");
        assert!(save_cache(&path, &[result(1, false)]).is_err());
    }
}
