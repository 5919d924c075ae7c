//! Cracker invocation parameters and command-line construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{Attack, Task};
use crate::state::DataPaths;

/// Fully-specified parameters for one cracker invocation.
///
/// Built from an attack/task pair (or benchmark request) plus the resolved
/// binary; the session layer turns this into a command line and nothing
/// here touches the network.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Resolved cracker binary.
    pub binary: PathBuf,
    /// Session identifier passed to `--session`.
    pub session_id: String,
    /// Attack mode code (`-a`).
    pub attack_mode: u32,
    /// Hash type code (`-m`).
    pub hash_type: u32,
    /// Hash list file.
    pub hash_file: PathBuf,
    /// Mask for mask attacks.
    pub mask: Option<String>,
    /// Mask increment bounds, when increment mode is active.
    pub increment: Option<(u32, u32)>,
    /// Positional custom charsets (`-1` through `-4`).
    pub custom_charsets: Vec<(usize, String)>,
    /// Word list file name, resolved against the shared files directory.
    pub word_list: Option<PathBuf>,
    /// Rule list file name, resolved against the shared files directory.
    pub rule_list: Option<PathBuf>,
    /// Mask list file name, resolved against the shared files directory.
    pub mask_list: Option<PathBuf>,
    /// Enable optimized kernels (`-O`).
    pub optimized_kernels: bool,
    /// Enable slow candidate generators (`-S`).
    pub slow_candidate_generators: bool,
    /// Backend device selector (`-d`).
    pub backend_devices: Option<String>,
    /// Keyspace slice offset.
    pub skip: Option<i64>,
    /// Keyspace slice length.
    pub limit: Option<i64>,
    /// Cracker-managed restore checkpoint.
    pub restore_file: PathBuf,
    /// Transient outfile collecting cracked hashes.
    pub outfile: PathBuf,
    /// Status-update cadence.
    pub status_timer: Duration,
    /// Run `--benchmark` instead of an attack.
    pub benchmark: bool,
    /// Benchmark every hash type instead of the default set.
    pub benchmark_all: bool,
}

impl SessionParams {
    /// Parameters for a task run.
    #[must_use]
    pub fn for_attack(
        binary: &Path,
        task: &Task,
        attack: &Attack,
        paths: &DataPaths,
        status_timer: Duration,
        backend_devices: Option<String>,
    ) -> Self {
        let resolve = |file: &Option<crate::api::AttackResourceFile>| {
            file.as_ref().map(|f| paths.resource_file(&f.file_name))
        };
        Self {
            binary: binary.to_path_buf(),
            session_id: format!("attack-{}", attack.id),
            attack_mode: attack.attack_mode,
            hash_type: attack.hash_mode,
            hash_file: paths.hash_list_file(attack.id),
            mask: attack.mask.clone().filter(|m| !m.is_empty()),
            increment: match (
                attack.increment_mode,
                attack.increment_minimum,
                attack.increment_maximum,
            ) {
                (true, Some(min), Some(max)) => Some((min, max)),
                _ => None,
            },
            custom_charsets: attack
                .custom_charsets()
                .into_iter()
                .map(|(i, cs)| (i, cs.to_string()))
                .collect(),
            word_list: resolve(&attack.word_list),
            rule_list: resolve(&attack.rule_list),
            mask_list: resolve(&attack.mask_list),
            optimized_kernels: attack.optimized_kernels,
            slow_candidate_generators: attack.slow_candidate_generators,
            backend_devices,
            skip: task.skip,
            limit: task.limit,
            restore_file: paths.restore_file(attack.id),
            outfile: paths.outfile(task.id),
            status_timer,
            benchmark: false,
            benchmark_all: false,
        }
    }

    /// Parameters for a benchmark run.
    #[must_use]
    pub fn for_benchmark(
        binary: &Path,
        paths: &DataPaths,
        benchmark_all: bool,
        backend_devices: Option<String>,
    ) -> Self {
        Self {
            binary: binary.to_path_buf(),
            session_id: "benchmark".to_string(),
            attack_mode: 0,
            hash_type: 0,
            hash_file: PathBuf::new(),
            mask: None,
            increment: None,
            custom_charsets: Vec::new(),
            word_list: None,
            rule_list: None,
            mask_list: None,
            optimized_kernels: false,
            slow_candidate_generators: false,
            backend_devices,
            skip: None,
            limit: None,
            restore_file: paths.restore.join("benchmark.restore"),
            outfile: paths.output.join("benchmark.out"),
            status_timer: Duration::from_secs(10),
            benchmark: true,
            benchmark_all,
        }
    }

    /// Builds the argument vector for this invocation.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        if self.benchmark {
            args.push("--benchmark".to_string());
            args.push("--machine-readable".to_string());
            if self.benchmark_all {
                args.push("--benchmark-all".to_string());
            }
            if let Some(devices) = &self.backend_devices {
                args.push("-d".to_string());
                args.push(devices.clone());
            }
            return args;
        }

        args.push("--quiet".to_string());
        args.push("--status".to_string());
        args.push("--status-json".to_string());
        args.push("--status-timer".to_string());
        args.push(self.status_timer.as_secs().to_string());
        args.push("--potfile-disable".to_string());
        args.push("--outfile".to_string());
        args.push(self.outfile.display().to_string());
        args.push("--outfile-format".to_string());
        args.push("1,2".to_string());
        args.push("--session".to_string());
        args.push(self.session_id.clone());
        args.push("--restore-file-path".to_string());
        args.push(self.restore_file.display().to_string());

        args.push("-a".to_string());
        args.push(self.attack_mode.to_string());
        args.push("-m".to_string());
        args.push(self.hash_type.to_string());

        if self.optimized_kernels {
            args.push("-O".to_string());
        }
        if self.slow_candidate_generators {
            args.push("-S".to_string());
        }
        if let Some(devices) = &self.backend_devices {
            args.push("-d".to_string());
            args.push(devices.clone());
        }
        if let Some(skip) = self.skip {
            args.push("--skip".to_string());
            args.push(skip.to_string());
        }
        if let Some(limit) = self.limit {
            args.push("--limit".to_string());
            args.push(limit.to_string());
        }
        if let Some((min, max)) = self.increment {
            args.push("--increment".to_string());
            args.push("--increment-min".to_string());
            args.push(min.to_string());
            args.push("--increment-max".to_string());
            args.push(max.to_string());
        }
        for (position, charset) in &self.custom_charsets {
            args.push(format!("-{position}"));
            args.push(charset.clone());
        }

        args.push(self.hash_file.display().to_string());

        // Attack-mode positional inputs: wordlist for straight/hybrid modes,
        // mask or mask list for mask-based modes.
        if let Some(word_list) = &self.word_list {
            args.push(word_list.display().to_string());
        }
        if let Some(rule_list) = &self.rule_list {
            args.push("-r".to_string());
            args.push(rule_list.display().to_string());
        }
        if let Some(mask_list) = &self.mask_list {
            args.push(mask_list.display().to_string());
        } else if let Some(mask) = &self.mask {
            args.push(mask.clone());
        }

        args
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn attack_json(extra: &str) -> Attack {
        let base = format!(
            r#"{{
                "id": 9, "attack_mode": 0, "hash_mode": 1000,
                "hash_list_id": 4, "hash_list_url": "http://c.test/h", "hash_list_checksum": "ab"
                {extra}
            }}"#
        );
        serde_json::from_str(&base).unwrap()
    }

    fn task() -> Task {
        serde_json::from_str(r#"{"id": 3, "attack_id": 9, "skip": 1000, "limit": 2000}"#).unwrap()
    }

    fn paths() -> DataPaths {
        DataPaths::new(Path::new("/data"), None, None)
    }

    #[test]
    fn test_for_attack_derives_paths() {
        let attack = attack_json("");
        let params = SessionParams::for_attack(
            Path::new("/usr/bin/hashcat"),
            &task(),
            &attack,
            &paths(),
            Duration::from_secs(10),
            None,
        );
        assert_eq!(params.hash_file, PathBuf::from("/data/hashlists/9.hsh"));
        assert_eq!(
            params.restore_file,
            PathBuf::from("/data/restore/9.restore")
        );
        assert_eq!(params.outfile, PathBuf::from("/data/output/3.out"));
        assert_eq!(params.session_id, "attack-9");
        assert_eq!(params.skip, Some(1000));
        assert_eq!(params.limit, Some(2000));
    }

    #[test]
    fn test_to_args_wordlist_attack() {
        let attack = attack_json(
            r#", "word_list": {"id": 1, "download_url": "u", "checksum": "c", "file_name": "rockyou.txt"},
               "rule_list": {"id": 2, "download_url": "u", "checksum": "c", "file_name": "best64.rule"}"#,
        );
        let params = SessionParams::for_attack(
            Path::new("/usr/bin/hashcat"),
            &task(),
            &attack,
            &paths(),
            Duration::from_secs(10),
            None,
        );
        let args = params.to_args();
        let joined = args.join(" ");
        assert!(joined.contains("-a 0"));
        assert!(joined.contains("-m 1000"));
        assert!(joined.contains("--status-json"));
        assert!(joined.contains("--potfile-disable"));
        assert!(joined.contains("--skip 1000"));
        assert!(joined.contains("--limit 2000"));
        assert!(joined.contains("/data/files/rockyou.txt"));
        assert!(joined.contains("-r /data/files/best64.rule"));
        // The hash file precedes the wordlist.
        let hash_pos = args.iter().position(|a| a.ends_with("9.hsh")).unwrap();
        let word_pos = args.iter().position(|a| a.ends_with("rockyou.txt")).unwrap();
        assert!(hash_pos < word_pos);
    }

    #[test]
    fn test_to_args_mask_attack_with_charsets_and_increment() {
        let attack = attack_json(
            r#", "attack_mode": 3, "mask": "?1?1?1?d",
               "increment_mode": true, "increment_minimum": 4, "increment_maximum": 8,
               "custom_charset_1": "?l?u", "custom_charset_4": "?d?s""#,
        );
        let params = SessionParams::for_attack(
            Path::new("/usr/bin/hashcat"),
            &task(),
            &attack,
            &paths(),
            Duration::from_secs(10),
            Some("1,2".to_string()),
        );
        let joined = params.to_args().join(" ");
        assert!(joined.contains("-a 3"));
        assert!(joined.contains("--increment --increment-min 4 --increment-max 8"));
        assert!(joined.contains("-1 ?l?u"));
        assert!(joined.contains("-4 ?d?s"));
        assert!(!joined.contains("-2 "));
        assert!(joined.contains("-d 1,2"));
        assert!(joined.ends_with("?1?1?1?d"));
    }

    #[test]
    fn test_to_args_optimization_flags() {
        let attack = attack_json(r#", "optimized_kernels": true, "slow_candidate_generators": true"#);
        let params = SessionParams::for_attack(
            Path::new("/usr/bin/hashcat"),
            &task(),
            &attack,
            &paths(),
            Duration::from_secs(10),
            None,
        );
        let args = params.to_args();
        assert!(args.contains(&"-O".to_string()));
        assert!(args.contains(&"-S".to_string()));
    }

    #[test]
    fn test_benchmark_args_are_minimal() {
        let params = SessionParams::for_benchmark(Path::new("/usr/bin/hashcat"), &paths(), false, None);
        assert_eq!(params.to_args(), vec!["--benchmark", "--machine-readable"]);
    }

    #[test]
    fn test_benchmark_all_flag() {
        let params = SessionParams::for_benchmark(Path::new("/usr/bin/hashcat"), &paths(), true, None);
        assert!(params.to_args().contains(&"--benchmark-all".to_string()));
    }

    #[test]
    fn test_increment_requires_bounds() {
        let attack = attack_json(r#", "increment_mode": true, "increment_minimum": 2"#);
        let params = SessionParams::for_attack(
            Path::new("/usr/bin/hashcat"),
            &task(),
            &attack,
            &paths(),
            Duration::from_secs(10),
            None,
        );
        assert!(params.increment.is_none());
    }
}
