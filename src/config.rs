//! Configuration file parsing (spec §6). A line-oriented, whitespace-split
//! directive parser in the teacher's style (`redis/config.rs`): one `match`
//! arm per directive with an explicit arity check, failing fast with the
//! offending line number on a malformed directive.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::aof::AppendFsync;
use crate::eviction::EvictionPolicy;
use crate::resp::Limits;

pub struct Config {
    pub listen_addr: String,
    pub dir: PathBuf,
    pub db_filename: String,
    pub append_filename: String,
    pub append_only: bool,
    pub append_fsync: AppendFsync,
    pub save_rules: Vec<(u64, u64)>,
    pub requirepass: Option<String>,
    pub max_memory: usize,
    pub max_memory_policy: EvictionPolicy,
    pub max_memory_samples: usize,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:6379".to_string(),
            dir: PathBuf::from("."),
            db_filename: "dump.rdb".to_string(),
            append_filename: "appendonly.aof".to_string(),
            append_only: false,
            append_fsync: AppendFsync::EverySec,
            save_rules: Vec::new(),
            requirepass: None,
            max_memory: 0,
            max_memory_policy: EvictionPolicy::NoEviction,
            max_memory_samples: 50,
            limits: Limits::default(),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("can't open config file {}", path.display()))?;
        let mut cfg = Config::default();

        for (line_num, raw_line) in text.lines().enumerate() {
            let line_num = line_num + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let argv: Vec<&str> = line.split_whitespace().collect();
            let directive = argv[0].to_ascii_lowercase();
            let argc = argv.len();

            let fatal = |msg: String| -> anyhow::Error {
                anyhow::anyhow!("config file error at line {line_num} ('{line}'): {msg}")
            };

            match (directive.as_str(), argc) {
                ("dir", 2) => cfg.dir = PathBuf::from(argv[1]),
                ("dbfilename", 2) => cfg.db_filename = argv[1].to_string(),
                ("appendfilename", 2) => cfg.append_filename = argv[1].to_string(),
                ("appendonly", 2) => {
                    cfg.append_only = yes_no_to_bool(argv[1])
                        .ok_or_else(|| fatal("expected yes or no".into()))?;
                }
                ("appendfsync", 2) => {
                    cfg.append_fsync = AppendFsync::parse(argv[1])
                        .ok_or_else(|| fatal(format!("unknown appendfsync policy '{}'", argv[1])))?;
                }
                ("save", 3) => {
                    let secs: u64 = argv[1].parse().map_err(|_| fatal("invalid save seconds".into()))?;
                    let changes: u64 = argv[2].parse().map_err(|_| fatal("invalid save changes".into()))?;
                    if secs == 0 {
                        bail!(fatal("save period must be at least 1 second".into()));
                    }
                    cfg.save_rules.push((secs, changes));
                }
                ("requirepass", 2) => cfg.requirepass = Some(argv[1].to_string()),
                ("maxmemory", 2) => {
                    cfg.max_memory =
                        parse_memory_size(argv[1]).ok_or_else(|| fatal("invalid maxmemory value".into()))?;
                }
                ("maxmemory-policy", 2) => {
                    cfg.max_memory_policy = EvictionPolicy::parse(argv[1])
                        .ok_or_else(|| fatal(format!("unknown maxmemory-policy '{}'", argv[1])))?;
                }
                ("maxmemory-samples", 2) => {
                    cfg.max_memory_samples = argv[1]
                        .parse()
                        .map_err(|_| fatal("invalid maxmemory-samples".into()))?;
                }
                ("max-bulk-size", 2) => {
                    cfg.limits.max_bulk_size =
                        parse_memory_size(argv[1]).ok_or_else(|| fatal("invalid max-bulk-size".into()))?;
                }
                ("max-command-size", 2) => {
                    cfg.limits.max_command_size =
                        parse_memory_size(argv[1]).ok_or_else(|| fatal("invalid max-command-size".into()))?;
                }
                ("max-command-args", 2) => {
                    cfg.limits.max_command_args = argv[1]
                        .parse()
                        .map_err(|_| fatal("invalid max-command-args".into()))?;
                }
                (unknown, _) => {
                    bail!(fatal(format!("unknown or malformed directive '{unknown}'")));
                }
            }
        }

        Ok(cfg)
    }
}

fn yes_no_to_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

/// Parses a `maxmemory`-style size with an optional `b|kb|mb|gb` suffix
/// (spec §6). Bare numbers are bytes.
fn parse_memory_size(s: &str) -> Option<usize> {
    let lower = s.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(prefix) = lower.strip_suffix("gb") {
        (prefix, 1024 * 1024 * 1024)
    } else if let Some(prefix) = lower.strip_suffix("mb") {
        (prefix, 1024 * 1024)
    } else if let Some(prefix) = lower.strip_suffix("kb") {
        (prefix, 1024)
    } else if let Some(prefix) = lower.strip_suffix('b') {
        (prefix, 1)
    } else {
        (lower.as_str(), 1)
    };
    digits.trim().parse::<usize>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_size_suffixes() {
        assert_eq!(parse_memory_size("100"), Some(100));
        assert_eq!(parse_memory_size("1kb"), Some(1024));
        assert_eq!(parse_memory_size("2mb"), Some(2 * 1024 * 1024));
        assert_eq!(parse_memory_size("1gb"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_size("bogus"), None);
    }

    #[test]
    fn parses_recognized_directives() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file, "dir /tmp/rredis").unwrap();
        writeln!(file, "appendonly yes").unwrap();
        writeln!(file, "appendfsync always").unwrap();
        writeln!(file, "save 60 1000").unwrap();
        writeln!(file, "save 300 10").unwrap();
        writeln!(file, "requirepass hunter2").unwrap();
        writeln!(file, "maxmemory 1mb").unwrap();
        writeln!(file, "maxmemory-policy allkeys-lru").unwrap();
        file.flush().unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.dir, PathBuf::from("/tmp/rredis"));
        assert!(cfg.append_only);
        assert_eq!(cfg.append_fsync, AppendFsync::Always);
        assert_eq!(cfg.save_rules, vec![(60, 1000), (300, 10)]);
        assert_eq!(cfg.requirepass.as_deref(), Some("hunter2"));
        assert_eq!(cfg.max_memory, 1024 * 1024);
        assert_eq!(cfg.max_memory_policy, EvictionPolicy::AllKeysLru);
    }

    #[test]
    fn rejects_unknown_directive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "totally-bogus-directive value").unwrap();
        file.flush().unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
