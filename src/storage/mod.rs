//! Platform-neutral file access plus the two persistence shapes the pipeline
//! uses: hive-partitioned parquet datasets and small JSON documents.
//!
//! The core only ever talks to [`Platform`]; `PLATFORM=local` selects the
//! in-tree filesystem backend rooted at `DATA_DIR`. An object-store backend
//! plugs in at the same seam.

pub mod dataset;
pub mod docstore;

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::util::env::{env_opt, env_parse};

/// Minimal file-system surface the pipeline needs. Paths are relative,
/// `/`-separated, and rooted at the backend's data root.
pub trait Platform: Send + Sync {
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
    fn exists(&self, path: &str) -> bool;
    fn makedirs(&self, path: &str) -> Result<()>;
    /// Names (not paths) of a directory's entries; empty when absent.
    fn list_dir(&self, path: &str) -> Result<Vec<String>>;
    /// Relative paths matching a pattern where `*` spans one path segment
    /// and `**` spans any number.
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;
    fn delete(&self, path: &str) -> Result<()>;
}

/// Select the backend from `PLATFORM` (default `local`).
pub fn platform_from_env() -> Result<Arc<dyn Platform>> {
    let kind = env_parse("PLATFORM", "local".to_string());
    match kind.as_str() {
        "local" => {
            let root = env_opt("DATA_DIR")
                .or_else(|| env_opt("PROJECT").map(|p| format!("./{p}")))
                .unwrap_or_else(|| "./data".to_string());
            Ok(Arc::new(LocalPlatform::new(root)))
        }
        other => bail!("unsupported PLATFORM {other:?}; only \"local\" is built in"),
    }
}

/// Local-disk backend. All relative paths resolve under `root`.
#[derive(Debug, Clone)]
pub struct LocalPlatform {
    root: PathBuf,
}

impl LocalPlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn glob_walk(&self, dir: &Path, segments: &[&str], prefix: &str, out: &mut Vec<String>) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        if *head == "**" {
            // `**` matches zero segments here, or descends and stays greedy.
            self.glob_walk(dir, rest, prefix, out);
            for entry in entries.flatten() {
                let child = entry.path();
                if child.is_dir() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let rel = if prefix.is_empty() {
                        name
                    } else {
                        format!("{prefix}/{name}")
                    };
                    self.glob_walk(&child, segments, &rel, out);
                }
            }
            return;
        }
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let child = entry.path();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            if segment_matches(head, &name) {
                if rest.is_empty() {
                    if child.is_file() {
                        out.push(rel);
                    }
                } else if child.is_dir() {
                    self.glob_walk(&child, rest, &rel, out);
                }
            }
        }
    }
}

fn segment_matches(pattern: &str, name: &str) -> bool {
    // Only `*` wildcards, possibly several per segment.
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(stripped) = rest.strip_prefix(part) else {
                return false;
            };
            rest = stripped;
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            let Some(idx) = rest.find(part) else {
                return false;
            };
            rest = &rest[idx + part.len()..];
        }
    }
    true
}

impl Platform for LocalPlatform {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)).with_context(|| format!("reading {path}"))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating parent of {path}"))?;
        }
        fs::write(&full, bytes).with_context(|| format!("writing {path}"))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn makedirs(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)).with_context(|| format!("creating {path}"))
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let full = self.resolve(path);
        if !full.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&full)
            .with_context(|| format!("listing {path}"))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(anyhow!("empty glob pattern"));
        }
        let mut out = Vec::new();
        self.glob_walk(&self.root.clone(), &segments, "", &mut out);
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        if full.is_dir() {
            fs::remove_dir_all(&full).with_context(|| format!("deleting {path}"))
        } else if full.exists() {
            fs::remove_file(&full).with_context(|| format!("deleting {path}"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_bytes_and_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        platform.write("metadata/doc.json", b"{}").unwrap();
        assert!(platform.exists("metadata/doc.json"));
        assert_eq!(platform.read("metadata/doc.json").unwrap(), b"{}");
        assert_eq!(platform.list_dir("metadata").unwrap(), vec!["doc.json"]);
        assert!(platform.list_dir("nope").unwrap().is_empty());
    }

    #[test]
    fn glob_matches_partition_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        platform
            .write("out/title=Tosca/date=2026-09-10/part.parquet", b"x")
            .unwrap();
        platform
            .write("out/title=Aida/date=2026-09-11/part.parquet", b"x")
            .unwrap();

        let hits = platform.glob("out/title=*/date=*/*.parquet").unwrap();
        assert_eq!(hits.len(), 2);

        let deep = platform.glob("out/**/*.parquet").unwrap();
        assert_eq!(deep.len(), 2);

        let tosca = platform.glob("out/title=Tosca/**/*.parquet").unwrap();
        assert_eq!(tosca.len(), 1);
        assert!(tosca[0].contains("Tosca"));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LocalPlatform::new(dir.path());
        platform.write("a/b.txt", b"x").unwrap();
        platform.delete("a").unwrap();
        platform.delete("a").unwrap();
        assert!(!platform.exists("a"));
    }
}
