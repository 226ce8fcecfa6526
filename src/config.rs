//! Run-time flags and remembered toolchain paths.
//!
//! `Flags` holds everything the command line decides for one invocation.
//! `PathConfig` holds the paths that are tedious to type every time (Qt dir,
//! deployer, sysroot, cross toolchain prefix). Those are remembered in
//! `gibs.toml`, looked up in this order:
//!
//! 1. Values passed on the command line
//! 2. `./gibs.toml`
//! 3. `<config dir>/gibs/gibs.toml`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const PATH_CONFIG_FILE: &str = "gibs.toml";
pub const CACHE_FILE: &str = ".gibs.cache";

/// How hard the incremental check looks at a cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChecksumPolicy {
    /// Creation and modification timestamps only.
    #[default]
    Timestamps,
    /// Timestamps, then a content checksum comparison.
    Content,
}

#[derive(Debug, Clone)]
pub struct Flags {
    pub input_file: PathBuf,
    pub run: bool,
    pub clean: bool,
    pub quick_mode: bool,
    pub auto_includes: bool,
    pub parse_whole_files: bool,
    pub pipe: bool,
    pub debug_build: bool,
    pub checksums: ChecksumPolicy,
    /// Directory the tools run in and where intermediate artifacts land.
    pub work_dir: PathBuf,
    /// Directory the final targets are written to, relative to `work_dir`.
    pub prefix: PathBuf,
    pub jobs: usize,
    pub timeout: Option<Duration>,
    /// `-c` command string, applied to every build unit.
    pub commands: String,
    pub compiler_name: String,
    pub deployer_name: Option<String>,
    pub paths: PathConfig,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("main.cpp"),
            run: false,
            clean: false,
            quick_mode: false,
            auto_includes: false,
            parse_whole_files: false,
            pipe: false,
            debug_build: false,
            checksums: ChecksumPolicy::Timestamps,
            work_dir: PathBuf::from("."),
            prefix: PathBuf::from("."),
            jobs: detected_parallelism(),
            timeout: None,
            commands: String::new(),
            compiler_name: "gcc".to_string(),
            deployer_name: None,
            paths: PathConfig::default(),
        }
    }
}

impl Flags {
    pub fn release_build(&self) -> bool {
        !self.debug_build
    }

    /// Pipe mode needs the whole file in memory, so it implies whole-file parsing.
    pub fn set_pipe(&mut self, pipe: bool) {
        self.pipe = pipe;
        if pipe {
            self.parse_whole_files = true;
        }
    }

    /// Quick mode never looks at file contents.
    pub fn effective_checksums(&self) -> ChecksumPolicy {
        if self.quick_mode {
            ChecksumPolicy::Timestamps
        } else {
            self.checksums
        }
    }

    /// Directory of the entry file, the root every relative directive path hangs off.
    pub fn relative_path(&self) -> PathBuf {
        match self.input_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.work_dir.join(CACHE_FILE)
    }

    /// Resolves an artifact name (object file, generated source) against the work dir.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    pub fn qt_dir(&self) -> Option<&Path> {
        self.paths.qt_dir.as_deref()
    }
}

/// Toolchain paths remembered between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    pub qt_dir: Option<PathBuf>,
    pub deployer_path: Option<PathBuf>,
    pub sysroot: Option<PathBuf>,
    pub toolchain: Option<String>,
}

impl PathConfig {
    /// Loads the local config if present, otherwise the global one, otherwise defaults.
    pub fn load() -> Result<Self> {
        debug!("looking for gibs path config in current dir");
        let local = Path::new(PATH_CONFIG_FILE);
        if local.exists() {
            return Self::load_from(local);
        }

        if let Some(global) = global_config_path() {
            debug!(path = %global.display(), "looking for gibs path config");
            if global.exists() {
                return Self::load_from(&global);
            }
        }

        debug!("no path config found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Writes the remembered paths to the global config file.
    pub fn save(&self) -> Result<PathBuf> {
        let path = global_config_path().context("Could not find config directory")?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Fills every unset field from `other`.
    pub fn merge_missing(&mut self, other: PathConfig) {
        if self.qt_dir.is_none() {
            self.qt_dir = other.qt_dir;
        }
        if self.deployer_path.is_none() {
            self.deployer_path = other.deployer_path;
        }
        if self.sysroot.is_none() {
            self.sysroot = other.sysroot;
        }
        if self.toolchain.is_none() {
            self.toolchain = other.toolchain;
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gibs").join(PATH_CONFIG_FILE))
}

pub fn detected_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Turns the `-j` value into a job count.
///
/// A value of zero or below uses every available core. A fraction below one
/// is a share of the available cores (`-j 0.5` on 8 cores gives 4). Anything
/// else is rounded up.
pub fn resolve_jobs(value: f64, detected: usize) -> usize {
    if value <= 0.0 {
        detected.max(1)
    } else if value < 1.0 {
        ((detected as f64 * value).floor() as usize).max(1)
    } else {
        value.ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_jobs_fraction() {
        assert_eq!(resolve_jobs(0.5, 8), 4);
        assert_eq!(resolve_jobs(0.25, 8), 2);
    }

    #[test]
    fn test_resolve_jobs_zero_or_negative_uses_all_cores() {
        assert_eq!(resolve_jobs(0.0, 8), 8);
        assert_eq!(resolve_jobs(-2.0, 8), 8);
    }

    #[test]
    fn test_resolve_jobs_whole_numbers_round_up() {
        assert_eq!(resolve_jobs(3.0, 8), 3);
        assert_eq!(resolve_jobs(2.1, 8), 3);
        assert_eq!(resolve_jobs(1.0, 8), 1);
    }

    #[test]
    fn test_resolve_jobs_never_zero() {
        assert_eq!(resolve_jobs(0.1, 2), 1);
        assert_eq!(resolve_jobs(0.0, 0), 1);
    }

    #[test]
    fn test_pipe_implies_whole_files() {
        let mut flags = Flags::default();
        flags.set_pipe(true);
        assert!(flags.parse_whole_files);
    }

    #[test]
    fn test_quick_mode_disables_content_checks() {
        let mut flags = Flags {
            checksums: ChecksumPolicy::Content,
            ..Default::default()
        };
        assert_eq!(flags.effective_checksums(), ChecksumPolicy::Content);
        flags.quick_mode = true;
        assert_eq!(flags.effective_checksums(), ChecksumPolicy::Timestamps);
    }

    #[test]
    fn test_relative_path_of_bare_file_is_current_dir() {
        let flags = Flags {
            input_file: PathBuf::from("main.cpp"),
            ..Default::default()
        };
        assert_eq!(flags.relative_path(), PathBuf::from("."));

        let flags = Flags {
            input_file: PathBuf::from("../project/main.cpp"),
            ..Default::default()
        };
        assert_eq!(flags.relative_path(), PathBuf::from("../project"));
    }

    #[test]
    fn test_path_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gibs").join(PATH_CONFIG_FILE);
        let config = PathConfig {
            qt_dir: Some(PathBuf::from("/opt/qt/5.15/gcc_64")),
            toolchain: Some("arm-linux-gnueabihf-".to_string()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(PathConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_merge_missing_keeps_explicit_values() {
        let mut cli = PathConfig {
            qt_dir: Some(PathBuf::from("/cli/qt")),
            ..Default::default()
        };
        cli.merge_missing(PathConfig {
            qt_dir: Some(PathBuf::from("/saved/qt")),
            sysroot: Some(PathBuf::from("/saved/sysroot")),
            ..Default::default()
        });
        assert_eq!(cli.qt_dir, Some(PathBuf::from("/cli/qt")));
        assert_eq!(cli.sysroot, Some(PathBuf::from("/saved/sysroot")));
    }
}
