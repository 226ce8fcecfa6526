//! Toolchain descriptions
//!
//! Compilers and deployers are described by small JSON files. gibs looks for
//! `$HOME/.gibs/compilers/<name>.json` (or `deployers/`) first and falls back
//! to the built-in profiles. The build engine only reads these descriptions
//! when it assembles command lines.

pub mod types;

pub use types::{CompilerProfile, DeployerProfile, ToolKind, ToolchainError};

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory holding user-provided tool descriptions
fn user_profile_dir(kind: ToolKind) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".gibs").join(kind.dir_name()))
}

/// Look up a compiler profile by name
pub fn find_compiler(name: &str) -> Result<CompilerProfile, ToolchainError> {
    find_compiler_in(name, user_profile_dir(ToolKind::Compiler).as_deref())
}

pub fn find_compiler_in(
    name: &str,
    user_dir: Option<&Path>,
) -> Result<CompilerProfile, ToolchainError> {
    if let Some(path) = user_dir.map(|dir| dir.join(format!("{}.json", name)))
        && path.exists()
    {
        return load_profile(&path);
    }

    match name {
        "gcc" => Ok(CompilerProfile::gcc()),
        "clang" => Ok(CompilerProfile::clang()),
        _ => Err(ToolchainError::ProfileNotFound {
            kind: ToolKind::Compiler,
            name: name.to_string(),
        }),
    }
}

/// Look up a deployer profile by name
pub fn find_deployer(name: &str) -> Result<DeployerProfile, ToolchainError> {
    find_deployer_in(name, user_profile_dir(ToolKind::Deployer).as_deref())
}

pub fn find_deployer_in(
    name: &str,
    user_dir: Option<&Path>,
) -> Result<DeployerProfile, ToolchainError> {
    if let Some(path) = user_dir.map(|dir| dir.join(format!("{}.json", name)))
        && path.exists()
    {
        return load_profile(&path);
    }

    let builtin = DeployerProfile::default();
    if name == builtin.name {
        Ok(builtin)
    } else {
        Err(ToolchainError::ProfileNotFound {
            kind: ToolKind::Deployer,
            name: name.to_string(),
        })
    }
}

fn load_profile<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ToolchainError> {
    debug!(path = %path.display(), "loading tool profile");
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| ToolchainError::InvalidProfile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Resolve the deployer executable.
///
/// Order: the user-provided path, then `<qt dir>/bin/<name>`, then `$PATH`.
pub fn find_deployer_executable(
    deployer: &DeployerProfile,
    user_provided: Option<&Path>,
    qt_dir: Option<&Path>,
) -> Result<PathBuf, ToolchainError> {
    if let Some(path) = user_provided {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "deployer executable does not exist");
    }

    if let Some(qt) = qt_dir {
        let exec = qt.join("bin").join(&deployer.name);
        if exec.is_file() {
            return Ok(exec);
        }
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let exec = dir.join(&deployer.name);
            if exec.is_file() {
                return Ok(exec);
            }
        }
    }

    Err(ToolchainError::ExecutableNotFound(deployer.name.clone()))
}
