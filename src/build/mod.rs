pub mod cache;
pub mod error;
pub mod graph;
pub mod launcher;
pub mod modules;
pub mod record;
pub mod scheduler;
pub mod task;
pub mod unit;

pub use error::BuildError;
pub use graph::BuildGraph;
pub use launcher::{Launcher, SystemLauncher};
pub use scheduler::RunReport;

use crate::config::Flags;
use crate::toolchain::{
    CompilerProfile, DeployerProfile, find_compiler, find_deployer, find_deployer_executable,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything read-only a build needs: the run flags and the resolved tool profiles.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub flags: Flags,
    pub compiler: CompilerProfile,
    pub deployer: Option<DeployerProfile>,
}

impl BuildContext {
    pub fn new(flags: Flags) -> Result<Self, BuildError> {
        let mut compiler = find_compiler(&flags.compiler_name)?;
        if let Some(prefix) = &flags.paths.toolchain {
            compiler.toolchain_prefix = Some(prefix.clone());
        }

        let deployer = match &flags.deployer_name {
            Some(name) => {
                let mut deployer = find_deployer(name)?;
                let executable = find_deployer_executable(
                    &deployer,
                    flags.paths.deployer_path.as_deref(),
                    flags.qt_dir(),
                )?;
                debug!(deployer = %name, executable = %executable.display(), "deployer resolved");
                deployer.executable = Some(executable);
                Some(deployer)
            }
            None => None,
        };

        Ok(Self {
            flags,
            compiler,
            deployer,
        })
    }
}

/// Joins a directive path onto a unit directory, keeping `.` out of the result.
pub(crate) fn join_rel(base: &Path, path: &str) -> PathBuf {
    if path.is_empty() || path == "." {
        return base.to_path_buf();
    }
    if base.as_os_str().is_empty() || base == Path::new(".") {
        return PathBuf::from(path);
    }
    base.join(path)
}
