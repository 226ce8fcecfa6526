use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which kind of JSON tool description to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Compiler,
    Deployer,
}

impl ToolKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ToolKind::Compiler => "compilers",
            ToolKind::Deployer => "deployers",
        }
    }
}

/// Describes a compiler, linker and archiver triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerProfile {
    /// Profile name (e.g., "gcc")
    pub name: String,
    /// C++ compiler binary
    pub compiler: String,
    /// C compiler binary
    pub c_compiler: String,
    /// Flags passed to every compile
    pub flags: Vec<String>,
    pub debug_flags: Vec<String>,
    pub release_flags: Vec<String>,

    pub linker: String,
    pub linker_flags: Vec<String>,
    pub linker_debug_flags: Vec<String>,
    pub linker_release_flags: Vec<String>,

    pub static_archiver: String,
    pub archiver_flags: Vec<String>,

    pub library_prefix: String,
    pub library_suffix: String,
    pub static_library_suffix: String,

    /// Cross toolchain prefix (e.g., "arm-linux-gnueabihf-")
    pub toolchain_prefix: Option<String>,
}

impl Default for CompilerProfile {
    fn default() -> Self {
        Self::gcc()
    }
}

impl CompilerProfile {
    pub fn gcc() -> Self {
        Self {
            name: "gcc".to_string(),
            compiler: "g++".to_string(),
            c_compiler: "gcc".to_string(),
            flags: ["-c", "-pipe", "-D_REENTRANT", "-fPIC", "-Wall", "-W"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debug_flags: vec!["-g".to_string()],
            release_flags: vec!["-O2".to_string()],
            linker: "g++".to_string(),
            linker_flags: Vec::new(),
            linker_debug_flags: Vec::new(),
            linker_release_flags: vec!["-Wl,-O1".to_string()],
            static_archiver: "ar".to_string(),
            archiver_flags: vec!["rcs".to_string()],
            library_prefix: "lib".to_string(),
            library_suffix: ".so".to_string(),
            static_library_suffix: ".a".to_string(),
            toolchain_prefix: None,
        }
    }

    pub fn clang() -> Self {
        Self {
            name: "clang".to_string(),
            compiler: "clang++".to_string(),
            c_compiler: "clang".to_string(),
            linker: "clang++".to_string(),
            ..Self::gcc()
        }
    }

    fn prefixed(&self, binary: &str) -> String {
        match &self.toolchain_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}{}", prefix, binary),
            _ => binary.to_string(),
        }
    }

    /// Compiler binary for a source file, picked by extension.
    pub fn compiler_for(&self, file: &str) -> String {
        if file.ends_with(".c") {
            self.prefixed(&self.c_compiler)
        } else {
            self.prefixed(&self.compiler)
        }
    }

    pub fn linker_binary(&self) -> String {
        self.prefixed(&self.linker)
    }

    pub fn archiver_binary(&self) -> String {
        self.prefixed(&self.static_archiver)
    }

    /// `libfoo.a`
    pub fn static_library_name(&self, target: &str) -> String {
        format!(
            "{}{}{}",
            self.library_prefix, target, self.static_library_suffix
        )
    }

    /// `libfoo.so`
    pub fn dynamic_library_name(&self, target: &str) -> String {
        format!("{}{}{}", self.library_prefix, target, self.library_suffix)
    }
}

/// Describes a deployment tool (e.g., linuxdeployqt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerProfile {
    pub name: String,
    /// Suffix of the produced package
    pub suffix: String,
    pub flags: Vec<String>,
    /// Resolved executable, filled by `find_deployer_executable`
    #[serde(skip)]
    pub executable: Option<PathBuf>,
}

impl Default for DeployerProfile {
    fn default() -> Self {
        Self {
            name: "linuxdeployqt".to_string(),
            suffix: "AppImage".to_string(),
            flags: [
                "-verbose=1",
                "-no-translations",
                "-no-copy-copyright-files",
                "-appimage",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            executable: None,
        }
    }
}

/// Error type for toolchain lookups
#[derive(Debug)]
pub enum ToolchainError {
    /// No profile with that name
    ProfileNotFound { kind: ToolKind, name: String },
    /// Profile file exists but is not valid JSON
    InvalidProfile { path: PathBuf, message: String },
    /// Deployer executable could not be located
    ExecutableNotFound(String),
    /// IO error
    IoError(std::io::Error),
}

impl std::fmt::Display for ToolchainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolchainError::ProfileNotFound { kind, name } => write!(
                f,
                "Could not find {} named '{}' in $HOME/.gibs/{} nor in the built-in set",
                match kind {
                    ToolKind::Compiler => "compiler",
                    ToolKind::Deployer => "deployer",
                },
                name,
                kind.dir_name()
            ),
            ToolchainError::InvalidProfile { path, message } => {
                write!(f, "Invalid tool profile {}: {}", path.display(), message)
            }
            ToolchainError::ExecutableNotFound(name) => {
                write!(f, "Deployer executable '{}' not found", name)
            }
            ToolchainError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ToolchainError {}

impl From<std::io::Error> for ToolchainError {
    fn from(e: std::io::Error) -> Self {
        ToolchainError::IoError(e)
    }
}
