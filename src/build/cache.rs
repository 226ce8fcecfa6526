//! The persisted cache (`.gibs.cache`, JSON).

use super::record::FileRecord;
use super::unit::{BuildUnit, UnitId};
use super::{BuildContext, BuildError};
use crate::feature::FeatureSet;
use crate::parser::{Linkage, TargetKind};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub name: String,
    pub relative_path: PathBuf,
    pub target_name: String,
    pub kind: TargetKind,
    pub linkage: Linkage,
    pub version: Version,
    pub dependencies: Vec<UnitId>,
    pub modules: Vec<String>,
    pub defines: Vec<String>,
    pub includes: Vec<String>,
    pub libs: Vec<String>,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDocument {
    pub format_version: u32,
    pub input_file: PathBuf,
    pub qt_dir: Option<PathBuf>,
    pub units: Vec<UnitRecord>,
}

impl CacheDocument {
    pub fn new(input_file: &Path, qt_dir: Option<&Path>) -> Self {
        Self {
            format_version: CACHE_FORMAT_VERSION,
            input_file: input_file.to_path_buf(),
            qt_dir: qt_dir.map(Path::to_path_buf),
            units: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let content = fs::read_to_string(path)
            .map_err(|e| BuildError::Cache(format!("{}: {}", path.display(), e)))?;
        let document: CacheDocument = serde_json::from_str(&content)
            .map_err(|e| BuildError::Cache(format!("{}: {}", path.display(), e)))?;

        if document.format_version != CACHE_FORMAT_VERSION {
            return Err(BuildError::Cache(format!(
                "unsupported cache format {} (expected {})",
                document.format_version, CACHE_FORMAT_VERSION
            )));
        }

        debug!(path = %path.display(), units = document.units.len(), "cache loaded");
        Ok(document)
    }

    pub fn save(&self, path: &Path) -> Result<(), BuildError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::Cache(e.to_string()))?;
        fs::write(path, content)?;
        info!(path = %path.display(), units = self.units.len(), "cache saved");
        Ok(())
    }
}

impl UnitRecord {
    pub fn from_unit(unit: &BuildUnit) -> Self {
        Self {
            id: unit.id().clone(),
            name: unit.name().to_string(),
            relative_path: unit.relative_path().to_path_buf(),
            target_name: unit.target_name().to_string(),
            kind: unit.target_kind(),
            linkage: unit.linkage(),
            version: unit.version().clone(),
            dependencies: unit.dependencies().to_vec(),
            modules: unit.modules().to_vec(),
            defines: unit.defines().to_vec(),
            includes: unit.includes().to_vec(),
            libs: unit.libs().to_vec(),
            files: unit.files().values().cloned().collect(),
        }
    }

    /// Rebuilds the unit. Dependency ids are kept as stored; the graph
    /// drops the ones that do not resolve.
    pub fn into_unit(self, ctx: Arc<BuildContext>, features: FeatureSet) -> BuildUnit {
        let mut unit = BuildUnit::empty(self.id, &self.name, &self.relative_path, ctx, features);
        unit.restore(
            &self.target_name,
            self.kind,
            self.linkage,
            self.version,
            self.dependencies,
        );
        unit.enable_modules(&self.modules);
        unit.add_defines(&self.defines);
        unit.add_includes(&self.includes);
        unit.add_libs(&self.libs);

        let files = unit.files_mut();
        for record in self.files {
            files.insert(record.path.clone(), record);
        }
        unit
    }
}
