//! The build graph: every unit of one invocation, keyed by id.
//!
//! The graph is the host units talk to while they derive work. It hands
//! tasks to the scheduler, creates and starts subprojects on request and
//! keeps the feature states declared so far, so units created later see them.
//!
//! A run is either cold (parse everything from the entry file) or hydrated
//! (units restored from `.gibs.cache`, each checking its own records).

use super::cache::{CacheDocument, UnitRecord};
use super::launcher::Launcher;
use super::scheduler::{RunReport, Scheduler};
use super::task::{Task, TaskId};
use super::unit::{BaseConfig, BuildUnit, SubprojectInfo, UnitHost, UnitId};
use super::{BuildContext, BuildError, join_rel};
use crate::feature::{Feature, FeatureSet};
use crate::parser::TargetKind;
use indicatif::ProgressBar;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct BuildGraph {
    ctx: Arc<BuildContext>,
    base: BaseConfig,
    features: FeatureSet,
    units: BTreeMap<UnitId, BuildUnit>,
    root: UnitId,
    scheduler: Scheduler,
    hydrated: bool,
    started: HashSet<UnitId>,
    in_progress: Vec<UnitId>,
}

impl BuildGraph {
    pub fn new(ctx: BuildContext, features: FeatureSet) -> Result<Self, BuildError> {
        let mut base = BaseConfig::from_commands(&ctx.flags.commands)?;
        if ctx.flags.auto_includes {
            let found = discover_include_dirs(&ctx.flags.relative_path());
            debug!(count = found.len(), "auto include directories");
            base.includes.extend(found);
        }

        let root = UnitId::from_name(&entry_name(&ctx));
        let scheduler = Scheduler::new(ctx.flags.jobs);

        Ok(Self {
            ctx: Arc::new(ctx),
            base,
            features,
            units: BTreeMap::new(),
            root,
            scheduler,
            hydrated: false,
            started: HashSet::new(),
            in_progress: Vec::new(),
        })
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn root(&self) -> &UnitId {
        &self.root
    }

    pub fn unit(&self, id: &UnitId) -> Option<&BuildUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> impl Iterator<Item = &BuildUnit> {
        self.units.values()
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn set_progress(&mut self, progress: ProgressBar) {
        self.scheduler.set_progress(progress);
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn parse_errors(&self) -> Vec<String> {
        self.units
            .values()
            .flat_map(|u| u.parse_errors().iter().cloned())
            .collect()
    }

    /// Where the entry unit's application ends up, if it is one.
    pub fn root_target(&self) -> Option<PathBuf> {
        let unit = self.units.get(&self.root)?;
        if unit.target_kind() != TargetKind::Application {
            return None;
        }
        let flags = &self.ctx.flags;
        Some(flags.work_dir.join(join_rel(&flags.prefix, unit.target_name())))
    }

    /// Restores units from the cache file. Any problem is a cache miss.
    pub fn load_cache(&mut self) -> bool {
        let path = self.ctx.flags.cache_path();
        if !path.exists() {
            debug!(path = %path.display(), "no cache, cold run");
            return false;
        }

        let document = match CacheDocument::load(&path) {
            Ok(document) => document,
            Err(e) => {
                warn!("{}, falling back to a cold run", e);
                return false;
            }
        };
        if document.input_file != self.ctx.flags.input_file {
            info!(
                cached = %document.input_file.display(),
                "cache belongs to another entry file, cold run"
            );
            return false;
        }

        let known: HashSet<UnitId> = document.units.iter().map(|u| u.id.clone()).collect();
        if !known.contains(&self.root) {
            warn!("cache has no unit for the entry file, cold run");
            return false;
        }

        if self.ctx.flags.paths.qt_dir.is_none()
            && let Some(qt_dir) = &document.qt_dir
        {
            debug!(qt_dir = %qt_dir.display(), "using the Qt dir of the last run");
            let mut ctx = BuildContext::clone(&self.ctx);
            ctx.flags.paths.qt_dir = Some(qt_dir.clone());
            self.ctx = Arc::new(ctx);
        }

        self.units.clear();
        for mut record in document.units {
            record.dependencies.retain(|dep| {
                let found = known.contains(dep);
                if !found {
                    warn!(unit = %record.name, dependency = %dep, "dropping unknown dependency");
                }
                found
            });

            let mut unit = record.into_unit(self.ctx.clone(), self.features.clone());
            // `-c` may differ from the last run
            unit.enable_modules(&self.base.modules);
            unit.add_defines(&self.base.defines);
            unit.add_includes(&self.base.includes);
            unit.add_libs(&self.base.libs);
            self.units.insert(unit.id().clone(), unit);
        }

        info!(units = self.units.len(), "restored build units from cache");
        self.hydrated = true;
        true
    }

    /// Derives every task of this run. Configuration errors stop here,
    /// before anything is scheduled.
    pub fn start(&mut self) -> Result<(), BuildError> {
        self.started.clear();
        self.in_progress.clear();

        let root = self.root.clone();
        if self.hydrated {
            let ids: Vec<UnitId> = self.units.keys().cloned().collect();
            for id in ids {
                self.start_unit(&id, true)?;
            }
        } else {
            self.units.clear();
            let name = entry_name(&self.ctx);
            let unit = BuildUnit::new(
                &name,
                &self.ctx.flags.relative_path(),
                self.ctx.clone(),
                &self.base,
                self.features.clone(),
            );
            self.units.insert(root.clone(), unit);
            self.start_unit(&root, false)?;
        }

        if let Some(message) = self.units.values().find_map(|u| u.fatal_error()) {
            return Err(BuildError::configuration(message));
        }

        info!(
            units = self.units.len(),
            tasks = self.scheduler.len(),
            hydrated = self.hydrated,
            "build derived"
        );
        Ok(())
    }

    fn start_unit(&mut self, id: &UnitId, from_cache: bool) -> Result<(), BuildError> {
        if self.started.contains(id) {
            return Ok(());
        }
        if self.in_progress.contains(id) {
            return Err(BuildError::configuration(format!(
                "subproject cycle: unit {} is already being started",
                id
            )));
        }

        self.in_progress.push(id.clone());
        let result = self.start_unit_inner(id, from_cache);
        self.in_progress.pop();
        result
    }

    fn start_unit_inner(&mut self, id: &UnitId, from_cache: bool) -> Result<(), BuildError> {
        // Restored units start their dependencies first
        if from_cache {
            let dependencies = self
                .units
                .get(id)
                .map(|u| u.dependencies().to_vec())
                .unwrap_or_default();
            for dependency in dependencies {
                self.start_unit(&dependency, true)?;
            }
        }

        let Some(mut unit) = self.units.remove(id) else {
            return Err(BuildError::configuration(format!("unknown build unit {}", id)));
        };
        debug!(unit = %unit.name(), from_cache, "starting unit");
        unit.start(from_cache, self);
        self.started.insert(id.clone());
        self.units.insert(id.clone(), unit);
        Ok(())
    }

    /// Runs the derived tasks and saves the cache, whatever the outcome.
    pub async fn build<L: Launcher>(&mut self, launcher: &L) -> Result<RunReport, BuildError> {
        let result = self.scheduler.run(launcher).await;
        self.save_cache()?;
        result
    }

    pub fn save_cache(&self) -> Result<(), BuildError> {
        let mut document = CacheDocument::new(&self.ctx.flags.input_file, self.ctx.flags.qt_dir());
        document.units = self.units.values().map(UnitRecord::from_unit).collect();
        document.save(&self.ctx.flags.cache_path())
    }

    /// Removes every artifact of every unit and the cache file.
    ///
    /// Without a cache the sources are parsed first so the artifact names are known.
    pub fn clean(&mut self) -> Result<usize, BuildError> {
        if !self.hydrated
            && let Err(e) = self.start()
        {
            warn!("{}, cleaning what could be discovered", e);
        }

        let mut removed = 0;
        for unit in self.units.values_mut() {
            removed += unit.clean();
        }
        self.scheduler = Scheduler::new(self.ctx.flags.jobs);

        let cache = self.ctx.flags.cache_path();
        match fs::remove_file(&cache) {
            Ok(()) => debug!(path = %cache.display(), "cache removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(removed, "clean finished");
        Ok(removed)
    }

    fn owned_by(&self, dependencies: &[UnitId], path: &Path, seen: &mut HashSet<UnitId>) -> bool {
        dependencies.iter().any(|id| {
            if !seen.insert(id.clone()) {
                return false;
            }
            self.units
                .get(id)
                .is_some_and(|u| u.owns_file(path) || self.owned_by(u.dependencies(), path, seen))
        })
    }
}

impl UnitHost for BuildGraph {
    fn submit(&mut self, task: Task) -> TaskId {
        self.scheduler.submit(task)
    }

    fn subproject(&mut self, parent: &BuildUnit, path: &str) -> Result<SubprojectInfo, BuildError> {
        let name = normalize(&join_rel(parent.relative_path(), path))
            .display()
            .to_string();
        let id = UnitId::from_name(&name);
        if id == *parent.id() || self.in_progress.contains(&id) {
            return Err(BuildError::configuration(format!(
                "subproject cycle: '{}' depends on itself",
                name
            )));
        }

        let dir = match Path::new(path).parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.display().to_string(),
            _ => ".".to_string(),
        };

        if !self.units.contains_key(&id) {
            let relative = normalize(&join_rel(parent.relative_path(), &dir));
            info!(parent = %parent.name(), subproject = %name, "creating subproject");
            let unit = BuildUnit::new(
                &name,
                &relative,
                self.ctx.clone(),
                &self.base,
                self.features.clone(),
            );
            self.units.insert(id.clone(), unit);
            self.start_unit(&id, false)?;
        } else {
            self.start_unit(&id, self.hydrated)?;
        }

        let Some(child) = self.units.get(&id) else {
            return Err(BuildError::configuration(format!("subproject '{}' vanished", name)));
        };
        if let Some(message) = child.fatal_error() {
            return Err(BuildError::configuration(message));
        }

        let mut includes: Vec<String> = Vec::new();
        for include in child.includes().iter().map(String::as_str).chain(["."]) {
            let relative = join_rel(Path::new(&dir), include).display().to_string();
            if !includes.contains(&relative) {
                includes.push(relative);
            }
        }

        Ok(SubprojectInfo {
            id,
            target_name: child.target_name().to_string(),
            includes,
        })
    }

    fn owned_by_dependency(&self, dependencies: &[UnitId], path: &Path) -> bool {
        self.owned_by(dependencies, path, &mut HashSet::new())
    }

    fn feature_declared(&mut self, feature: &Feature) {
        self.features
            .entry(feature.name.clone())
            .and_modify(|known| known.defined = true)
            .or_insert_with(|| feature.clone());
    }

    // Objects share the work dir, so two units may write the same name
    fn produced_elsewhere(&self, unit: &UnitId, output: &str) -> Vec<TaskId> {
        self.scheduler
            .tasks()
            .filter(|(_, task)| task.unit != *unit && task.output == output)
            .map(|(id, _)| id)
            .collect()
    }
}

fn entry_name(ctx: &BuildContext) -> String {
    ctx.flags.input_file.display().to_string()
}

/// Resolves `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Every directory below `root`, relative to it. Hidden directories are skipped.
fn discover_include_dirs(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.display().to_string())
        })
        .collect()
}
