//! A build unit: one target with its directives, files and queued tasks.
//!
//! The unit owns everything it learns while parsing. Work is handed to the
//! scheduler through [`UnitHost::submit`]; the unit only remembers the ids
//! and declared outputs of what it queued, so later tasks can depend on them.
//!
//! ## Incremental start
//!
//! A unit restored from the cache checks every record:
//!
//! 1. Source changed: parse it again (or rerun rcc for resources)
//! 2. Object file missing: compile again
//! 3. Generated object missing: recompile the generated source, or
//!    regenerate it first when it is gone too

use super::modules::{ModuleFlags, module_flags};
use super::record::{FileKind, FileRecord, FileState, FileStore, file_state, file_times};
use super::task::{Task, TaskId};
use super::{BuildContext, BuildError, join_rel};
use crate::feature::{Feature, FeatureSet};
use crate::parser::{
    DirectiveEvent, DirectiveReader, Linkage, ParseError, ParseOptions, ParsedFile, TargetKind,
    parse_commands,
};
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const MOC_PREDEFS: &str = "moc_predefs.h";
const SOURCE_EXTENSIONS: [&str; 4] = ["cpp", "c", "cc", "cxx"];
const HEADER_EXTENSIONS: [&str; 3] = ["h", "hpp", "hh"];
const COMPANION_EXTENSIONS: [&str; 3] = ["cpp", "c", "cc"];

/// Stable unit identity: SHA-256 of the unit name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..self.0.len().min(8)])
    }
}

/// Settings every unit starts from, taken from the `-c` command string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseConfig {
    pub modules: Vec<String>,
    pub defines: Vec<String>,
    pub includes: Vec<String>,
    pub libs: Vec<String>,
}

impl BaseConfig {
    pub fn from_commands(commands: &str) -> Result<Self, ParseError> {
        let mut base = Self::default();
        for event in parse_commands(commands)? {
            match event {
                DirectiveEvent::ModulesEnabled(v) => base.modules.extend(v),
                DirectiveEvent::DefinesAdded(v) => base.defines.extend(v),
                DirectiveEvent::IncludesAdded(v) => base.includes.extend(v),
                DirectiveEvent::LibsAdded(v) => base.libs.extend(v),
                other => warn!(?other, "command has no effect outside of a source file"),
            }
        }
        Ok(base)
    }
}

/// What a parent learns about a subproject once the child has been started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprojectInfo {
    pub id: UnitId,
    pub target_name: String,
    /// Child include paths, already expressed relative to the parent.
    pub includes: Vec<String>,
}

/// Services a unit needs from whoever owns it while it derives work.
pub trait UnitHost {
    /// Queue a task with the scheduler.
    fn submit(&mut self, task: Task) -> TaskId;

    /// Create and start the child unit for `path` (relative to the parent).
    fn subproject(&mut self, parent: &BuildUnit, path: &str) -> Result<SubprojectInfo, BuildError>;

    /// True when one of `dependencies` already owns `path`.
    fn owned_by_dependency(&self, dependencies: &[UnitId], path: &Path) -> bool;

    /// A source file declared a feature; later units see the new state.
    fn feature_declared(&mut self, feature: &Feature);

    /// Tasks of units other than `unit` that write `output`.
    fn produced_elsewhere(&self, unit: &UnitId, output: &str) -> Vec<TaskId>;
}

#[derive(Debug, Clone)]
struct Queued {
    id: TaskId,
    output: String,
}

pub struct BuildUnit {
    id: UnitId,
    name: String,
    relative_path: PathBuf,
    ctx: Arc<BuildContext>,

    target_name: String,
    target_kind: TargetKind,
    linkage: Linkage,
    version: Version,

    modules: Vec<String>,
    module_flags: ModuleFlags,
    defines: Vec<String>,
    define_flags: Vec<String>,
    includes: Vec<String>,
    include_flags: Vec<String>,
    libs: Vec<String>,

    dependencies: Vec<UnitId>,
    files: FileStore,
    features: FeatureSet,

    queue: Vec<Queued>,
    parsed_this_run: HashSet<PathBuf>,
    predefs_task: Option<TaskId>,
    fatal: Option<String>,
    parse_errors: Vec<String>,
}

impl BuildUnit {
    pub fn new(
        name: &str,
        relative_path: &Path,
        ctx: Arc<BuildContext>,
        base: &BaseConfig,
        features: FeatureSet,
    ) -> Self {
        let mut unit = Self::empty(UnitId::from_name(name), name, relative_path, ctx, features);

        // The containing directory names the target until a directive says otherwise
        unit.target_name = default_target_name(name);
        unit.add_includes(&[".".to_string()]);

        unit.enable_modules(&base.modules);
        unit.add_defines(&base.defines);
        unit.add_includes(&base.includes);
        unit.add_libs(&base.libs);
        unit
    }

    pub(crate) fn empty(
        id: UnitId,
        name: &str,
        relative_path: &Path,
        ctx: Arc<BuildContext>,
        features: FeatureSet,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            relative_path: relative_path.to_path_buf(),
            ctx,
            target_name: String::new(),
            target_kind: TargetKind::Application,
            linkage: Linkage::Dynamic,
            version: Version::new(1, 0, 0),
            modules: Vec::new(),
            module_flags: ModuleFlags::default(),
            defines: Vec::new(),
            define_flags: Vec::new(),
            includes: Vec::new(),
            include_flags: Vec::new(),
            libs: Vec::new(),
            dependencies: Vec::new(),
            files: FileStore::new(),
            features,
            queue: Vec::new(),
            parsed_this_run: HashSet::new(),
            predefs_task: None,
            fatal: None,
            parse_errors: Vec::new(),
        }
    }

    // ---- accessors ----

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    pub fn define_flags(&self) -> &[String] {
        &self.define_flags
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn include_flags(&self) -> &[String] {
        &self.include_flags
    }

    pub fn libs(&self) -> &[String] {
        &self.libs
    }

    pub fn dependencies(&self) -> &[UnitId] {
        &self.dependencies
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub(crate) fn files_mut(&mut self) -> &mut FileStore {
        &mut self.files
    }

    pub fn owns_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Number of tasks queued during this run.
    pub fn queued_tasks(&self) -> usize {
        self.queue.len()
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    pub fn parse_errors(&self) -> &[String] {
        &self.parse_errors
    }

    // ---- directive mutations ----

    pub fn set_target_name(&mut self, name: &str) {
        self.target_name = name.to_string();
    }

    pub fn set_target_kind(&mut self, kind: TargetKind) {
        self.target_kind = kind;
    }

    pub fn set_linkage(&mut self, linkage: Linkage) {
        self.linkage = linkage;
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Merges modules in; flags are only recomputed when the list changed.
    pub fn enable_modules(&mut self, modules: &[String]) {
        let mut merged = self.modules.clone();
        push_unique(&mut merged, modules);
        if merged == self.modules {
            return;
        }

        let Some(qt_dir) = self.ctx.flags.qt_dir() else {
            self.fail(format!(
                "unit '{}' uses Qt modules {:?}, but the Qt dir is not set (use --qt-dir)",
                self.name, modules
            ));
            return;
        };

        self.module_flags = module_flags(&merged, qt_dir, self.ctx.flags.debug_build);
        self.modules = merged;
        debug!(unit = %self.name, modules = ?self.modules, "modules updated");
    }

    pub fn add_defines(&mut self, defines: &[String]) {
        push_unique(&mut self.defines, defines);
        for define in defines {
            let flag = format!("-D{}", define);
            if !self.define_flags.contains(&flag) {
                self.define_flags.push(flag);
            }
        }
    }

    pub fn add_includes(&mut self, includes: &[String]) {
        push_unique(&mut self.includes, includes);
        for include in includes {
            let flag = format!("-I{}", join_rel(&self.relative_path, include).display());
            if !self.include_flags.contains(&flag) {
                self.include_flags.push(flag);
            }
        }
    }

    pub fn add_libs(&mut self, libs: &[String]) {
        push_unique(&mut self.libs, libs);
    }

    /// Records a dependency on another unit. Self edges and repeats are ignored.
    pub fn depend_on(&mut self, id: &UnitId) {
        if *id == self.id {
            warn!(unit = %self.name, "ignoring dependency of a unit on itself");
            return;
        }
        if !self.dependencies.contains(id) {
            self.dependencies.push(id.clone());
        }
    }

    pub fn declare_feature(&mut self, name: &str, default_enabled: bool, host: &mut impl UnitHost) {
        let feature = self
            .features
            .entry(name.to_string())
            .or_insert_with(|| Feature::new(name, default_enabled));
        feature.defined = true;
        let feature = feature.clone();

        debug!(feature = %feature.name, enabled = feature.enabled, "feature declared");
        host.feature_declared(&feature);
        if feature.enabled {
            self.add_defines(&[feature.define]);
        }
    }

    /// Adds the flags a finished subproject exposes.
    pub fn link_subproject(&mut self, info: &SubprojectInfo) {
        self.depend_on(&info.id);
        self.add_includes(&info.includes);

        let prefix = self.ctx.flags.prefix.display().to_string();
        self.add_libs(&[format!("-L{}", prefix), format!("-l{}", info.target_name)]);
    }

    fn fail(&mut self, message: String) {
        error!(unit = %self.name, "{}", message);
        if self.fatal.is_none() {
            self.fatal = Some(message);
        }
    }

    // ---- task derivation ----

    fn submit(&mut self, task: Task, host: &mut impl UnitHost) -> TaskId {
        let output = task.output.clone();
        debug!(unit = %self.name, output = %output, command = %task.command_line(), "queueing task");
        let id = host.submit(task);
        self.queue.push(Queued { id, output });
        id
    }

    fn queued_producing(&self, outputs: &[&str]) -> Vec<TaskId> {
        self.queue
            .iter()
            .filter(|q| outputs.contains(&q.output.as_str()))
            .map(|q| q.id)
            .collect()
    }

    fn all_queued(&self) -> Vec<TaskId> {
        self.queue.iter().map(|q| q.id).collect()
    }

    fn sysroot_flag(&self) -> Option<String> {
        self.ctx
            .flags
            .paths
            .sysroot
            .as_ref()
            .map(|s| format!("--sysroot={}", s.display()))
    }

    fn output_path(&self, name: &str) -> String {
        join_rel(&self.ctx.flags.prefix, name).display().to_string()
    }

    /// Queues a compile of `file` and returns the object file it will produce.
    pub fn compile(&mut self, file: &str, host: &mut impl UnitHost) -> Option<String> {
        if self.fatal.is_some() {
            return None;
        }

        let profile = &self.ctx.compiler;
        let object = object_name(file);

        let mut args: Vec<String> = profile.flags.clone();
        if self.ctx.flags.debug_build {
            args.extend(profile.debug_flags.iter().cloned());
        } else {
            args.extend(profile.release_flags.iter().cloned());
        }
        args.extend(self.sysroot_flag());
        args.extend(self.define_flags.iter().cloned());
        args.extend(self.module_flags.defines.iter().cloned());
        args.extend(self.module_flags.includes.iter().cloned());
        args.extend(self.include_flags.iter().cloned());

        let contents = if self.ctx.flags.pipe {
            self.files
                .get(Path::new(file))
                .and_then(|r| r.contents.clone())
        } else {
            None
        };
        match contents {
            Some(_) => {
                let language = if file.ends_with(".c") { "c" } else { "c++" };
                args.extend(["-x".to_string(), language.to_string(), "-".to_string()]);
                args.extend(["-o".to_string(), object.clone()]);
            }
            None => args.extend(["-o".to_string(), object.clone(), file.to_string()]),
        }

        // Wait for whoever still produces the source or the same object
        let mut prerequisites = self.queued_producing(&[file_name(file), object.as_str()]);
        let foreign = host.produced_elsewhere(&self.id, &object);
        if !foreign.is_empty() {
            warn!(unit = %self.name, object = %object, "another unit writes the same object file");
            prerequisites.extend(foreign);
        }
        let task = Task::new(&self.id, object.clone(), profile.compiler_for(file))
            .args(args)
            .stdin(contents)
            .after(prerequisites);
        self.submit(task, host);
        Some(object)
    }

    /// Queues the archive or link step (plus the symlink for shared libraries).
    pub fn link(&mut self, host: &mut impl UnitHost) {
        if self.fatal.is_some() {
            return;
        }

        let objects: Vec<String> = self
            .files
            .values()
            .flat_map(|r| r.objects().map(str::to_string).collect::<Vec<_>>())
            .collect();
        if objects.is_empty() {
            warn!(unit = %self.name, "nothing to link");
            return;
        }

        let profile = self.ctx.compiler.clone();
        let prerequisites = self.all_queued();
        let dependencies = self.dependencies.clone();

        if self.target_kind == TargetKind::Library && self.linkage == Linkage::Static {
            let archive = profile.static_library_name(&self.target_name);
            let mut args = profile.archiver_flags.clone();
            args.push(self.output_path(&archive));
            args.extend(objects);

            let task = Task::new(&self.id, archive, profile.archiver_binary())
                .args(args)
                .after(prerequisites)
                .after_units(&dependencies);
            self.submit(task, host);
            return;
        }

        let mut args = profile.linker_flags.clone();
        if self.ctx.flags.debug_build {
            args.extend(profile.linker_debug_flags.iter().cloned());
        } else {
            args.extend(profile.linker_release_flags.iter().cloned());
        }
        args.extend(self.sysroot_flag());

        let output = match self.target_kind {
            TargetKind::Library => {
                let library = profile.dynamic_library_name(&self.target_name);
                let versioned = format!("{}.{}", library, self.version);
                args.extend([
                    "-shared".to_string(),
                    format!("-Wl,-soname,{}.{}", library, self.version.major),
                    "-o".to_string(),
                    self.output_path(&versioned),
                ]);
                versioned
            }
            TargetKind::Application => {
                args.extend(["-o".to_string(), self.output_path(&self.target_name)]);
                self.target_name.clone()
            }
        };
        args.extend(objects);
        args.extend(self.module_flags.libs.iter().cloned());
        args.extend(self.libs.iter().cloned());

        let task = Task::new(&self.id, output.clone(), profile.linker_binary())
            .args(args)
            .after(prerequisites)
            .after_units(&dependencies);
        let link = self.submit(task, host);

        if self.target_kind == TargetKind::Library {
            let unversioned = profile.dynamic_library_name(&self.target_name);
            let task = Task::new(&self.id, unversioned.clone(), "ln")
                .args(["-sf".to_string(), output, self.output_path(&unversioned)])
                .after([link]);
            self.submit(task, host);
        }
    }

    /// Queues the deployment tool for applications when one is configured.
    pub fn deploy(&mut self, host: &mut impl UnitHost) {
        if self.fatal.is_some() || self.target_kind != TargetKind::Application {
            return;
        }
        let Some(deployer) = self.ctx.deployer.clone() else {
            return;
        };
        let Some(executable) = deployer.executable.clone() else {
            self.fail(format!("deployer '{}' has no executable", deployer.name));
            return;
        };

        let mut args = vec![self.output_path(&self.target_name)];
        args.extend(deployer.flags.iter().cloned());
        if let Some(qt) = self.ctx.flags.qt_dir() {
            args.push(format!("-qmake={}", qt.join("bin").join("qmake").display()));
        }

        let output = format!("{}.{}", self.target_name, deployer.suffix);
        let task = Task::new(&self.id, output, executable.display().to_string())
            .args(args)
            .after(self.all_queued())
            .after_units(&self.dependencies);
        self.submit(task, host);
    }

    fn require_qt(&mut self, tool: &str) -> Option<PathBuf> {
        match self.ctx.flags.qt_dir() {
            Some(qt) => Some(qt.to_path_buf()),
            None => {
                self.fail(format!(
                    "cannot run {} because the Qt dir is not set (use --qt-dir)",
                    tool
                ));
                None
            }
        }
    }

    /// Queues moc for `file` and a compile of the generated source.
    pub fn run_moc(&mut self, file: &str, host: &mut impl UnitHost) {
        if self.fatal.is_some() {
            return;
        }
        let Some(qt) = self.require_qt("moc") else {
            return;
        };

        if self.predefs_task.is_none() && !self.ctx.flags.artifact_path(MOC_PREDEFS).exists() {
            let task = Task::new(&self.id, MOC_PREDEFS, self.ctx.compiler.compiler_for(file))
                .args(["-pipe", "-g", "-Wall", "-W", "-dM", "-E", "-o", MOC_PREDEFS])
                .args([qt
                    .join("mkspecs/features/data/dummy.cpp")
                    .display()
                    .to_string()]);
            self.predefs_task = Some(self.submit(task, host));
        }

        let moc_file = format!("moc_{}.cpp", file_stem(file));
        let mut args = self.module_flags.defines.clone();
        args.extend(["--include".to_string(), MOC_PREDEFS.to_string()]);
        args.extend(self.module_flags.includes.iter().cloned());
        args.extend([file.to_string(), "-o".to_string(), moc_file.clone()]);

        let task = Task::new(&self.id, moc_file.clone(), qt.join("bin").join("moc").display().to_string())
            .args(args)
            .after(self.predefs_task)
            .after(self.queued_producing(&[moc_file.as_str()]));
        self.submit(task, host);

        let generated_object = self.compile(&moc_file, host);
        let record = self
            .files
            .entry(PathBuf::from(file))
            .or_insert_with(|| FileRecord::requested(Path::new(file)));
        record.generated_file = Some(moc_file);
        record.generated_object_file = generated_object;
    }

    /// Queues rcc for one resource file (path already rooted at the unit).
    pub fn run_rcc(&mut self, qrc: &Path, host: &mut impl UnitHost) {
        if self.fatal.is_some() {
            return;
        }
        let Some(qt) = self.require_qt("rcc") else {
            return;
        };

        let stem = qrc
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cpp_file = format!("qrc_{}.cpp", stem);

        let task = Task::new(&self.id, cpp_file.clone(), qt.join("bin").join("rcc").display().to_string())
            .args([
                "-name".to_string(),
                stem,
                qrc.display().to_string(),
                "-o".to_string(),
                cpp_file.clone(),
            ])
            .after(self.queued_producing(&[cpp_file.as_str()]));
        self.submit(task, host);

        let generated_object = self.compile(&cpp_file, host);
        let (modified, created) = fs::metadata(qrc)
            .map(|m| file_times(&m))
            .unwrap_or((None, None));
        let checksum = fs::read(qrc)
            .map(|bytes| super::record::checksum(&bytes))
            .unwrap_or_default();

        self.files.insert(
            qrc.to_path_buf(),
            FileRecord {
                path: qrc.to_path_buf(),
                kind: FileKind::Resource,
                modified,
                created,
                checksum,
                contents: None,
                object_file: None,
                generated_file: Some(cpp_file),
                generated_object_file: generated_object,
            },
        );
    }

    fn run_tool(&mut self, tool: &str, args: &[String], host: &mut impl UnitHost) {
        match tool {
            "moc" => {
                for file in args {
                    self.run_moc(file, host);
                }
            }
            "rcc" => {
                for qrc in args {
                    let path = join_rel(&self.relative_path, qrc);
                    self.run_rcc(&path, host);
                }
            }
            other => warn!(tool = other, "unsupported tool, ignoring"),
        }
    }

    // ---- parsing ----

    /// Looks for `file` as given, under the unit directory, then in every include path.
    pub fn find_file(&self, file: &str) -> Option<PathBuf> {
        let given = PathBuf::from(file);
        if given.exists() {
            return Some(given);
        }

        let rooted = join_rel(&self.relative_path, file);
        if rooted.exists() {
            return Some(rooted);
        }

        self.includes
            .iter()
            .map(|inc| join_rel(&join_rel(&self.relative_path, inc), file))
            .find(|candidate| candidate.exists())
    }

    /// Parses `file` unless it was handled already.
    ///
    /// `force` re-parses files that have a record but were not seen this run.
    pub fn request_parse(&mut self, file: &str, force: bool, host: &mut impl UnitHost) {
        if self.fatal.is_some() {
            return;
        }

        let Some(path) = self.find_file(file) else {
            if force {
                self.parse_errors
                    .push(ParseError::NotFound(PathBuf::from(file)).to_string());
            }
            warn!(unit = %self.name, file, "could not find file");
            return;
        };

        if self.parsed_this_run.contains(&path) || (!force && self.files.contains_key(&path)) {
            return;
        }
        if host.owned_by_dependency(&self.dependencies, &path) {
            debug!(file = %path.display(), "file belongs to a subproject, skipping");
            return;
        }

        self.parse_file(&path, host);
    }

    fn parse_file(&mut self, path: &Path, host: &mut impl UnitHost) {
        self.parsed_this_run.insert(path.to_path_buf());
        // Stored before parsing so include cycles stop here
        self.files
            .insert(path.to_path_buf(), FileRecord::requested(path));

        let options = ParseOptions {
            whole_file: self.ctx.flags.parse_whole_files,
            keep_contents: self.ctx.flags.pipe,
        };
        let mut reader = match DirectiveReader::open(path, options) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(unit = %self.name, "{}", e);
                self.parse_errors.push(e.to_string());
                return;
            }
        };

        info!(unit = %self.name, file = %path.display(), "parsing");
        while let Some(event) = reader.next_event(&self.features) {
            if self.fatal.is_some() {
                return;
            }
            match event {
                Ok(event) => self.apply(event, host),
                Err(e) => {
                    warn!(file = %path.display(), "{}", e);
                    self.parse_errors
                        .push(format!("{}: {}", path.display(), e));
                }
            }
        }
    }

    /// Applies one directive event.
    pub fn apply(&mut self, event: DirectiveEvent, host: &mut impl UnitHost) {
        match event {
            DirectiveEvent::TargetName(name) => self.set_target_name(&name),
            DirectiveEvent::TargetType(kind, linkage) => {
                self.set_target_kind(kind);
                if let Some(linkage) = linkage {
                    self.set_linkage(linkage);
                }
            }
            DirectiveEvent::ModulesEnabled(modules) => self.enable_modules(&modules),
            DirectiveEvent::DefinesAdded(defines) => self.add_defines(&defines),
            DirectiveEvent::IncludesAdded(includes) => self.add_includes(&includes),
            DirectiveEvent::LibsAdded(libs) => self.add_libs(&libs),
            DirectiveEvent::ToolRequested { tool, args } => self.run_tool(&tool, &args, host),
            DirectiveEvent::SubprojectRequested(path) => match host.subproject(self, &path) {
                Ok(info) => self.link_subproject(&info),
                Err(BuildError::Configuration(message)) => self.fail(message),
                Err(e) => {
                    warn!(unit = %self.name, subproject = %path, "{}", e);
                    self.parse_errors.push(e.to_string());
                }
            },
            DirectiveEvent::VersionSet(version) => self.set_version(version),
            DirectiveEvent::FeatureDeclared {
                name,
                default_enabled,
            } => self.declare_feature(&name, default_enabled, host),
            DirectiveEvent::IncludeRequested { file, force } => {
                self.request_parse(&file, force, host)
            }
            DirectiveEvent::Parsed(parsed) => self.on_parsed(parsed, host),
        }
    }

    fn on_parsed(&mut self, parsed: ParsedFile, host: &mut impl UnitHost) {
        let path = parsed.path.clone();
        let path_str = path.display().to_string();

        {
            let record = self
                .files
                .entry(path.clone())
                .or_insert_with(|| FileRecord::requested(&path));
            record.kind = FileKind::CompilationUnit;
            record.checksum = parsed.checksum;
            record.modified = parsed.modified;
            record.created = parsed.created;
            record.contents = parsed.contents;
        }

        match self.companion_source(&path, parsed.source_override.as_deref()) {
            Some(source) if source == path => {
                let object = self.compile(&path_str, host);
                if let Some(record) = self.files.get_mut(&path) {
                    record.object_file = object;
                }
            }
            Some(source) => {
                let source = source.display().to_string();
                self.request_parse(&source, true, host);
            }
            None => {}
        }
    }

    /// The file that gets compiled for `path`: an override, the file itself,
    /// or for headers a same-named source next to it or in an include path.
    fn companion_source(&self, path: &Path, source_override: Option<&str>) -> Option<PathBuf> {
        if let Some(source) = source_override {
            let beside = path
                .parent()
                .map(|dir| dir.join(source))
                .filter(|p| p.exists());
            return beside.or_else(|| self.find_file(source));
        }

        let extension = path.extension()?.to_str()?;
        if SOURCE_EXTENSIONS.contains(&extension) {
            return Some(path.to_path_buf());
        }
        if !HEADER_EXTENSIONS.contains(&extension) {
            return None;
        }

        let stem = path.file_stem()?.to_str()?;
        let beside = path.with_extension("");
        let mut bases = vec![beside];
        bases.extend(
            self.includes
                .iter()
                .map(|inc| join_rel(&join_rel(&self.relative_path, inc), stem)),
        );

        bases.iter().find_map(|base| {
            COMPANION_EXTENSIONS
                .iter()
                .map(|ext| base.with_extension(ext))
                .find(|candidate| candidate.exists())
        })
    }

    // ---- lifecycle ----

    /// Derives this run's tasks: a cold parse from the entry file, or the
    /// incremental check when the unit came from the cache.
    pub fn start(&mut self, from_cache: bool, host: &mut impl UnitHost) {
        self.queue.clear();
        self.parsed_this_run.clear();
        self.predefs_task = None;

        if from_cache {
            self.refresh(host);
        } else {
            let name = self.name.clone();
            self.request_parse(&name, true, host);
        }

        self.link(host);
        self.deploy(host);
    }

    fn refresh(&mut self, host: &mut impl UnitHost) {
        let policy = self.ctx.flags.effective_checksums();
        let paths: Vec<PathBuf> = self.files.keys().cloned().collect();

        for path in paths {
            if self.fatal.is_some() {
                return;
            }
            if self.parsed_this_run.contains(&path) {
                continue;
            }
            let Some(record) = self.files.get(&path).cloned() else {
                continue;
            };
            let path_str = path.display().to_string();

            match file_state(&record, policy) {
                FileState::Missing => {
                    warn!(file = %path_str, "file has vanished, dropping it from the build");
                    self.files.remove(&path);
                }
                FileState::Dirty => {
                    debug!(file = %path_str, "file changed");
                    match record.kind {
                        FileKind::CompilationUnit => self.parse_file(&path, host),
                        FileKind::Resource => self.run_rcc(&path, host),
                    }
                }
                FileState::Clean => self.refresh_artifacts(&record, host),
            }
        }
    }

    fn refresh_artifacts(&mut self, record: &FileRecord, host: &mut impl UnitHost) {
        let artifact_missing = |name: &Option<String>| {
            name.as_deref()
                .is_some_and(|n| !self.ctx.flags.artifact_path(n).exists())
        };
        let object_missing = artifact_missing(&record.object_file);
        let generated_object_missing = artifact_missing(&record.generated_object_file);
        let generated_missing = artifact_missing(&record.generated_file);
        let path_str = record.path.display().to_string();

        // Checked independently, `rm *.o` takes both objects of a moc'ed source
        if object_missing {
            debug!(file = %path_str, "object file missing, recompiling");
            self.compile(&path_str, host);
            // A dirty header later in the walk must not compile it again
            self.parsed_this_run.insert(record.path.clone());
        }
        if generated_object_missing {
            if generated_missing {
                debug!(file = %path_str, "generated file missing, regenerating");
                match record.kind {
                    FileKind::CompilationUnit => self.run_moc(&path_str, host),
                    FileKind::Resource => self.run_rcc(&record.path, host),
                }
            } else if let Some(generated) = &record.generated_file {
                debug!(file = %generated, "generated object missing, recompiling");
                self.compile(generated, host);
            }
        }
    }

    /// Removes every artifact this unit produced and forgets its files.
    pub fn clean(&mut self) -> usize {
        let mut removed = 0;
        let flags = &self.ctx.flags;
        let mut artifacts: Vec<PathBuf> = Vec::new();

        for record in self.files.values() {
            for name in [
                &record.object_file,
                &record.generated_file,
                &record.generated_object_file,
            ]
            .into_iter()
            .flatten()
            {
                artifacts.push(flags.artifact_path(name));
            }
        }

        if !self.modules.is_empty() {
            artifacts.push(flags.artifact_path(MOC_PREDEFS));
        }

        let profile = &self.ctx.compiler;
        let outputs = match (self.target_kind, self.linkage) {
            (TargetKind::Application, _) => vec![self.target_name.clone()],
            (TargetKind::Library, Linkage::Static) => {
                vec![profile.static_library_name(&self.target_name)]
            }
            (TargetKind::Library, Linkage::Dynamic) => {
                let library = profile.dynamic_library_name(&self.target_name);
                vec![format!("{}.{}", library, self.version), library]
            }
        };
        for output in outputs {
            artifacts.push(flags.work_dir.join(self.output_path(&output)));
        }

        for artifact in artifacts {
            match fs::remove_file(&artifact) {
                Ok(()) => {
                    debug!(file = %artifact.display(), "removed");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %artifact.display(), "could not remove: {}", e),
            }
        }

        self.files.clear();
        removed
    }

    pub(crate) fn restore(
        &mut self,
        target_name: &str,
        kind: TargetKind,
        linkage: Linkage,
        version: Version,
        dependencies: Vec<UnitId>,
    ) {
        self.target_name = target_name.to_string();
        self.target_kind = kind;
        self.linkage = linkage;
        self.version = version;
        for id in &dependencies {
            self.depend_on(id);
        }
    }
}

fn push_unique(list: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !list.contains(item) {
            list.push(item.clone());
        }
    }
}

fn file_name(file: &str) -> &str {
    Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file)
}

fn file_stem(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

/// `src/widget.cpp` compiles to `widget.o`.
pub fn object_name(file: &str) -> String {
    format!("{}.o", file_stem(file))
}

/// Name of the directory holding the entry file.
fn default_target_name(entry: &str) -> String {
    let path = Path::new(entry);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dir = fs::canonicalize(&dir).unwrap_or(dir);
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a.out".to_string())
}
