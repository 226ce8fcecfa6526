//! End-to-end builds with a fake toolchain.
//!
//! The compiler, linker and archiver are small shell scripts that create
//! whatever file follows `-o` (or the archive name for `ar`) and log every
//! call, so the whole pipeline runs without a real C++ toolchain.

#![cfg(unix)]

use gibs::build::{BuildContext, BuildGraph, SystemLauncher};
use gibs::config::Flags;
use gibs::feature::FeatureSet;
use gibs::toolchain::CompilerProfile;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const FAKE_CC: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then out="$2"; fi
    shift
done
echo "cc $out" >> calls.log
[ -n "$out" ] && : > "$out"
exit 0
"#;

const FAKE_AR: &str = r#"#!/bin/sh
echo "ar $2" >> calls.log
: > "$2"
"#;

const BROKEN_CC: &str = "#!/bin/sh\necho \"cc broken\" >> calls.log\nexit 1\n";

fn write(dir: &Path, file: &str, content: &str) {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn script(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn toolchain(dir: &Path, cc: &str) -> CompilerProfile {
    let tools = dir.join("tools");
    fs::create_dir_all(&tools).unwrap();
    let cc = script(&tools, "cc", cc);
    let ar = script(&tools, "ar", FAKE_AR);
    CompilerProfile {
        name: "fake".to_string(),
        compiler: cc.clone(),
        c_compiler: cc.clone(),
        linker: cc,
        static_archiver: ar,
        ..CompilerProfile::gcc()
    }
}

fn project(dir: &Path) -> PathBuf {
    let src = dir.join("src");
    write(
        &src,
        "main.cpp",
        "//i target name calculator\n//i subproject engine/engine.cpp\n#include \"display.h\"\nint main() { return 0; }\n",
    );
    write(&src, "display.h", "void show(int);\n");
    write(&src, "display.cpp", "#include \"display.h\"\nvoid show(int) {}\n");
    write(
        &src,
        "engine/engine.cpp",
        "//i target type lib static\n//i define ENGINE_FAST\nint engine() { return 0; }\n",
    );
    src
}

fn context(dir: &Path, cc: &str) -> BuildContext {
    BuildContext {
        flags: Flags {
            input_file: dir.join("src/main.cpp"),
            work_dir: dir.to_path_buf(),
            jobs: 4,
            ..Default::default()
        },
        compiler: toolchain(dir, cc),
        deployer: None,
    }
}

fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

async fn run(dir: &Path, cc: &str) -> (BuildGraph, gibs::build::RunReport) {
    let ctx = context(dir, cc);
    let launcher = SystemLauncher::new(dir, None);
    let mut graph = BuildGraph::new(ctx, FeatureSet::new()).unwrap();
    graph.load_cache();
    graph.start().unwrap();
    let report = graph.build(&launcher).await.unwrap();
    (graph, report)
}

#[tokio::test]
async fn test_cold_then_incremental_builds() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    // Cold run: everything is compiled, the library is archived before the link
    let (graph, report) = run(dir.path(), FAKE_CC).await;
    assert!(report.succeeded(), "{:?}", report.failures);
    assert!(!graph.is_hydrated());
    for artifact in ["main.o", "display.o", "engine.o", "libengine.a", "calculator"] {
        assert!(dir.path().join(artifact).exists(), "{} missing", artifact);
    }
    assert!(dir.path().join(".gibs.cache").exists());

    let log = calls(dir.path());
    let archive = log.iter().position(|c| c == "ar ./libengine.a" || c == "ar libengine.a");
    let link = log.iter().position(|c| c == "cc calculator");
    assert!(archive.unwrap() < link.unwrap(), "{:?}", log);

    // Nothing changed: only the archive and the link run again
    fs::remove_file(dir.path().join("calls.log")).unwrap();
    let (graph, report) = run(dir.path(), FAKE_CC).await;
    assert!(graph.is_hydrated());
    assert!(report.succeeded());
    assert_eq!(report.tasks_run, 2, "{:?}", calls(dir.path()));

    // A deleted object is recompiled without parsing anything
    fs::remove_file(dir.path().join("display.o")).unwrap();
    fs::remove_file(dir.path().join("calls.log")).unwrap();
    let (_, report) = run(dir.path(), FAKE_CC).await;
    assert!(report.succeeded());
    let log = calls(dir.path());
    assert!(log.contains(&"cc display.o".to_string()), "{:?}", log);
    assert!(!log.contains(&"cc main.o".to_string()), "{:?}", log);
}

#[tokio::test]
async fn test_failed_compile_stops_the_build() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let (_, report) = run(dir.path(), BROKEN_CC).await;
    assert!(!report.succeeded());
    assert!(!dir.path().join("calculator").exists());
    assert!(!dir.path().join("libengine.a").exists());
    // The cache is written even though the build failed
    assert!(dir.path().join(".gibs.cache").exists());
}

#[tokio::test]
async fn test_clean_removes_everything_built() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    let (_, report) = run(dir.path(), FAKE_CC).await;
    assert!(report.succeeded());

    let mut graph = BuildGraph::new(context(dir.path(), FAKE_CC), FeatureSet::new()).unwrap();
    assert!(graph.load_cache());
    assert_eq!(graph.clean().unwrap(), 5);
    for artifact in ["main.o", "display.o", "engine.o", "libengine.a", "calculator", ".gibs.cache"] {
        assert!(!dir.path().join(artifact).exists(), "{} survived", artifact);
    }
    assert!(dir.path().join("src/main.cpp").exists());
}
