use criterion::{Criterion, criterion_group, criterion_main};
use gibs::build::cache::{CacheDocument, UnitRecord};
use gibs::build::record::{FileKind, FileRecord};
use gibs::build::unit::UnitId;
use gibs::feature::FeatureSet;
use gibs::parser::{DirectiveReader, Linkage, ParseOptions, TargetKind, parse_commands};
use semver::Version;
use std::hint::black_box;
use std::path::{Path, PathBuf};

const COMMANDS: &str = "qt core gui widgets; define DEMO FAST_PATH; include inc third_party; lib -lm -lpthread";

fn source_file(dir: &Path) -> PathBuf {
    let mut content = String::from(
        "//i target name bench_app\n//i qt core gui\n/*i\n  define BENCH\n  include inc\n*/\n",
    );
    for i in 0..200 {
        content.push_str(&format!("#include <vector_{}>\n// plain comment {}\n", i, i));
    }
    content.push_str("class Widget : public QObject {\n    Q_OBJECT\n};\n");
    let path = dir.join("main.cpp");
    std::fs::write(&path, content).unwrap();
    path
}

fn bench_parse_commands(c: &mut Criterion) {
    c.bench_function("parse_command_string", |b| {
        b.iter(|| parse_commands(black_box(COMMANDS)).unwrap())
    });
}

fn bench_scan_file(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = source_file(dir.path());
    let features = FeatureSet::new();

    c.bench_function("scan_whole_file", |b| {
        b.iter(|| {
            let options = ParseOptions {
                whole_file: true,
                keep_contents: false,
            };
            let mut reader = DirectiveReader::open(black_box(&path), options).unwrap();
            let mut events = 0;
            while let Some(event) = reader.next_event(&features) {
                event.unwrap();
                events += 1;
            }
            events
        })
    });
}

fn cache_document() -> CacheDocument {
    let mut document = CacheDocument::new(Path::new("main.cpp"), Some(Path::new("/opt/qt")));
    for unit in 0..5 {
        let name = format!("unit{}/main.cpp", unit);
        document.units.push(UnitRecord {
            id: UnitId::from_name(&name),
            name,
            relative_path: PathBuf::from(format!("unit{}", unit)),
            target_name: format!("target{}", unit),
            kind: TargetKind::Library,
            linkage: Linkage::Dynamic,
            version: Version::new(1, 2, 3),
            dependencies: Vec::new(),
            modules: vec!["core".to_string(), "gui".to_string()],
            defines: vec!["DEMO".to_string()],
            includes: vec![".".to_string(), "inc".to_string()],
            libs: vec!["-lm".to_string()],
            files: (0..100)
                .map(|file| FileRecord {
                    path: PathBuf::from(format!("unit{}/file{}.cpp", unit, file)),
                    kind: FileKind::CompilationUnit,
                    checksum: format!("{:064x}", file),
                    object_file: Some(format!("file{}.o", file)),
                    ..Default::default()
                })
                .collect(),
        });
    }
    document
}

fn bench_cache_serialization(c: &mut Criterion) {
    let document = cache_document();
    let json = serde_json::to_string(&document).unwrap();

    c.bench_function("serialize_cache", |b| {
        b.iter(|| serde_json::to_string(black_box(&document)).unwrap())
    });
    c.bench_function("deserialize_cache", |b| {
        b.iter(|| {
            let _: CacheDocument = serde_json::from_str(black_box(&json)).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_parse_commands,
    bench_scan_file,
    bench_cache_serialization
);
criterion_main!(benches);
