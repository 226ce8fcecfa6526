//! Scans one source file for directives.

use super::{
    DirectiveEvent, ParseError, ParsedFile, TAG_BLOCK_BEGIN, TAG_BLOCK_END, TAG_ONE_LINE,
    parse_command,
};
use crate::build::record::{checksum, file_times};
use crate::feature::{FeatureSet, define_state};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Keep scanning past the first line of real code.
    pub whole_file: bool,
    /// Hand the raw bytes back in the `Parsed` event.
    pub keep_contents: bool,
}

/// One `#if` level. `known` is false for macros that are not feature defines.
#[derive(Debug, Clone, Copy)]
struct Condition {
    active: bool,
    known: bool,
    taken: bool,
}

/// Pull-based directive scanner.
///
/// Events are produced lazily, one line at a time, so the caller can apply a
/// `feature` declaration before the reader evaluates the `#ifdef` that uses it.
pub struct DirectiveReader {
    path: PathBuf,
    lines: Vec<String>,
    cursor: usize,
    pending: VecDeque<DirectiveEvent>,
    conditions: Vec<Condition>,
    in_block: bool,
    moc_requested: bool,
    source_override: Option<String>,
    parsed: Option<ParsedFile>,
    whole_file: bool,
    done: bool,
}

impl DirectiveReader {
    pub fn open(path: &Path, options: ParseOptions) -> Result<Self, ParseError> {
        if !path.exists() {
            return Err(ParseError::NotFound(path.to_path_buf()));
        }

        let bytes = fs::read(path).map_err(|source| ParseError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let (modified, created) = fs::metadata(path)
            .map(|meta| file_times(&meta))
            .unwrap_or((None, None));

        let lines = String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect();

        debug!(path = %path.display(), "scanning file");

        Ok(Self {
            path: path.to_path_buf(),
            lines,
            cursor: 0,
            pending: VecDeque::new(),
            conditions: Vec::new(),
            in_block: false,
            moc_requested: false,
            source_override: None,
            parsed: Some(ParsedFile {
                path: path.to_path_buf(),
                source_override: None,
                checksum: checksum(&bytes),
                modified,
                created,
                contents: options.keep_contents.then_some(bytes),
            }),
            whole_file: options.whole_file,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next event, `None` once the terminal `Parsed` event has been handed out.
    pub fn next_event(
        &mut self,
        features: &FeatureSet,
    ) -> Option<Result<DirectiveEvent, ParseError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }

            let Some(line) = self.lines.get(self.cursor).cloned() else {
                self.finish();
                continue;
            };
            self.cursor += 1;

            if !self.whole_file && !self.in_block && looks_like_code(&line) {
                trace!(line = self.cursor, "quick scan stops at first code line");
                self.finish();
                continue;
            }

            if let Err(e) = self.scan_line(line.trim(), features) {
                return Some(Err(e));
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(mut parsed) = self.parsed.take() {
            parsed.source_override = self.source_override.take();
            self.pending.push_back(DirectiveEvent::Parsed(parsed));
        }
    }

    fn active(&self) -> bool {
        self.conditions.iter().all(|c| c.active)
    }

    fn scan_line(&mut self, line: &str, features: &FeatureSet) -> Result<(), ParseError> {
        if self.in_block {
            let command = match line.find(TAG_BLOCK_END) {
                Some(end) => {
                    self.in_block = false;
                    &line[..end]
                }
                None => line,
            };
            return self.command(command);
        }

        if let Some(command) = line.strip_prefix(TAG_ONE_LINE) {
            return self.command(command);
        }

        if let Some(rest) = line.strip_prefix(TAG_BLOCK_BEGIN) {
            // `/*include` is an ordinary comment
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                return Ok(());
            }
            let command = match rest.find(TAG_BLOCK_END) {
                Some(end) => &rest[..end],
                None => {
                    self.in_block = true;
                    rest
                }
            };
            return self.command(command);
        }

        if let Some(directive) = line.strip_prefix('#') {
            self.preprocessor(directive.trim_start(), features);
            return Ok(());
        }

        if !self.moc_requested && (line.starts_with("Q_OBJECT") || line.starts_with("Q_GADGET")) {
            self.moc_requested = true;
            self.pending.push_back(DirectiveEvent::ToolRequested {
                tool: "moc".to_string(),
                args: vec![self.path.to_string_lossy().into_owned()],
            });
        }

        Ok(())
    }

    fn command(&mut self, command: &str) -> Result<(), ParseError> {
        let command = command.trim();
        if let Some(source) = command.strip_prefix("source ") {
            self.source_override = Some(source.trim().to_string());
            return Ok(());
        }
        self.pending.extend(parse_command(command)?);
        Ok(())
    }

    fn preprocessor(&mut self, directive: &str, features: &FeatureSet) {
        let (keyword, rest) = directive
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((directive, ""));

        match keyword {
            "include" => {
                if self.active()
                    && let Some(file) = quoted(rest)
                {
                    self.pending.push_back(DirectiveEvent::IncludeRequested {
                        file: file.to_string(),
                        force: false,
                    });
                }
            }
            "ifdef" => self.push_condition(evaluate_defined(rest, features)),
            "ifndef" => self.push_condition(evaluate_defined(rest, features).map(|on| !on)),
            "if" => self.push_condition(evaluate_if(rest, features)),
            "elif" => {
                if let Some(last) = self.conditions.pop() {
                    let state = evaluate_if(rest, features);
                    let cond = match (last.known, state) {
                        (true, Some(on)) => Condition {
                            active: on && !last.taken,
                            known: true,
                            taken: last.taken || on,
                        },
                        _ => Condition {
                            active: true,
                            known: false,
                            taken: true,
                        },
                    };
                    self.conditions.push(cond);
                }
            }
            "else" => {
                if let Some(last) = self.conditions.last_mut()
                    && last.known
                {
                    last.active = !last.taken;
                    last.taken = true;
                }
            }
            "endif" => {
                self.conditions.pop();
            }
            _ => {}
        }
    }

    fn push_condition(&mut self, state: Option<bool>) {
        self.conditions.push(match state {
            Some(on) => Condition {
                active: on,
                known: true,
                taken: on,
            },
            None => Condition {
                active: true,
                known: false,
                taken: true,
            },
        });
    }
}

/// The first line of real code ends the quick scan.
fn looks_like_code(line: &str) -> bool {
    line.contains("::") || line.contains(" class ")
}

fn quoted(rest: &str) -> Option<&str> {
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn evaluate_defined(name: &str, features: &FeatureSet) -> Option<bool> {
    let name = name.split_whitespace().next()?;
    define_state(features, name)
}

/// Handles `defined(X)`, `defined X` and `!defined(X)`; anything else is unknown.
fn evaluate_if(expr: &str, features: &FeatureSet) -> Option<bool> {
    let expr = expr.trim();
    let (negated, expr) = match expr.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, expr),
    };
    let name = expr.strip_prefix("defined")?.trim();
    let name = name
        .strip_prefix('(')
        .and_then(|n| n.strip_suffix(')'))
        .unwrap_or(name)
        .trim();
    if name.contains(char::is_whitespace) {
        return None;
    }
    define_state(features, name).map(|on| on != negated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, parse_toggles};
    use crate::parser::{Linkage, TargetKind};

    fn collect(path: &Path, options: ParseOptions, features: &FeatureSet) -> Vec<DirectiveEvent> {
        let mut reader = DirectiveReader::open(path, options).unwrap();
        let mut events = Vec::new();
        while let Some(event) = reader.next_event(features) {
            events.push(event.unwrap());
        }
        events
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_tags_and_includes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "main.cpp",
            "//i target name calc\n\
             /*i\n\
              target type lib static\n\
              qt core\n\
             */\n\
             #include \"util.h\"\n\
             #include <vector>\n\
             int main() {}\n",
        );

        let events = collect(&path, ParseOptions::default(), &FeatureSet::new());
        assert_eq!(events[0], DirectiveEvent::TargetName("calc".to_string()));
        assert_eq!(
            events[1],
            DirectiveEvent::TargetType(TargetKind::Library, Some(Linkage::Static))
        );
        assert_eq!(
            events[2],
            DirectiveEvent::ModulesEnabled(vec!["core".to_string()])
        );
        assert_eq!(
            events[3],
            DirectiveEvent::IncludeRequested {
                file: "util.h".to_string(),
                force: false
            }
        );
        assert!(matches!(events[4], DirectiveEvent::Parsed(_)));
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_parsed_event_carries_checksum_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "util.h", "//i source util_impl.cpp\n");

        let events = collect(
            &path,
            ParseOptions {
                whole_file: false,
                keep_contents: true,
            },
            &FeatureSet::new(),
        );
        let DirectiveEvent::Parsed(parsed) = &events[0] else {
            panic!("expected Parsed, got {:?}", events[0]);
        };
        assert_eq!(parsed.source_override.as_deref(), Some("util_impl.cpp"));
        assert_eq!(parsed.checksum, checksum(b"//i source util_impl.cpp\n"));
        assert_eq!(
            parsed.contents.as_deref(),
            Some(&b"//i source util_impl.cpp\n"[..])
        );
        assert!(parsed.modified.is_some());
    }

    #[test]
    fn test_quick_scan_stops_at_code() {
        let dir = tempfile::tempdir().unwrap();
        let content = "void Foo::bar() {}\n#include \"late.h\"\n";
        let path = write(dir.path(), "foo.cpp", content);

        let quick = collect(&path, ParseOptions::default(), &FeatureSet::new());
        assert_eq!(quick.len(), 1);

        let whole = collect(
            &path,
            ParseOptions {
                whole_file: true,
                keep_contents: false,
            },
            &FeatureSet::new(),
        );
        assert_eq!(whole.len(), 2);
    }

    #[test]
    fn test_feature_gated_includes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "main.cpp",
            "#ifdef TTS\n#include \"tts.h\"\n#else\n#include \"silent.h\"\n#endif\n\
             #ifdef SOME_PLATFORM_MACRO\n#include \"platform.h\"\n#endif\n",
        );

        let includes = |features: &FeatureSet| -> Vec<String> {
            collect(&path, ParseOptions::default(), features)
                .into_iter()
                .filter_map(|e| match e {
                    DirectiveEvent::IncludeRequested { file, .. } => Some(file),
                    _ => None,
                })
                .collect()
        };

        let on = parse_toggles(&["--tts"]).unwrap();
        assert_eq!(includes(&on), vec!["tts.h", "platform.h"]);

        let off = parse_toggles(&["--no-tts"]).unwrap();
        assert_eq!(includes(&off), vec!["silent.h", "platform.h"]);

        // Unknown macros never hide an include
        assert_eq!(
            includes(&FeatureSet::new()),
            vec!["tts.h", "silent.h", "platform.h"]
        );
    }

    #[test]
    fn test_if_defined_forms() {
        let mut features = FeatureSet::new();
        features.insert("gl".to_string(), Feature::new("gl", false));
        assert_eq!(evaluate_if("defined(GL)", &features), Some(false));
        assert_eq!(evaluate_if("!defined(GL)", &features), Some(true));
        assert_eq!(evaluate_if("defined GL", &features), Some(false));
        assert_eq!(evaluate_if("VERSION > 2", &features), None);
    }

    #[test]
    fn test_q_object_requests_moc_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "widget.h",
            "class Widget : public QObject {\n    Q_OBJECT\n};\nstruct G {\n    Q_GADGET\n};\n",
        );

        let events = collect(
            &path,
            ParseOptions {
                whole_file: true,
                keep_contents: false,
            },
            &FeatureSet::new(),
        );
        let moc: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DirectiveEvent::ToolRequested { tool, .. } if tool == "moc"))
            .collect();
        assert_eq!(moc.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            DirectiveReader::open(Path::new("/no/such/file.cpp"), ParseOptions::default()),
            Err(ParseError::NotFound(_))
        ));
    }

    #[test]
    fn test_bad_command_is_reported_and_scan_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "main.cpp",
            "//i target type plugin\n//i define OK\n",
        );
        let mut reader = DirectiveReader::open(&path, ParseOptions::default()).unwrap();
        let features = FeatureSet::new();
        assert!(matches!(
            reader.next_event(&features),
            Some(Err(ParseError::InvalidTargetType(_)))
        ));
        assert_eq!(
            reader.next_event(&features).unwrap().unwrap(),
            DirectiveEvent::DefinesAdded(vec!["OK".to_string()])
        );
    }
}
