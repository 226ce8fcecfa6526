//! The command grammar shared by source comments and `-c` strings.

use super::{DirectiveEvent, Linkage, ParseError, TargetKind, parse_version};
use tracing::debug;

/// Parses a single command line such as `target type lib static`.
///
/// A leading `//i` or `/*i` tag is skipped. Lines that are not commands
/// produce no events.
pub fn parse_command(line: &str) -> Result<Vec<DirectiveEvent>, ParseError> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if matches!(words.first(), Some(&"//i") | Some(&"/*i")) {
        words.remove(0);
    }
    if matches!(words.last(), Some(&"*/")) {
        words.pop();
    }

    let Some((&command, args)) = words.split_first() else {
        return Ok(Vec::new());
    };
    let owned = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    debug!(command, ?args, "parsing command");

    let events = match command {
        "target" => parse_target(args)?,
        "qt" => vec![DirectiveEvent::ModulesEnabled(owned(args))],
        "define" => vec![DirectiveEvent::DefinesAdded(owned(args))],
        "include" | "includes" => vec![DirectiveEvent::IncludesAdded(owned(args))],
        "lib" => vec![DirectiveEvent::LibsAdded(owned(args))],
        "tool" => match args.split_first() {
            Some((tool, rest)) => vec![DirectiveEvent::ToolRequested {
                tool: tool.to_string(),
                args: owned(rest),
            }],
            None => return Err(ParseError::MissingArgument("tool".to_string())),
        },
        "subproject" | "subprojects" => args
            .iter()
            .map(|path| DirectiveEvent::SubprojectRequested(path.to_string()))
            .collect(),
        "version" => match args.first() {
            Some(v) => vec![DirectiveEvent::VersionSet(parse_version(v)?)],
            None => return Err(ParseError::MissingArgument("version".to_string())),
        },
        "feature" => parse_feature(args)?,
        _ => Vec::new(),
    };

    // Empty argument lists are no-ops rather than errors
    Ok(events
        .into_iter()
        .filter(|event| match event {
            DirectiveEvent::ModulesEnabled(v)
            | DirectiveEvent::DefinesAdded(v)
            | DirectiveEvent::IncludesAdded(v)
            | DirectiveEvent::LibsAdded(v) => !v.is_empty(),
            _ => true,
        })
        .collect())
}

/// Parses a `;`-separated command string, as given with `-c`.
pub fn parse_commands(commands: &str) -> Result<Vec<DirectiveEvent>, ParseError> {
    let mut events = Vec::new();
    for command in commands.split(';') {
        events.extend(parse_command(command)?);
    }
    Ok(events)
}

fn parse_target(args: &[&str]) -> Result<Vec<DirectiveEvent>, ParseError> {
    match args {
        ["name", name, ..] => Ok(vec![DirectiveEvent::TargetName(name.to_string())]),
        ["type", kind, rest @ ..] => {
            let kind = match *kind {
                "app" => TargetKind::Application,
                "lib" => TargetKind::Library,
                other => return Err(ParseError::InvalidTargetType(other.to_string())),
            };
            let linkage = match rest.first() {
                Some(&"static") => Some(Linkage::Static),
                Some(&"dynamic") => Some(Linkage::Dynamic),
                Some(other) => return Err(ParseError::InvalidTargetType(other.to_string())),
                None => None,
            };
            Ok(vec![DirectiveEvent::TargetType(kind, linkage)])
        }
        ["name"] | ["type"] => Err(ParseError::MissingArgument(format!("target {}", args[0]))),
        _ => Ok(Vec::new()),
    }
}

/// `feature <name> [<header>] [default on|off]`
fn parse_feature(args: &[&str]) -> Result<Vec<DirectiveEvent>, ParseError> {
    let Some((name, rest)) = args.split_first() else {
        return Err(ParseError::MissingArgument("feature".to_string()));
    };

    let default_enabled = match rest.iter().position(|w| *w == "default") {
        Some(i) => rest.get(i + 1) != Some(&"off"),
        None => !rest.contains(&"off"),
    };

    Ok(vec![DirectiveEvent::FeatureDeclared {
        name: name.to_string(),
        default_enabled,
    }])
}
