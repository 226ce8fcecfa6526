//! Optional build features.
//!
//! A source file declares a feature with `//i feature tts-support default off`.
//! The user flips it on the command line: `gibs main.cpp -- --tts-support`.
//! Enabled features turn into a define (`TTS_SUPPORT`) and open up the
//! `#ifdef TTS_SUPPORT` regions of the include graph.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub define: String,
    /// Set once a source file declared the feature.
    pub defined: bool,
    pub enabled: bool,
}

impl Feature {
    pub fn new(name: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            define: normalize_feature_name(name),
            defined: false,
            enabled,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid feature toggle '{0}', expected --name or --no-name")]
pub struct InvalidFeature(pub String);

pub type FeatureSet = BTreeMap<String, Feature>;

/// `tts-support` becomes `TTS_SUPPORT`.
pub fn normalize_feature_name(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

/// Parses one trailing command-line toggle (`--name` or `--no-name`).
pub fn from_command_line(arg: &str) -> Result<Feature, InvalidFeature> {
    let Some(rest) = arg.strip_prefix("--") else {
        return Err(InvalidFeature(arg.to_string()));
    };

    let (name, enabled) = match rest.strip_prefix("no-") {
        Some(name) => (name, false),
        None => (rest, true),
    };

    if name.is_empty() {
        return Err(InvalidFeature(arg.to_string()));
    }

    Ok(Feature::new(name, enabled))
}

/// Parses all trailing toggles into a set keyed by feature name.
pub fn parse_toggles<S: AsRef<str>>(args: &[S]) -> Result<FeatureSet, InvalidFeature> {
    let mut set = FeatureSet::new();
    for arg in args {
        let feature = from_command_line(arg.as_ref())?;
        set.insert(feature.name.clone(), feature);
    }
    Ok(set)
}

/// True when `define` belongs to a known feature; the flag tells whether it is on.
pub fn define_state(features: &FeatureSet, define: &str) -> Option<bool> {
    features
        .values()
        .find(|f| f.define == define)
        .map(|f| f.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_feature_name() {
        assert_eq!(normalize_feature_name("tts-support"), "TTS_SUPPORT");
        assert_eq!(normalize_feature_name("opengl"), "OPENGL");
    }

    #[test]
    fn test_command_line_enable() {
        let f = from_command_line("--tts-support").unwrap();
        assert_eq!(f.name, "tts-support");
        assert_eq!(f.define, "TTS_SUPPORT");
        assert!(f.enabled);
        assert!(!f.defined);
    }

    #[test]
    fn test_command_line_disable() {
        let f = from_command_line("--no-opengl").unwrap();
        assert_eq!(f.name, "opengl");
        assert!(!f.enabled);
    }

    #[test]
    fn test_command_line_rejects_garbage() {
        assert!(from_command_line("opengl").is_err());
        assert!(from_command_line("--").is_err());
        assert!(from_command_line("--no-").is_err());
    }

    #[test]
    fn test_define_state() {
        let set = parse_toggles(&["--my-feature", "--no-other"]).unwrap();
        assert_eq!(define_state(&set, "MY_FEATURE"), Some(true));
        assert_eq!(define_state(&set, "OTHER"), Some(false));
        assert_eq!(define_state(&set, "UNKNOWN"), None);
    }
}
