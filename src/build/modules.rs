//! Qt module list to compiler and linker flags.

use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFlags {
    pub defines: Vec<String>,
    pub includes: Vec<String>,
    pub libs: Vec<String>,
}

impl ModuleFlags {
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty() && self.includes.is_empty() && self.libs.is_empty()
    }
}

/// `core` -> `Core`, with the two modules whose names are not simply capitalised.
pub fn module_dir_name(module: &str) -> String {
    match module {
        "quickcontrols2" => "QuickControls2".to_string(),
        "quickwidgets" => "QuickWidgets".to_string(),
        _ => {
            let mut chars = module.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

pub fn module_flags(modules: &[String], qt_dir: &Path, debug_build: bool) -> ModuleFlags {
    if modules.is_empty() {
        return ModuleFlags::default();
    }

    let qt = qt_dir.display();
    let mut flags = ModuleFlags::default();

    for module in modules {
        flags
            .defines
            .push(format!("-DQT_{}_LIB", module.to_uppercase()));
    }
    flags.defines.push(if debug_build {
        "-DQT_QML_DEBUG".to_string()
    } else {
        "-DQT_NO_DEBUG".to_string()
    });

    flags.includes.push(format!("-I{}/include", qt));
    flags.includes.push(format!("-I{}/mkspecs/linux-g++", qt));
    for module in modules {
        flags
            .includes
            .push(format!("-I{}/include/Qt{}", qt, module_dir_name(module)));
    }

    flags.libs.push(format!("-Wl,-rpath,{}/lib", qt));
    flags.libs.push(format!("-L{}/lib", qt));
    for module in modules {
        flags.libs.push(format!("-lQt5{}", module_dir_name(module)));
    }
    flags.libs.push("-lpthread".to_string());

    flags
}
