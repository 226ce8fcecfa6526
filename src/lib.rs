//! # gibs - in-source C++ build tool
//!
//! gibs builds C++ (and Qt) projects without a project file. Build
//! directives live in tagged comments inside the sources:
//!
//! ```cpp
//! //i target name calculator
//! //i qt core gui widgets
//! //i subproject engine/engine.cpp
//! ```
//!
//! gibs starts at the entry file, follows local `#include`s, collects the
//! directives and turns them into compile, code generation, archive and link
//! processes. A cache (`.gibs.cache`) makes later runs incremental.
//!
//! ## Module Organization
//!
//! - [`parser`] - Directive events from tagged comments
//! - [`build`] - Build units, task scheduler, cache
//! - [`config`] - Run flags and remembered toolchain paths
//! - [`toolchain`] - Compiler and deployer profiles

/// Build units, scheduling and the incremental cache.
pub mod build;

/// Run flags and remembered toolchain paths (`gibs.toml`).
pub mod config;

/// Optional build features toggled from the command line.
pub mod feature;

/// Directive parsing for source files and `-c` command strings.
pub mod parser;

/// Compiler and deployer profiles.
pub mod toolchain;

/// Terminal UI utilities (tables, progress, report).
pub mod ui;
