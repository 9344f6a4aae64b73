//! Core types, errors, and configuration for autobuild.
//!
//! This crate provides the foundational types shared by the workspace:
//!
//! - [`ConfigError`] for configuration loading and validation failures
//! - [`Config`] and [`Settings`], the parsed configuration document
//! - [`ProjectDecl`] and [`BuildStrategy`], one declared project
//! - [`ProjectLayout`], the absolute paths derived from a declaration
//! - [`dependency_order`], the load order of declared projects
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod deps;
pub mod error;
pub mod layout;
pub mod project;

pub use config::{BuildConfig, Config, ProcessConfig, ReloadConfig, Settings, WatchConfig};
pub use deps::{DependencyOrder, dependency_order};
pub use error::ConfigError;
pub use layout::{ERROR_DIR_NAME, ERROR_FILE_NAME, EXE_SUFFIX, ProjectLayout, SCRIPT_FILE_NAME};
pub use project::{BuildStrategy, ProjectDecl};

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;
