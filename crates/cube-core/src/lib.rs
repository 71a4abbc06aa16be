//! Core data for the cube component manager.
//!
//! Provides the layered key/value config store ([`config::Settings`]), `.lib` and
//! `.codes` reference files, the JSON package index, `.mk` descriptor parsing and
//! the deploy lock file.

pub mod config;
pub mod index;
pub mod lock;
pub mod mk;
pub mod reference;
pub mod walk;

/// Directory that marks a program root and holds its config and lock.
pub const CUBE_DIR: &str = ".cube";
