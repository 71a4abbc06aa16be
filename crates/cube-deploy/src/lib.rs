//! Dependency resolution and workspace synchronization for cube programs.
//!
//! A [`repo::Program`] declares components through `.lib` and `.codes` files.
//! [`resolve`] walks those declarations into a [`graph::ComponentGraph`],
//! [`sync`] brings the working tree in line with it (create, update, remove) and
//! [`pin`] writes the working tree's revisions back into the reference files.

pub mod error;
pub mod graph;
pub mod make;
pub mod ops;
pub mod pin;
pub mod repo;
pub mod resolve;
pub mod scan;
pub mod sync;

pub use error::{DeployError, Result};
