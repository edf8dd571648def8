//! Shared helpers for the lifecycle crates.

// Enable rustc and Clippy lints that are disabled by default.
// https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html#unused-crate-dependencies
#![warn(unused_crate_dependencies)]
// https://rust-lang.github.io/rust-clippy/stable/index.html
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod toml_file;

pub use toml_file::{read_optional_toml_file, read_toml_file, write_toml_file, TomlFileError};
