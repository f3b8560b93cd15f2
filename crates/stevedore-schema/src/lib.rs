//! Input schema for stevedore bundle builds.
//!
//! This crate defines what a build is asked to do: the runtime parameters
//! document (`Image`, `Name`, `Entrypoint`) read at startup, its immutable
//! in-memory form `RuntimeParameters`, and `ImageReference` parsing used by the
//! image presence check.

pub mod params;
pub mod reference;

pub use params::{
    parse_parameters_file, parse_parameters_str, ParametersDocument, ParamsError,
    RuntimeParameters,
};
pub use reference::{ImageReference, DEFAULT_TAG};
