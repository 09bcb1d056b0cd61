//! # Shader Source Generator
//!
//! Expands one annotated kernel template into a family of variants, variant `i`
//! being specialised for a work-group of `2^i` invocations.
//!
//! Two directives are recognised, scanned line by line:
//!
//! - `/*SIZE*/` is replaced by the decimal group size.
//! - `/*REPEAT(body)*/` is replaced by `2^i` lines of `body`, each prefixed with
//!   the indentation that preceded the directive, with every `#ID#` in the body
//!   replaced by the replication index.
//!
//! Everything else is copied verbatim. Substitution is purely textual.

pub mod template;

pub use template::*;
