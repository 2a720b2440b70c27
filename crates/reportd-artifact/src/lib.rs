//! # reportd artifact
//!
//! Turns the pages a backend produced into the file that is stored and
//! mailed: a laid-out PDF, the first screenshot, or an HTML page. Every
//! artifact carries its SHA-256 so a stored report can be verified later.

pub mod assemble;
pub mod pdf;
pub mod png;

pub use assemble::{
    AssembleOptions, Artifact, artifact_filename, assemble, checksum, persist, tenant_dir,
};
pub use pdf::PdfOptions;
