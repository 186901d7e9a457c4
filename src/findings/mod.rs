//! Finding normalization from engine artifacts.

pub mod index;
pub mod markdown;
pub mod normalizer;

pub use normalizer::{normalize_findings, read_run_dir, Candidate};
