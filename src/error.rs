//! Error types for mesh-tproxy
//!
//! Errors are categorized by subsystem. The compiler itself has no runtime
//! error paths: every merged, validated configuration produces a valid
//! document. What can fail is everything around it: configuration loading,
//! resolver discovery, table assembly invariants, and the restore
//! collaborator.

use std::io;

use thiserror::Error;

/// Top-level error type for mesh-tproxy
#[derive(Debug, Error)]
pub enum MeshTproxyError {
    /// Configuration errors (parsing, merging, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Table assembly invariant violations
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Restore collaborator errors
    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),

    /// Resolver discovery errors
    #[error("Resolver discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
///
/// Not recovered; returned to the user to fix the file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A recognized field holds a value the compiler cannot use
    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// I/O error while reading the file
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),
}

/// Table assembly invariant violations
///
/// These indicate programmer error in the compiler, never bad user input.
#[derive(Debug, Error)]
pub enum TableError {
    /// A rule jumps to a user chain that was never registered on the table
    #[error("rule references undeclared chain: {0}")]
    ChainReferenceUnresolved(String),
}

/// Restore collaborator errors
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The restore program rejected the document
    ///
    /// The kernel may be left with a partially applied ruleset; the caller
    /// may retry.
    #[error("{program} failed with exit code {exit}: {stderr}")]
    Failed {
        program: String,
        exit: i32,
        stderr: String,
    },

    /// The restore program could not be spawned
    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },

    /// A required iptables extension is not present on this kernel
    ///
    /// Soft failure: callers log a warning and proceed as if the dependent
    /// feature were disabled.
    #[error("iptables extension unavailable: {feature}")]
    CapabilityUnavailable { feature: String },

    /// I/O error while feeding the document to the restore program
    #[error("I/O error talking to restore program: {0}")]
    Io(#[from] io::Error),
}

/// Resolver discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Resolver configuration file not found or unreadable
    #[error("failed to read resolver configuration {path}: {source}")]
    Read { path: String, source: io::Error },
}
