//! Fatal error types for startup-time validation.
//!
//! Malformed packets and allocator failures are recoverable and surfaced
//! as log lines plus `bool`/`Option` returns; only catalog/config
//! validation failures are fatal. Those are modeled here as
//! `thiserror`-derived enums so callers at the process boundary (the
//! `demos/` binaries) can log and `std::process::exit(1)`.

use thiserror::Error;

/// Fatal errors raised while loading or validating the classification catalog.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier {name:?} has sigId {sig_id} below the minimum of {min}")]
    ClassifierSigIdTooLow {
        name: String,
        sig_id: u32,
        min: u32,
    },

    #[error(
        "classifier {name:?} has sigId {sig_id} which is not strictly greater than the previous classifier's sigId {previous}"
    )]
    ClassifierSigIdNotIncreasing {
        name: String,
        sig_id: u32,
        previous: u32,
    },

    #[error("signature {sig_id} in block {block:?} has sigId >= {min}, which is reserved for classifiers")]
    SignatureSigIdTooHigh {
        block: String,
        sig_id: u32,
        min: u32,
    },

    #[error(
        "signature {sig_id} in block {block:?} is not strictly greater than the previous signature's id {previous}"
    )]
    SignatureSigIdNotIncreasing {
        block: String,
        sig_id: u32,
        previous: u32,
    },

    #[error("signature {sig_id} in block {block:?} carries tags but is not standalone")]
    TagsOnNonStandaloneSignature { block: String, sig_id: u32 },

    #[error("signature container for signature {sig_id} in block {block:?} has no element child")]
    EmptySignatureContainer { block: String, sig_id: u32 },

    #[error("undefined facet {0:?} referenced by a <tag>")]
    UndefinedFacet(String),

    #[error("malformed catalog XML: {0}")]
    Xml(String),

    #[error("failed to read catalog file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors raised while validating pipeline/module configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown module {0:?} referenced in configuration")]
    UnknownModule(String),

    #[error("failed to parse configuration file {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read configuration file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
