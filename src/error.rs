//! Error taxonomy (spec.md §7).
//!
//! Only the fatal/structural cases are represented here. The
//! non-fatal cases from spec.md §7 (parse errors, handler body
//! faults, unknown MODE strings, callback-broker timeouts) are not
//! `Error` variants: they're logged and/or folded into an `Option`,
//! matching how callers are meant to observe them (spec.md §7).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required configuration option: {missing}")]
    Config { missing: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "tls-rustls")]
    #[error("tls error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
