use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Construction-time validation errors.
///
/// Runtime ingress paths never fail: late or duplicate packets, clock
/// regressions and timer races are absorbed locally (logged or ignored).
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("sequence bit width {0} not representable by the sequence type")]
    InvalidSeqBits(u32),
    #[error("rate window must span at least one millisecond and contain at least one item")]
    InvalidRateWindow,
}
