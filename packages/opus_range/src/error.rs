use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Argument errors reported by the range coder.
///
/// Running out of buffer space and reading a corrupt stream are not reported
/// through this type. Those set the coder's sticky error flag instead, see
/// [`RangeEncoder::ec_get_error`](crate::range::RangeEncoder::ec_get_error).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Range encoder error: {0}")]
    RangeEncoder(String),

    #[error("Range decoder error: {0}")]
    RangeDecoder(String),
}
