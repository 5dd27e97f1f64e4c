#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! # `MoosicBox` Opus Range Coder
//!
//! Bit-exact implementation of the Opus range coder (`RFC 6716` Section 4.1
//! for decoding, Section 5.1 for encoding). Both SILK and CELT hand their
//! quantized parameters to this coder, so every conforming Opus
//! implementation has to agree with it byte for byte.
//!
//! The coder packs two sub-streams into one buffer:
//!
//! * range-coded symbols, written from the front of the buffer
//! * raw bits, written from the back of the buffer toward the front
//!
//! # Example
//!
//! ```rust
//! use moosicbox_opus_range::range::{RangeDecoder, RangeEncoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let icdf = [200_u8, 120, 40, 0];
//! let mut packet = [0_u8; 16];
//!
//! let mut encoder = RangeEncoder::new(&mut packet);
//! encoder.ec_enc_icdf(2, &icdf, 8)?;
//! encoder.ec_enc_bits(0b101, 3)?;
//! encoder.ec_enc_uint(1000, 1500)?;
//! encoder.ec_enc_done();
//! assert!(!encoder.ec_get_error());
//!
//! let mut decoder = RangeDecoder::new(&packet);
//! assert_eq!(decoder.ec_dec_icdf(&icdf, 8)?, 2);
//! assert_eq!(decoder.ec_dec_bits(3)?, 0b101);
//! assert_eq!(decoder.ec_dec_uint(1500)?, 1000);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod range;
pub mod util;

pub use error::{Error, Result};
pub use range::{RangeDecoder, RangeEncoder, RangeEncoderSnapshot};
