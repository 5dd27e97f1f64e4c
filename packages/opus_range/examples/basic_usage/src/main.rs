#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Basic Opus Range Coder Usage Example
//!
//! This example walks through the `moosicbox_opus_range` API:
//! - Encoding symbols from an inverse CDF table, uniform integers and raw bits
//! - Patching header bits once the rest of the frame is known
//! - Trial encoding with snapshot/restore
//! - Decoding the packet back and comparing bit counts and final ranges
//!
//! Run with `RUST_LOG=trace` to see the coder's own log output.

use moosicbox_opus_range::{RangeDecoder, RangeEncoder};

/// Probability of each of four "band energy" classes, most likely first.
const CLASS_ICDF: [u8; 4] = [180, 90, 30, 0];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    println!("=== MoosicBox Opus Range Coder - Basic Usage Example ===\n");

    let classes = [0_usize, 0, 1, 0, 2, 0, 1, 3, 0, 0];
    let gain = 1234_u32;
    let fine_bits = [(0b101_u32, 3_u32), (0x3F, 6), (0x1, 1)];

    let mut packet = [0_u8; 32];
    let mut encoder = RangeEncoder::new(&mut packet);

    println!("Example 1: encoding");
    println!("---------------------------------------------------");

    // Placeholder header bits, filled in once the frame is complete
    encoder.ec_enc_bit_logp(false, 1)?;
    encoder.ec_enc_bit_logp(false, 1)?;

    for &class in &classes {
        encoder.ec_enc_icdf(class, &CLASS_ICDF, 8)?;
    }
    encoder.ec_enc_uint(gain, 4096)?;
    println!(
        "✓ Encoded {} classes and a gain, {} bits so far",
        classes.len(),
        encoder.ec_tell()
    );

    // Trial encoding: keep the cheaper of two alternatives
    let snapshot = encoder.snapshot();
    encoder.ec_enc_uint(17, 1 << 20)?;
    let expensive = encoder.ec_tell_frac();
    encoder.restore(&snapshot)?;
    encoder.ec_enc_bit_logp(true, 4)?;
    let cheap = encoder.ec_tell_frac();
    log::info!("trial encoding: uint={expensive} bit={cheap} (1/8 bits)");
    println!("✓ Trial encoding kept the cheaper option ({cheap} eighth-bits)");

    for &(value, bits) in &fine_bits {
        encoder.ec_enc_bits(value, bits)?;
    }

    // Both header bits are now known
    encoder.ec_enc_patch_initial_bits(0b10, 2)?;
    encoder.ec_enc_done();

    if encoder.ec_get_error() {
        return Err("packet buffer too small".into());
    }

    let total_bits = encoder.ec_tell();
    let final_range = encoder.get_range();
    println!(
        "✓ Packet: {} range-coded bytes, {total_bits} bits, final range {final_range:#010x}",
        encoder.ec_range_bytes()
    );
    println!("  Bytes: {:02x?}\n", encoder.buffer());

    println!("Example 2: decoding");
    println!("---------------------------------------------------");
    let mut decoder = RangeDecoder::new(&packet);

    let header = [decoder.ec_dec_bit_logp(1)?, decoder.ec_dec_bit_logp(1)?];
    println!("✓ Header bits: {header:?}");

    let decoded_classes = (0..classes.len())
        .map(|_| decoder.ec_dec_icdf(&CLASS_ICDF, 8))
        .collect::<Result<Vec<_>, _>>()?;
    println!("✓ Classes: {decoded_classes:?}");

    let decoded_gain = decoder.ec_dec_uint(4096)?;
    println!("✓ Gain: {decoded_gain}");

    let flag = decoder.ec_dec_bit_logp(4)?;
    println!("✓ Trial flag: {flag}");

    for &(value, bits) in &fine_bits {
        let decoded = decoder.ec_dec_bits(bits)?;
        println!("✓ Fine bits ({bits}): {decoded:#b} (expected {value:#b})");
    }

    println!(
        "\nEncoder/decoder agreement: bits {total_bits}/{}, final range {final_range:#010x}/{:#010x}",
        decoder.ec_tell(),
        decoder.get_range()
    );

    Ok(())
}
