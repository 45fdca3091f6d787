//! Fixed-point encoding of real-valued plaintexts.
//!
//! The cryptosystem operates over integers modulo `n`, so every real value is
//! scaled by [`FIXED_POINT_SCALE`] and rounded to the nearest integer before
//! encryption. Negative values use the symmetric representation `n - |m|`:
//! residues in the lower half of the group are positive, residues in the
//! upper half are negative.
//!
//! Well-formed scaled magnitudes are capped at [`MAX_PLAINTEXT_BITS`] bits.
//! The cap is enforced by the encoder and checked again by the decoder, which
//! is what lets a decryption under the wrong key be detected: the residue
//! such a decryption produces is uniformly spread over the group and exceeds
//! the cap with overwhelming probability.

use num::{bigint::BigUint, traits::FromPrimitive, ToPrimitive};

use crate::crypto::PaillierError;

/// Scale factor applied to plaintexts before rounding.
pub const FIXED_POINT_SCALE: f64 = 1e6;

/// Maximum bit length of a well-formed scaled magnitude.
pub const MAX_PLAINTEXT_BITS: u64 = 96;

/// Tolerance for comparing values that went through the encoding.
pub const FIXED_POINT_EPSILON: f64 = 1.0 / FIXED_POINT_SCALE;

/// Maps a real value to its fixed-point residue modulo `n`.
pub fn encode(value: f64, n: &BigUint) -> Result<BigUint, PaillierError> {
    if !value.is_finite() {
        return Err(PaillierError::EncodingOverflow);
    }
    let scaled = (value * FIXED_POINT_SCALE).round();
    let magnitude =
        BigUint::from_f64(scaled.abs()).ok_or(PaillierError::EncodingOverflow)?;
    if magnitude.bits() > MAX_PLAINTEXT_BITS || &magnitude << 1 >= *n {
        return Err(PaillierError::EncodingOverflow);
    }
    if scaled < 0.0 && !num::Zero::is_zero(&magnitude) {
        Ok(n - magnitude)
    } else {
        Ok(magnitude)
    }
}

/// Maps a residue modulo `n` back to the real value it encodes.
pub fn decode(residue: BigUint, n: &BigUint) -> Result<f64, PaillierError> {
    let half = n >> 1;
    let (negative, magnitude) = if residue > half {
        (true, n - residue)
    } else {
        (false, residue)
    };
    if magnitude.bits() > MAX_PLAINTEXT_BITS {
        return Err(PaillierError::DecryptionKeyMismatch);
    }
    // safe conversion: the magnitude fits in well under f64 range
    let value = magnitude
        .to_f64()
        .ok_or(PaillierError::DecryptionKeyMismatch)?
        / FIXED_POINT_SCALE;
    Ok(if negative { -value } else { value })
}
