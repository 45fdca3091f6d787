//! Probabilistic prime generation for the cryptosystem.
//!
//! Candidates are drawn uniformly at the requested bit length, screened by
//! trial division against small primes and then subjected to Miller-Rabin.

use num::{bigint::BigUint, Integer, One, Zero};
use rand::Rng;

/// Number of Miller-Rabin rounds. Each round has an error probability of at
/// most 1/4, so 40 rounds push the overall error below 2^-80.
const MILLER_RABIN_ROUNDS: usize = 40;

/// Small primes used for trial division before running Miller-Rabin.
const SMALL_PRIMES: &[u32] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Generates a random prime of exactly `bits` bits.
///
/// The two most significant bits are forced so that the product of two such
/// primes always reaches the full modulus length.
pub fn generate_prime<R: Rng>(bits: usize, rng: &mut R) -> BigUint {
    assert!(bits >= 16, "prime bit length too small");
    loop {
        let candidate = random_candidate(bits, rng);
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

/// Draws a uniform value below `bound` by rejection sampling.
pub fn random_below<R: Rng>(bound: &BigUint, rng: &mut R) -> BigUint {
    assert!(!bound.is_zero(), "empty sampling range");
    let bits = bound.bits();
    let nbytes = ((bits + 7) / 8) as usize;
    let excess = (nbytes as u64 * 8 - bits) as usize;
    let mut bytes = vec![0_u8; nbytes];
    loop {
        rng.fill_bytes(&mut bytes);
        bytes[0] &= 0xff >> excess;
        let candidate = BigUint::from_bytes_be(&bytes);
        if &candidate < bound {
            return candidate;
        }
    }
}

/// Random odd candidate of exactly `bits` bits with the top two bits set.
fn random_candidate<R: Rng>(bits: usize, rng: &mut R) -> BigUint {
    let nbytes = (bits + 7) / 8;
    let excess = nbytes * 8 - bits;
    let mut bytes = vec![0_u8; nbytes];
    rng.fill_bytes(&mut bytes);
    bytes[0] &= 0xff >> excess;
    bytes[0] |= 0xc0 >> excess;
    bytes[nbytes - 1] |= 1;
    BigUint::from_bytes_be(&bytes)
}

/// Miller-Rabin primality test with random witnesses.
pub fn is_probable_prime<R: Rng>(n: &BigUint, rng: &mut R) -> bool {
    for &p in SMALL_PRIMES {
        let p_big = BigUint::from(p);
        if *n == p_big {
            return true;
        }
        if (n % p).is_zero() {
            return false;
        }
    }
    if *n < BigUint::from(2_u32) {
        return false;
    }

    let one = BigUint::one();
    let two = BigUint::from(2_u32);
    let n_minus_one = n - &one;
    // n - 1 = d * 2^s with d odd
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        // witness in [2, n - 2]
        let a = random_below(&(n - &BigUint::from(3_u32)), rng) + &two;
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..s.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
