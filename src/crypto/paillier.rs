//! The Paillier cryptosystem.
//!
//! An additive homomorphic scheme: multiplying two ciphertexts adds the
//! underlying plaintexts, raising a ciphertext to an integer power multiplies
//! the underlying plaintext by that integer. There is no native subtraction;
//! it is expressed as scalar multiplication by `-1` followed by addition.
//!
//! All operations are pure functions over immutable inputs and are safe to
//! call concurrently from any number of callers holding only the public key.
//! Key generation is the one exception: it must run exactly once per
//! deployment, since two key pairs would silently fragment ciphertexts
//! already in flight. Callers are expected to generate the pair at startup
//! and share the [`PublicKey`] by reference from then on.

use num::{
    bigint::{BigInt, BigUint, Sign},
    Integer, One, Zero,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{
    encoding::{decode, encode},
    prime::{generate_prime, random_below},
};

/// Smallest modulus length considered safe enough to generate.
pub const MIN_KEY_BITS: usize = 512;

/// Default modulus length.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Error returned by the cryptosystem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaillierError {
    #[error("key generation failed: a modulus of {0} bits is below the minimum of 512 bits")]
    KeyGeneration(usize),
    #[error("the scaled plaintext magnitude exceeds the encodable range")]
    EncodingOverflow,
    #[error("the ciphertext was not produced under the paired public key")]
    DecryptionKeyMismatch,
}

/// The shareable half of a key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// The modulus `n = p * q`.
    n: BigUint,
    /// The generator `g = n + 1`.
    g: BigUint,
    /// Cached `n^2`, the ciphertext modulus.
    n_squared: BigUint,
}

/// The decryption half of a key pair. Must only ever be held by the
/// decryption authority, never by the coordinator or a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    /// `lcm(p - 1, q - 1)`.
    lambda: BigUint,
    /// `L(g^lambda mod n^2)^-1 mod n`.
    mu: BigUint,
    n: BigUint,
    n_squared: BigUint,
}

/// A Paillier key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// The public key.
    pub public: PublicKey,
    /// The secret key.
    pub secret: PrivateKey,
}

/// An encrypted scalar. Opaque and immutable once produced; only meaningful
/// together with the key pair it was produced under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(BigUint);

impl KeyPair {
    /// Generates a fresh key pair with a modulus of `security_bits` bits.
    ///
    /// # Errors
    /// Fails if `security_bits` is below [`MIN_KEY_BITS`].
    pub fn generate(security_bits: usize) -> Result<Self, PaillierError> {
        if security_bits < MIN_KEY_BITS {
            return Err(PaillierError::KeyGeneration(security_bits));
        }
        let mut rng = rand::thread_rng();
        loop {
            let p = generate_prime(security_bits / 2, &mut rng);
            let q = generate_prime(security_bits / 2, &mut rng);
            if p == q {
                continue;
            }
            let n = &p * &q;
            let n_squared = &n * &n;
            let g = &n + 1_u32;
            let lambda = (&p - 1_u32).lcm(&(&q - 1_u32));
            let u = g.modpow(&lambda, &n_squared);
            let l = (u - 1_u32) / &n;
            // invertible whenever p and q are distinct primes; a failed
            // inversion means the candidate pair was degenerate
            match modinv(&l, &n) {
                Some(mu) => {
                    return Ok(Self {
                        public: PublicKey {
                            n: n.clone(),
                            g,
                            n_squared: n_squared.clone(),
                        },
                        secret: PrivateKey {
                            lambda,
                            mu,
                            n,
                            n_squared,
                        },
                    });
                }
                None => continue,
            }
        }
    }
}

impl PublicKey {
    /// Encrypts a real value under this key.
    ///
    /// Every call draws a fresh random nonce, so two encryptions of the same
    /// plaintext differ with overwhelming probability.
    ///
    /// # Errors
    /// Fails with [`PaillierError::EncodingOverflow`] if the scaled magnitude
    /// does not fit the plaintext space.
    pub fn encrypt(&self, value: f64) -> Result<Ciphertext, PaillierError> {
        let m = encode(value, &self.n)?;
        let r = self.random_nonce();
        let c = (self.g.modpow(&m, &self.n_squared) * r.modpow(&self.n, &self.n_squared))
            % &self.n_squared;
        Ok(Ciphertext(c))
    }

    /// Homomorphic addition: the result decrypts to the sum of the two
    /// operands' plaintexts, up to fixed-point rounding.
    pub fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Ciphertext {
        Ciphertext(&c1.0 * &c2.0 % &self.n_squared)
    }

    /// Homomorphic scalar multiplication: the result decrypts to `k` times
    /// the operand's plaintext. Negative factors use the symmetric exponent
    /// `n - |k|`.
    pub fn scalar_mul(&self, c: &Ciphertext, k: i64) -> Ciphertext {
        let exponent = if k < 0 {
            &self.n - BigUint::from(k.unsigned_abs()) % &self.n
        } else {
            BigUint::from(k as u64)
        };
        Ciphertext(c.0.modpow(&exponent, &self.n_squared))
    }

    /// A fresh random nonce in `[1, n)` coprime to `n`.
    fn random_nonce(&self) -> BigUint {
        let mut rng = rand::thread_rng();
        loop {
            let r = random_below(&self.n, &mut rng);
            if !r.is_zero() && r.gcd(&self.n).is_one() {
                return r;
            }
        }
    }
}

impl PrivateKey {
    /// Decrypts a ciphertext produced under the paired public key.
    ///
    /// # Errors
    /// Fails with [`PaillierError::DecryptionKeyMismatch`] if the ciphertext
    /// was produced under a different key. There is no embedded tag: the
    /// mismatch is detected because the decoded residue lands outside the
    /// range the encoder can produce.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<f64, PaillierError> {
        let u = c.0.modpow(&self.lambda, &self.n_squared);
        // a well-formed ciphertext is a unit modulo n^2, so u is never
        // zero; zero means the ciphertext cannot come from encrypt
        if u.is_zero() {
            return Err(PaillierError::DecryptionKeyMismatch);
        }
        let l = (u - 1_u32) / &self.n;
        let m = l * &self.mu % &self.n;
        decode(m, &self.n)
    }
}

/// Modular inverse of `a` modulo `m`, if it exists.
fn modinv(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let m = BigInt::from_biguint(Sign::Plus, m.clone());
    let e = a.extended_gcd(&m);
    if !e.gcd.is_one() {
        return None;
    }
    let mut x = e.x % &m;
    if x.sign() == Sign::Minus {
        x += &m;
    }
    x.to_biguint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encoding::FIXED_POINT_EPSILON;

    fn key_pair() -> KeyPair {
        KeyPair::generate(MIN_KEY_BITS).unwrap()
    }

    #[test]
    fn test_rejects_weak_modulus() {
        assert_eq!(
            KeyPair::generate(128).unwrap_err(),
            PaillierError::KeyGeneration(128)
        );
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let keys = key_pair();
        for v in &[0.0, 10.5, -20.3, 0.000001, 12345.678901] {
            let c = keys.public.encrypt(*v).unwrap();
            let decrypted = keys.secret.decrypt(&c).unwrap();
            assert!((decrypted - v).abs() <= FIXED_POINT_EPSILON);
        }
    }

    #[test]
    fn test_homomorphic_addition() {
        let keys = key_pair();
        let c1 = keys.public.encrypt(10.5).unwrap();
        let c2 = keys.public.encrypt(20.3).unwrap();
        let sum = keys.public.add(&c1, &c2);
        let decrypted = keys.secret.decrypt(&sum).unwrap();
        assert!((decrypted - 30.8).abs() <= 2.0 * FIXED_POINT_EPSILON);
    }

    #[test]
    fn test_homomorphic_addition_with_negatives() {
        let keys = key_pair();
        let c1 = keys.public.encrypt(10.5).unwrap();
        let c2 = keys.public.encrypt(-20.3).unwrap();
        let sum = keys.public.add(&c1, &c2);
        let decrypted = keys.secret.decrypt(&sum).unwrap();
        assert!((decrypted + 9.8).abs() <= 2.0 * FIXED_POINT_EPSILON);
    }

    #[test]
    fn test_scalar_multiplication() {
        let keys = key_pair();
        let c = keys.public.encrypt(10.5).unwrap();
        let doubled = keys.public.scalar_mul(&c, 2);
        assert!((keys.secret.decrypt(&doubled).unwrap() - 21.0).abs() <= 2.0 * FIXED_POINT_EPSILON);
        let negated = keys.public.scalar_mul(&c, -1);
        assert!((keys.secret.decrypt(&negated).unwrap() + 10.5).abs() <= FIXED_POINT_EPSILON);
    }

    #[test]
    fn test_subtraction_via_negation() {
        let keys = key_pair();
        let c1 = keys.public.encrypt(30.0).unwrap();
        let c2 = keys.public.encrypt(12.5).unwrap();
        let diff = keys.public.add(&c1, &keys.public.scalar_mul(&c2, -1));
        assert!((keys.secret.decrypt(&diff).unwrap() - 17.5).abs() <= 2.0 * FIXED_POINT_EPSILON);
    }

    #[test]
    fn test_ciphertexts_are_randomized() {
        let keys = key_pair();
        let c1 = keys.public.encrypt(1.0).unwrap();
        let c2 = keys.public.encrypt(1.0).unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_wrong_key_is_detected() {
        let keys = key_pair();
        let other = key_pair();
        let c = keys.public.encrypt(10.5).unwrap();
        assert_eq!(
            other.secret.decrypt(&c).unwrap_err(),
            PaillierError::DecryptionKeyMismatch
        );
    }

    #[test]
    fn test_zero_ciphertext_is_rejected() {
        // ciphertexts deserialize from untrusted submissions; a zero value
        // never comes from encrypt and must surface as an error, also after
        // it has been folded into a homomorphic sum
        let keys = key_pair();
        let zero = Ciphertext(BigUint::zero());
        assert_eq!(
            keys.secret.decrypt(&zero).unwrap_err(),
            PaillierError::DecryptionKeyMismatch
        );
        let folded = keys.public.add(&keys.public.encrypt(1.0).unwrap(), &zero);
        assert_eq!(
            keys.secret.decrypt(&folded).unwrap_err(),
            PaillierError::DecryptionKeyMismatch
        );
    }

    #[test]
    fn test_encoding_overflow_surfaces() {
        let keys = key_pair();
        assert_eq!(
            keys.public.encrypt(1e30).unwrap_err(),
            PaillierError::EncodingOverflow
        );
    }
}
