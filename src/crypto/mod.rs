//! The additive homomorphic cryptosystem.
//!
//! See [`paillier`] for the scheme itself, [`encoding`] for the fixed-point
//! plaintext representation and [`prime`] for key-generation primitives.

pub mod encoding;
pub mod paillier;
pub mod prime;

pub use self::{
    encoding::{FIXED_POINT_EPSILON, FIXED_POINT_SCALE},
    paillier::{
        Ciphertext, KeyPair, PaillierError, PrivateKey, PublicKey, DEFAULT_KEY_BITS, MIN_KEY_BITS,
    },
};
