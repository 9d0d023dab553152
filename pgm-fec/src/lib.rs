#![forbid(unsafe_code)]

//! Forward error correction for PGM transmission groups: GF(2^8) arithmetic, Vandermonde
//! matrix inversion, and the systematic Reed-Solomon(n,k) codec built on top of them.

pub mod gf;
pub mod matrix;
pub mod rs;

pub use matrix::Matrix;
pub use rs::{decode, encode, generator, Generator};
