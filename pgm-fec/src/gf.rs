//! GF(2^8) arithmetic.
//!
//! Field built over the primitive polynomial `1 + x^2 + x^3 + x^4 + x^8` (reduction byte
//! `0x1D`, i.e. `0x11D` with the implicit x^8 bit dropped). Logarithm/antilog tables are
//! precomputed once and cached process-wide.

use once_cell::sync::Lazy;

const REDUCTION: u16 = 0x11D;

struct Tables {
    log: [u8; 256],
    antilog: [u8; 256],
}

static TABLES: Lazy<Tables> = Lazy::new(build_tables);

fn build_tables() -> Tables {
    let mut log = [0u8; 256];
    let mut antilog = [0u8; 256];
    let mut x: u16 = 1;
    for i in 0..255usize {
        antilog[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= REDUCTION;
        }
    }
    antilog[255] = antilog[0]; // periodic, convenience for modular index arithmetic
    Tables { log, antilog }
}

/// `gfmul(a,b) = antilog[(log a + log b) mod 255]`; either operand zero yields zero.
pub fn gfmul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = &*TABLES;
    let sum = t.log[a as usize] as u16 + t.log[b as usize] as u16;
    t.antilog[(sum % 255) as usize]
}

/// Multiplicative inverse in GF(2^8); panics on zero (callers must check).
pub fn gfinv(a: u8) -> u8 {
    assert!(a != 0, "zero has no multiplicative inverse");
    let t = &*TABLES;
    let log_a = t.log[a as usize] as u16;
    t.antilog[((255 - log_a) % 255) as usize]
}

pub fn gfdiv(a: u8, b: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    gfmul(a, gfinv(b))
}

/// `dst[i] ^= b * src[i]` for all `i`; no-op when `b == 0`. An eight-at-a-time unrolled loop
/// is the textbook form; the compiler auto-vectorises this tight slice loop equally well and
/// keeps the code legible.
pub fn vector_fma(dst: &mut [u8], b: u8, src: &[u8]) {
    if b == 0 {
        return;
    }
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= gfmul(b, *s);
    }
}

/// Evaluate a polynomial (low-to-high coefficient order) at `x` via Horner's method.
pub fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gfmul(acc, x) ^ c;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_is_absorbing() {
        assert_eq!(gfmul(0, 5), 0);
        assert_eq!(gfmul(200, 0), 0);
    }

    #[test]
    fn one_is_identity() {
        for a in 1..=255u8 {
            assert_eq!(gfmul(a, 1), a);
        }
    }

    #[test]
    fn mul_is_commutative() {
        for a in [1u8, 3, 7, 200, 254] {
            for b in [1u8, 2, 9, 128, 255] {
                assert_eq!(gfmul(a, b), gfmul(b, a));
            }
        }
    }

    #[test]
    fn inverse_round_trips() {
        for a in 1..=255u8 {
            let inv = gfinv(a);
            assert_eq!(gfmul(a, inv), 1);
        }
    }

    proptest! {
        #[test]
        fn mul_commutative_prop(a: u8, b: u8) {
            prop_assert_eq!(gfmul(a, b), gfmul(b, a));
        }

        #[test]
        fn div_undoes_mul(a: u8, b in 1u8..=255) {
            prop_assert_eq!(gfdiv(gfmul(a, b), b), a);
        }
    }
}
