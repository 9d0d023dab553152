//! Systematic Reed-Solomon(n,k) codec over GF(2^8).
//!
//! `GM` is an `n x k` generator matrix built from the Vandermonde matrix `V[i][j] =
//! alpha^(i*j)` (`i` in `[0,n)`, `j` in `[0,k)`): `GM = V . V_top^-1`, where `V_top` is the
//! first `k` rows of `V`. This makes the code systematic — `GM`'s first `k` rows are the
//! identity, rows `[k,n)` hold the parity coefficients for offsets `[k,n)`.

use crate::gf::vector_fma;
use crate::matrix::{vandermonde_inverse, Matrix};
use once_cell::sync::Lazy;
use pgm_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// The alpha used to generate field powers; must be a primitive element of GF(2^8). `0x02`
/// is primitive under the `0x1D` reduction polynomial used by [`crate::gf`].
const ALPHA: u8 = 0x02;

fn alpha_pow(exp: usize) -> u8 {
    let mut acc = 1u8;
    let mut base = ALPHA;
    let mut e = exp;
    // Exponent can exceed 255 for large transmission groups; reduce modulo the field's
    // multiplicative order (255) first.
    e %= 255;
    while e > 0 {
        if e & 1 == 1 {
            acc = crate::gf::gfmul(acc, base);
        }
        base = crate::gf::gfmul(base, base);
        e >>= 1;
    }
    acc
}

/// `n x k` systematic generator matrix.
#[derive(Debug, Clone)]
pub struct Generator {
    pub n: usize,
    pub k: usize,
    rows: Vec<Vec<u8>>,
}

impl Generator {
    fn build(n: usize, k: usize) -> Result<Self> {
        if k == 0 || n < k {
            return Err(Error::invalid_argument("RS(n,k) requires 0 < k <= n"));
        }
        // Full n x k Vandermonde matrix: V[i][j] = alpha^(i*j).
        let mut v = vec![vec![0u8; k]; n];
        for (i, row) in v.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = alpha_pow(i * j);
            }
        }
        let nodes: Vec<u8> = (0..k).map(alpha_pow).collect();
        let v_top_inv = vandermonde_inverse(&nodes)?;

        let mut rows = vec![vec![0u8; k]; n];
        for p in 0..n {
            for j in 0..k {
                let mut acc = 0u8;
                for m in 0..k {
                    acc ^= crate::gf::gfmul(v[p][m], v_top_inv.rows[m][j]);
                }
                rows[p][j] = acc;
            }
        }
        // Systematic check is a logical invariant; debug_assert rather than a hot-path cost.
        #[cfg(debug_assertions)]
        {
            for p in 0..k {
                for j in 0..k {
                    let expect = if p == j { 1 } else { 0 };
                    debug_assert_eq!(rows[p][j], expect, "generator not systematic");
                }
            }
        }
        Ok(Self { n, k, rows })
    }

    pub fn row(&self, offset: usize) -> &[u8] {
        &self.rows[offset]
    }
}

static CACHE: Lazy<Mutex<HashMap<(u16, u16), std::sync::Arc<Generator>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Fetch (building and caching if necessary) the generator matrix for `RS(n,k)`.
pub fn generator(n: usize, k: usize) -> Result<std::sync::Arc<Generator>> {
    let key = (n as u16, k as u16);
    let mut cache = CACHE.lock().expect("generator cache lock poisoned");
    if let Some(g) = cache.get(&key) {
        return Ok(g.clone());
    }
    let g = std::sync::Arc::new(Generator::build(n, k)?);
    cache.insert(key, g.clone());
    Ok(g)
}

/// Recovery-matrix row for `offset`: identity row if `offset < k`, else the generator's
/// parity row.
fn recovery_row(gm: &Generator, offset: usize, k: usize) -> Vec<u8> {
    if offset < k {
        let mut row = vec![0u8; k];
        row[offset] = 1;
        row
    } else {
        gm.row(offset).to_vec()
    }
}

/// Produce the parity packet at offset `p in [k,n)` over `src` (exactly `k` original
/// packets, equal length).
pub fn encode(n: usize, k: usize, p: usize, src: &[&[u8]]) -> Result<Vec<u8>> {
    if src.len() != k {
        return Err(Error::invalid_argument("encode requires exactly k sources"));
    }
    if !(k..n).contains(&p) {
        return Err(Error::invalid_argument("parity offset out of range"));
    }
    let len = src.first().map_or(0, |s| s.len());
    if src.iter().any(|s| s.len() != len) {
        return Err(Error::invalid_argument("source packets must be equal length"));
    }
    let gm = generator(n, k)?;
    let row = gm.row(p);
    let mut out = vec![0u8; len];
    for (i, coeff) in row.iter().enumerate() {
        if *coeff != 0 {
            vector_fma(&mut out, *coeff, src[i]);
        }
    }
    Ok(out)
}

/// Reconstruct the `k` original packets of a transmission group from exactly `k` received
/// packets (originals and/or parity) identified by `offsets` (values in `[0,n)`, parallel to
/// `packets`). Returns the full set of `k` original payloads in offset order `[0,k)`.
pub fn decode(n: usize, k: usize, offsets: &[usize], packets: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
    if offsets.len() != k || packets.len() != k {
        tracing::warn!(n, k, have = offsets.len(), "FEC decode: fewer than k packets available");
        return Err(Error::FecInsufficient);
    }
    let len = packets.first().map_or(0, |p| p.len());
    if packets.iter().any(|p| p.len() != len) {
        return Err(Error::invalid_argument("packets must be equal length"));
    }
    {
        let mut seen = offsets.to_vec();
        seen.sort_unstable();
        if seen.windows(2).any(|w| w[0] == w[1]) || seen.iter().any(|&o| o >= n) {
            tracing::warn!(n, k, ?offsets, "FEC decode: duplicate or out-of-range offsets");
            return Err(Error::FecSingular);
        }
    }

    let gm = generator(n, k)?;
    let rm = Matrix::from_rows(
        offsets
            .iter()
            .map(|&o| recovery_row(&gm, o, k))
            .collect(),
    );
    let rm_inv = rm.invert_general().inspect_err(|err| {
        tracing::warn!(n, k, %err, "FEC decode: recovery matrix inversion failed");
    })?;

    let mut originals = vec![vec![0u8; len]; k];
    for (j, original) in originals.iter_mut().enumerate() {
        for i in 0..k {
            let coeff = rm_inv.rows[j][i];
            if coeff != 0 {
                vector_fma(original, coeff, packets[i]);
            }
        }
    }
    Ok(originals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sources(k: usize, len: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|i| (0..len).map(|b| ((i * 31 + b * 7) % 251) as u8).collect())
            .collect()
    }

    #[test]
    fn single_loss_recovered_from_one_parity() {
        let (n, k) = (5, 4);
        let sources = make_sources(k, 16);
        let src_refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let parity = encode(n, k, k, &src_refs).unwrap();

        // Lose original #2; feed originals 0,1,3 plus parity at offset k.
        let offsets = [0, 1, 3, k];
        let packets: Vec<&[u8]> = vec![&sources[0], &sources[1], &sources[3], &parity];
        let recovered = decode(n, k, &offsets, &packets).unwrap();
        assert_eq!(recovered[2], sources[2]);
        for i in [0, 1, 3] {
            assert_eq!(recovered[i], sources[i]);
        }
    }

    #[test]
    fn any_offset_combination_recovers_any_original() {
        let (n, k) = (6, 4);
        let sources = make_sources(k, 8);
        let src_refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let parity_k = encode(n, k, k, &src_refs).unwrap();
        let parity_k1 = encode(n, k, k + 1, &src_refs).unwrap();

        for missing in 0..k {
            let mut offsets: Vec<usize> = (0..k).filter(|&i| i != missing).collect();
            offsets.push(k);
            let mut packets: Vec<&[u8]> = (0..k)
                .filter(|&i| i != missing)
                .map(|i| sources[i].as_slice())
                .collect();
            packets.push(&parity_k);
            let recovered = decode(n, k, &offsets, &packets).unwrap();
            assert_eq!(recovered[missing], sources[missing]);
        }

        // Using the other parity packet works just as well.
        let mut offsets: Vec<usize> = (1..k).collect();
        offsets.push(k + 1);
        let mut packets: Vec<&[u8]> = (1..k).map(|i| sources[i].as_slice()).collect();
        packets.push(&parity_k1);
        let recovered = decode(n, k, &offsets, &packets).unwrap();
        assert_eq!(recovered[0], sources[0]);
    }

    #[test]
    fn insufficient_packets_fail() {
        let (n, k) = (5, 4);
        let sources = make_sources(k, 8);
        let offsets = [0, 1, 2];
        let packets: Vec<&[u8]> = vec![&sources[0], &sources[1], &sources[2]];
        assert!(matches!(
            decode(n, k, &offsets, &packets),
            Err(Error::FecInsufficient)
        ));
    }

    #[test]
    fn duplicate_offsets_are_singular() {
        let (n, k) = (5, 4);
        let sources = make_sources(k, 8);
        let src_refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let parity = encode(n, k, k, &src_refs).unwrap();
        let offsets = [0, 1, 1, k];
        let packets: Vec<&[u8]> = vec![&sources[0], &sources[1], &sources[1], &parity];
        assert!(matches!(
            decode(n, k, &offsets, &packets),
            Err(Error::FecSingular)
        ));
    }

    #[test]
    fn generator_is_cached_across_calls() {
        let a = generator(10, 4).unwrap();
        let b = generator(10, 4).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
