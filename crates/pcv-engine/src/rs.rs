//! Reed-Solomon codec over GF(2^8)
//!
//! Systematic Vandermonde construction: share r is the evaluation of the
//! degree-<k polynomial interpolating the k data bytes at the points
//! x_r = α^r (α = 2, field polynomial 0x11D). The first k output bytes are
//! the data itself; the remaining n−k are parity. Decoding runs
//! Berlekamp-Welch and corrects up to ⌊(n−k)/2⌋ byte errors per codeword.
//!
//! The header uses one codeword per field at 3× expansion — (1,3), (5,15),
//! (16,48), (24,72), (32,96), (64,192) — and the body uses (128,136)
//! frames: 8 parity bytes, up to 4 correctable errors per 128-byte chunk.

/// Field polynomial x^8 + x^4 + x^3 + x^2 + 1.
const GF_POLY: u16 = 0x11d;

const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= GF_POLY;
        }
        i += 1;
    }
    // Mirror the table so exp[log a + log b] never needs a reduction.
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    (exp, log)
}

const TABLES: ([u8; 512], [u8; 256]) = build_tables();
const GF_EXP: [u8; 512] = TABLES.0;
const GF_LOG: [u8; 256] = TABLES.1;

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF_EXP[GF_LOG[a as usize] as usize + GF_LOG[b as usize] as usize]
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0);
    GF_EXP[255 - GF_LOG[a as usize] as usize]
}

/// Evaluation point for share r.
#[inline]
fn gf_point(r: usize) -> u8 {
    GF_EXP[r % 255]
}

/// Evaluate a polynomial (coefficients low-to-high) at x.
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ c;
    }
    acc
}

pub(crate) struct RsDecoded {
    pub data: Vec<u8>,
    /// True when the codeword carried errors that were corrected.
    pub repaired: bool,
}

pub(crate) struct RsCode {
    k: usize,
    n: usize,
    /// (n−k) × k parity coefficient rows.
    parity: Vec<Vec<u8>>,
}

impl RsCode {
    /// Build the (k, n) code. Requires 1 <= k <= n <= 255.
    pub(crate) fn new(k: usize, n: usize) -> Self {
        assert!(k >= 1 && k <= n && n <= 255, "unsupported RS parameters");

        // Vandermonde matrix: vand[r][c] = (α^r)^c.
        let vand: Vec<Vec<u8>> = (0..n)
            .map(|r| (0..k).map(|c| GF_EXP[(r * c) % 255]).collect())
            .collect();

        let top_inv = invert(&vand[..k]);

        // Parity rows are V_bottom · V_top⁻¹, making the top k rows of the
        // full encoding matrix the identity (systematic code).
        let parity = (k..n)
            .map(|r| {
                (0..k)
                    .map(|c| {
                        let mut acc = 0u8;
                        for i in 0..k {
                            acc ^= gf_mul(vand[r][i], top_inv[i][c]);
                        }
                        acc
                    })
                    .collect()
            })
            .collect();

        Self { k, n, parity }
    }

    pub(crate) fn data_len(&self) -> usize {
        self.k
    }

    pub(crate) fn coded_len(&self) -> usize {
        self.n
    }

    /// Encode exactly k data bytes into an n-byte codeword.
    pub(crate) fn encode(&self, data: &[u8]) -> Vec<u8> {
        debug_assert_eq!(data.len(), self.k);
        let mut out = Vec::with_capacity(self.n);
        out.extend_from_slice(data);
        for row in &self.parity {
            let mut acc = 0u8;
            for (c, &coef) in row.iter().enumerate() {
                acc ^= gf_mul(coef, data[c]);
            }
            out.push(acc);
        }
        out
    }

    /// Decode an n-byte codeword, correcting up to ⌊(n−k)/2⌋ byte errors.
    ///
    /// Returns `None` when the codeword is uncorrectable.
    pub(crate) fn decode(&self, codeword: &[u8]) -> Option<RsDecoded> {
        debug_assert_eq!(codeword.len(), self.n);

        // Fast path: an undamaged codeword re-encodes to itself.
        if self.encode(&codeword[..self.k]) == codeword {
            return Some(RsDecoded {
                data: codeword[..self.k].to_vec(),
                repaired: false,
            });
        }

        let p = self.berlekamp_welch(codeword)?;

        // Soundness check: the recovered polynomial must agree with the
        // received word outside the correction radius. Uniqueness follows:
        // two candidates within radius e agree on >= n−2e >= k points.
        let e_max = (self.n - self.k) / 2;
        let mismatches = (0..self.n)
            .filter(|&r| poly_eval(&p, gf_point(r)) != codeword[r])
            .count();
        if mismatches > e_max {
            return None;
        }

        let data = (0..self.k).map(|r| poly_eval(&p, gf_point(r))).collect();
        Some(RsDecoded {
            data,
            repaired: true,
        })
    }

    /// Berlekamp-Welch: find P (deg < k) such that for some monic error
    /// locator E (deg e), Q = P·E satisfies Q(x_r) = y_r·E(x_r) for all r.
    fn berlekamp_welch(&self, codeword: &[u8]) -> Option<Vec<u8>> {
        let (k, n) = (self.k, self.n);
        let e = (n - k) / 2;
        if e == 0 {
            return None;
        }
        let nq = k + e; // unknown Q coefficients q_0..q_{k+e−1}
        let cols = nq + e; // plus unknown E coefficients e_0..e_{e−1}

        // One equation per share:
        //   Σ q_j·x^j  +  y·Σ e_j·x^j  =  y·x^e      (char 2: − is +)
        let mut m: Vec<Vec<u8>> = Vec::with_capacity(n);
        for r in 0..n {
            let x = gf_point(r);
            let y = codeword[r];
            let mut row = vec![0u8; cols + 1];
            let mut xp = 1u8;
            for j in 0..nq {
                row[j] = xp;
                if j < e {
                    row[nq + j] = gf_mul(y, xp);
                }
                xp = gf_mul(xp, x);
            }
            // xp is now x^{k+e}; recompute x^e for the rhs.
            let mut xe = 1u8;
            for _ in 0..e {
                xe = gf_mul(xe, x);
            }
            row[cols] = gf_mul(y, xe);
            m.push(row);
        }

        let sol = solve(m, cols)?;

        let q = &sol[..nq];
        let mut locator = sol[nq..].to_vec();
        locator.push(1); // monic x^e term

        poly_div_exact(q, &locator)
    }
}

/// Invert a square matrix over GF(2^8) by Gauss-Jordan elimination.
///
/// The Vandermonde top block is always invertible (distinct points), so a
/// singular input here is a programming error.
fn invert(matrix: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let k = matrix.len();
    let mut work: Vec<Vec<u8>> = matrix.to_vec();
    let mut inv: Vec<Vec<u8>> = (0..k)
        .map(|r| (0..k).map(|c| u8::from(r == c)).collect())
        .collect();

    for c in 0..k {
        let pivot = (c..k)
            .find(|&r| work[r][c] != 0)
            .expect("Vandermonde block is invertible");
        work.swap(c, pivot);
        inv.swap(c, pivot);

        let scale = gf_inv(work[c][c]);
        for x in 0..k {
            work[c][x] = gf_mul(work[c][x], scale);
            inv[c][x] = gf_mul(inv[c][x], scale);
        }
        for r in 0..k {
            if r != c && work[r][c] != 0 {
                let f = work[r][c];
                for x in 0..k {
                    work[r][x] ^= gf_mul(f, work[c][x]);
                    inv[r][x] ^= gf_mul(f, inv[c][x]);
                }
            }
        }
    }
    inv
}

/// Solve an augmented linear system (rows × (cols+1)) over GF(2^8).
///
/// Free variables are fixed at zero. Returns `None` when inconsistent.
fn solve(mut m: Vec<Vec<u8>>, cols: usize) -> Option<Vec<u8>> {
    let rows = m.len();
    let mut pivot_row_of = vec![usize::MAX; cols];
    let mut next = 0;

    for c in 0..cols {
        let Some(pr) = (next..rows).find(|&r| m[r][c] != 0) else {
            continue;
        };
        m.swap(next, pr);
        let scale = gf_inv(m[next][c]);
        for x in c..=cols {
            m[next][x] = gf_mul(m[next][x], scale);
        }
        for r in 0..rows {
            if r != next && m[r][c] != 0 {
                let f = m[r][c];
                for x in c..=cols {
                    m[r][x] ^= gf_mul(f, m[next][x]);
                }
            }
        }
        pivot_row_of[c] = next;
        next += 1;
        if next == rows {
            break;
        }
    }

    // Inconsistent system: a zero row with a nonzero right-hand side.
    for row in &m {
        if row[cols] != 0 && row[..cols].iter().all(|&v| v == 0) {
            return None;
        }
    }

    let mut sol = vec![0u8; cols];
    for c in 0..cols {
        if pivot_row_of[c] != usize::MAX {
            sol[c] = m[pivot_row_of[c]][cols];
        }
    }
    Some(sol)
}

/// Divide Q by E (monic), requiring an exact division.
///
/// Coefficients are low-to-high. Returns `None` on a nonzero remainder,
/// which Berlekamp-Welch produces only for uncorrectable words.
fn poly_div_exact(q: &[u8], e: &[u8]) -> Option<Vec<u8>> {
    debug_assert_eq!(*e.last().unwrap_or(&0), 1, "locator must be monic");
    let mut rem = q.to_vec();
    if rem.len() < e.len() {
        rem.resize(e.len(), 0);
    }
    let qlen = rem.len() - (e.len() - 1);
    let mut quot = vec![0u8; qlen];

    for i in (0..qlen).rev() {
        let coef = rem[i + e.len() - 1];
        quot[i] = coef;
        if coef != 0 {
            for (j, &ec) in e.iter().enumerate() {
                rem[i + j] ^= gf_mul(coef, ec);
            }
        }
    }
    if rem.iter().any(|&v| v != 0) {
        return None;
    }
    Some(quot)
}
