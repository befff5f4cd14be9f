//! Failure-coefficient bookkeeping and the leakage-probability back end.
//!
//! A failure tuple of `k` variables does not simply count for one at size
//! `k`: under the glitch/transition model a variable stands for `w` physical
//! wires, and a tuple contributes to coefficient `c_i` once for every way of
//! picking `i` wires that cover all of its variables. That expansion is the
//! coefficient vector of `∏ ((1+x)^w − 1)`, computed by the recurrence below.
//!
//! The probability bound is the fixed point of `f(p) = Σ c_i p^i`, found by
//! binary search. Evaluation is exact over rationals, so no floating-point
//! drift can flip a comparison; the square-root variant (used for the ∩
//! vectors of RPE) compares `f(p)` against `p²` instead of taking a root.

use num::bigint::BigInt;
use num::rational::Ratio;
use num::{BigUint, One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, Var};

/// Binomial coefficients overflow 64 bits above this table size.
pub const COEFF_TABLE_SIZE: usize = 65;

/// Precomputed `C(n, k)` for `n, k < 65`. Immutable and `Send + Sync`; built
/// once per verification run and threaded through explicitly.
#[derive(Clone, Debug)]
pub struct CoeffContext {
    binomial: Box<[[u64; COEFF_TABLE_SIZE]; COEFF_TABLE_SIZE]>,
}

impl Default for CoeffContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CoeffContext {
    pub fn new() -> Self {
        let mut binomial = Box::new([[0u64; COEFF_TABLE_SIZE]; COEFF_TABLE_SIZE]);
        for n in 0..COEFF_TABLE_SIZE {
            binomial[n][0] = 1;
            for k in 1..=n {
                binomial[n][k] = binomial[n - 1][k - 1]
                    + if k <= n - 1 { binomial[n - 1][k] } else { 0 };
            }
        }
        Self { binomial }
    }

    #[inline]
    pub fn binomial(&self, n: usize, k: usize) -> u64 {
        assert!(
            n < COEFF_TABLE_SIZE,
            "binomial table exhausted (n = {n}); wire weights beyond {} are unsupported",
            COEFF_TABLE_SIZE - 1
        );
        if k > n {
            0
        } else {
            self.binomial[n][k]
        }
    }

    /// Adds the weight expansion of `comb` to `coeffs`.
    pub fn add_tuple(&self, c: &Circuit, coeffs: &mut [u64], comb: &[Var]) {
        let mut weights: Vec<u64> = comb.iter().map(|&v| c.weight(v) as u64).collect();
        weights.reverse();
        let occupancy: u64 = weights.iter().sum();
        self.expand_weights(&weights, coeffs, occupancy as usize);
    }

    /// The coefficient vector of `∏ ((1+x)^w − 1)` over the elements of
    /// `weights`, accumulated into `coeffs`.
    fn expand_weights(&self, weights: &[u64], coeffs: &mut [u64], occupancy: usize) {
        let len = weights.len();
        if occupancy == len {
            coeffs[occupancy] += 1;
            return;
        }
        if occupancy == len + 1 {
            // Exactly one element has weight 2: its wire can be covered two
            // ways at size `len` and one way at size `len + 1`.
            coeffs[occupancy - 1] += 2;
            coeffs[occupancy] += 1;
            return;
        }
        let mut lst = vec![0u64; occupancy + 2];
        let mut nmin = 1usize;
        let mut nmax = weights[0] as usize;
        for i in 1..=nmax {
            lst[i] = self.binomial(nmax, i);
        }
        for &elem in &weights[1..] {
            let elem = elem as usize;
            if elem == 1 {
                for j in (nmin..=nmax).rev() {
                    lst[j + 1] = lst[j];
                }
            } else {
                for i in 1..=elem {
                    lst[i + nmax] = lst[nmax] * self.binomial(elem, i);
                }
                for j in (nmin..=nmax - 1).rev() {
                    lst[j + 1] = lst[j] * self.binomial(elem, 1);
                    for i in 2..=elem {
                        lst[i + j] += lst[j] * self.binomial(elem, i);
                    }
                }
            }
            nmin += 1;
            nmax += elem;
        }
        for k in nmin..=nmax {
            coeffs[k] += lst[k];
        }
    }
}

/// `C(n, k)` without the 64-bit table bound.
pub fn binomial_big(n: usize, k: usize) -> BigUint {
    if k > n {
        return BigUint::zero();
    }
    let mut res = BigUint::one();
    for j in 0..k {
        res *= BigUint::from(n - j);
        res /= BigUint::from(j + 1);
    }
    res
}

/// How unknown coefficients past the last precisely computed one are bounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailBound {
    /// Pessimistic: replace them by `C(len, i)`.
    Binomial,
    /// Optimistic: replace them by zero.
    Zero,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LeakageBounds {
    pub pmin: f64,
    pub pmax: f64,
}

impl LeakageBounds {
    /// `coeffs[i]` counts the size-`i` failures; entries past `last_precise`
    /// are lower bounds only.
    pub fn from_coeffs(coeffs: &[u64], last_precise: usize, square_root: bool) -> Self {
        Self {
            pmin: leakage_proba(coeffs, last_precise, TailBound::Binomial, square_root),
            pmax: leakage_proba(coeffs, last_precise, TailBound::Zero, square_root),
        }
    }
}

/// Binary search for the fixed point of `f(p) = p` (or `√f(p) = p`).
pub fn leakage_proba(
    coeffs: &[u64],
    last_precise: usize,
    tail: TailBound,
    square_root: bool,
) -> f64 {
    let len = coeffs.len();
    let ext: Vec<BigInt> = (0..len)
        .map(|i| {
            if i <= last_precise {
                BigInt::from(coeffs[i])
            } else {
                match tail {
                    TailBound::Binomial => BigInt::from(binomial_big(len, i)),
                    TailBound::Zero => BigInt::zero(),
                }
            }
        })
        .collect();

    let mut p_inf: Ratio<BigInt> = Ratio::zero();
    let mut p_sup: Ratio<BigInt> = Ratio::one();
    let epsilon = Ratio::new(BigInt::one(), BigInt::from(1_000_000_000_000u64));

    while (p_sup.clone() - p_inf.clone()).abs() > epsilon {
        let p = (p_inf.clone() + p_sup.clone()) / BigInt::from(2);

        let mut fp: Ratio<BigInt> = Ratio::zero();
        let mut power: Ratio<BigInt> = Ratio::one();
        for coeff in ext.iter().take(len).skip(1) {
            power *= p.clone();
            if !coeff.is_zero() {
                fp += Ratio::from(coeff.clone()) * power.clone();
            }
        }

        let target = if square_root {
            p.clone() * p.clone()
        } else {
            p.clone()
        };
        match fp.cmp(&target) {
            core::cmp::Ordering::Equal => {
                p_inf = p.clone();
                p_sup = p;
                break;
            }
            core::cmp::Ordering::Greater => p_sup = p,
            core::cmp::Ordering::Less => p_inf = p,
        }
    }

    ((p_inf + p_sup) / BigInt::from(2)).to_f64().unwrap_or(f64::NAN)
}

/// Evaluates `f(p)` in floating point, for reporting at a user-chosen leakage
/// rate.
pub fn failure_proba_at(coeffs: &[u64], p: f64) -> f64 {
    let mut fp = 0.0;
    let mut power = 1.0;
    for &c in coeffs.iter().skip(1) {
        power *= p;
        fp += c as f64 * power;
    }
    fp.min(1.0)
}

/// Renders a coefficient vector as `[ c1, c2, … ]`.
pub fn format_coeffs(coeffs: &[u64]) -> String {
    let body: Vec<String> = coeffs.iter().skip(1).map(|c| c.to_string()).collect();
    format!("[ {} ]", body.join(", "))
}
