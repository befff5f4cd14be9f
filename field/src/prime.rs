use anyhow::{ensure, Result};
use ironmask_util::bits_u64;
use serde::{Deserialize, Serialize};

/// A field coefficient in canonical form `0..p`. The characteristic is
/// bounded by [`PrimeField::MAX_CHARACTERISTIC`], so products of two
/// coefficients always fit in a `u32`.
pub type Coeff = u16;

/// A prime field GF(p) with runtime characteristic.
///
/// `p == 2` is the common case (boolean masking) and all operations reduce to
/// xor/and there; the arithmetic path (`p` odd) is used for gadgets over
/// larger fields. Elements are always kept canonical, i.e. in `0..p`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrimeField {
    p: u16,
}

impl PrimeField {
    /// Characteristics must stay below 2^15 so that `p - 1` squared fits
    /// comfortably in 32 bits.
    pub const MAX_CHARACTERISTIC: u32 = 1 << 15;

    /// Builds the field, checking that `p` is prime and in range.
    pub fn new(p: u32) -> Result<Self> {
        ensure!(p >= 2, "field characteristic must be at least 2, got {p}");
        ensure!(
            p < Self::MAX_CHARACTERISTIC,
            "field characteristic {p} too large (must be < {})",
            Self::MAX_CHARACTERISTIC
        );
        ensure!(is_prime(p), "field characteristic {p} is not prime");
        Ok(Self { p: p as u16 })
    }

    /// The boolean field GF(2).
    pub const fn binary() -> Self {
        Self { p: 2 }
    }

    #[inline]
    pub fn characteristic(&self) -> u32 {
        self.p as u32
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        self.p == 2
    }

    /// Maps an arbitrary signed integer to its canonical representative.
    pub fn canonicalize(&self, x: i64) -> Coeff {
        let p = self.p as i64;
        (((x % p) + p) % p) as Coeff
    }

    #[inline]
    pub fn add(&self, a: Coeff, b: Coeff) -> Coeff {
        let s = a as u32 + b as u32;
        let p = self.p as u32;
        (if s >= p { s - p } else { s }) as Coeff
    }

    #[inline]
    pub fn sub(&self, a: Coeff, b: Coeff) -> Coeff {
        let p = self.p as u32;
        ((a as u32 + p - b as u32) % p) as Coeff
    }

    #[inline]
    pub fn neg(&self, a: Coeff) -> Coeff {
        if a == 0 {
            0
        } else {
            self.p - a
        }
    }

    #[inline]
    pub fn mul(&self, a: Coeff, b: Coeff) -> Coeff {
        ((a as u32 * b as u32) % self.p as u32) as Coeff
    }

    /// `base^e` by square-and-multiply.
    pub fn exp(&self, base: Coeff, e: u64) -> Coeff {
        let mut acc: Coeff = 1;
        let mut i = bits_u64(e);
        while i > 0 {
            i -= 1;
            acc = self.mul(acc, acc);
            if (e >> i) & 1 == 1 {
                acc = self.mul(acc, base);
            }
        }
        acc
    }

    /// Multiplicative inverse by the extended Euclidean algorithm, `None` for
    /// zero.
    pub fn try_inverse(&self, x: Coeff) -> Option<Coeff> {
        if x == 0 {
            return None;
        }
        if self.p == 2 {
            return Some(1);
        }
        let (mut r0, mut r1) = (self.p as i64, x as i64);
        let (mut s0, mut s1) = (0i64, 1i64);
        while r1 != 0 {
            let q = r0 / r1;
            (r0, r1) = (r1, r0 - q * r1);
            (s0, s1) = (s1, s0 - q * s1);
        }
        debug_assert_eq!(r0, 1, "gcd(x, p) must be 1 for prime p");
        Some(self.canonicalize(s0))
    }

    /// Like [`Self::try_inverse`] but panics on zero.
    pub fn inverse(&self, x: Coeff) -> Coeff {
        self.try_inverse(x).expect("tried to invert zero")
    }

    /// Samples a uniform element.
    pub fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Coeff {
        rng.gen_range(0..self.p)
    }
}

fn is_prime(p: u32) -> bool {
    if p < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= p {
        if p % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn test_construction() {
        assert!(PrimeField::new(2).is_ok());
        assert!(PrimeField::new(7).is_ok());
        assert!(PrimeField::new(0).is_err());
        assert!(PrimeField::new(1).is_err());
        assert!(PrimeField::new(6).is_err());
        assert!(PrimeField::new(1 << 16).is_err());
    }

    #[test]
    fn test_inverse_small_fields() {
        for p in [2u32, 3, 5, 7, 11, 251] {
            let f = PrimeField::new(p).unwrap();
            assert_eq!(f.try_inverse(0), None);
            for x in 1..p as Coeff {
                let inv = f.inverse(x);
                assert_eq!(f.mul(x, inv), 1, "inverse failed for {x} mod {p}");
            }
        }
    }

    #[test]
    fn test_inverse_large_field() {
        let f = PrimeField::new(12289).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..1000 {
            let x = f.sample(&mut rng);
            if x != 0 {
                assert_eq!(f.mul(x, f.inverse(x)), 1);
            }
        }
    }

    #[test]
    fn test_exp_matches_repeated_mul() {
        let f = PrimeField::new(7).unwrap();
        for base in 0..7 {
            let mut acc = 1;
            for e in 0..10u64 {
                assert_eq!(f.exp(base, e), acc);
                acc = f.mul(acc, base);
            }
        }
    }

    #[test]
    fn test_canonicalize() {
        let f = PrimeField::new(5).unwrap();
        assert_eq!(f.canonicalize(-1), 4);
        assert_eq!(f.canonicalize(12), 2);
        assert_eq!(f.canonicalize(-12), 3);
        let g = PrimeField::binary();
        assert_eq!(g.canonicalize(-3), 1);
    }

    #[test]
    fn test_binary_field_is_xor() {
        let f = PrimeField::binary();
        assert_eq!(f.add(1, 1), 0);
        assert_eq!(f.sub(0, 1), 1);
        assert_eq!(f.neg(1), 1);
    }
}
