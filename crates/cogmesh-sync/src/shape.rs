//! Prime-factor shape descriptors
//!
//! A membrane's shape is a list of prime factors whose product is the
//! element count. Factors are kept in ascending order, so two shapes with
//! the same element count are always equal and hash to the same shard.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use cogmesh_core::{MAX_PAYLOAD_SIZE, SyncError};

/// Most factors a shape may carry
pub const MAX_FACTORS: usize = 16;

/// Most elements a membrane may hold (one full payload of `f32`s)
pub const MAX_ELEMENTS: usize = MAX_PAYLOAD_SIZE / 4;

/// Canonical membrane shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimeShape {
    factors: Vec<u32>,
}

impl PrimeShape {
    /// Build a shape from prime factors in any order
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidShape`] if there are no factors or more than
    /// [`MAX_FACTORS`], a factor is not prime, or the element count exceeds
    /// [`MAX_ELEMENTS`].
    pub fn new(mut factors: Vec<u32>) -> Result<Self, SyncError> {
        if factors.is_empty() || factors.len() > MAX_FACTORS {
            return Err(SyncError::InvalidShape(format!(
                "expected 1..={} factors, got {}",
                MAX_FACTORS,
                factors.len()
            )));
        }
        if let Some(bad) = factors.iter().find(|f| !is_prime(**f)) {
            return Err(SyncError::InvalidShape(format!("{} is not prime", bad)));
        }

        let count = factors
            .iter()
            .try_fold(1usize, |acc, f| acc.checked_mul(*f as usize))
            .filter(|count| *count <= MAX_ELEMENTS)
            .ok_or_else(|| {
                SyncError::InvalidShape(format!("more than {} elements", MAX_ELEMENTS))
            })?;
        debug_assert!(count >= 2);

        factors.sort_unstable();
        Ok(Self { factors })
    }

    /// Factorize an element count into its shape
    pub fn for_elements(count: usize) -> Result<Self, SyncError> {
        if count < 2 {
            return Err(SyncError::InvalidShape(format!(
                "element count {} has no prime factors",
                count
            )));
        }
        if count > MAX_ELEMENTS {
            return Err(SyncError::InvalidShape(format!(
                "more than {} elements",
                MAX_ELEMENTS
            )));
        }

        let mut factors = Vec::new();
        let mut rest = count as u32;
        let mut p = 2u32;
        while p * p <= rest {
            while rest % p == 0 {
                factors.push(p);
                rest /= p;
            }
            p += 1;
        }
        if rest > 1 {
            factors.push(rest);
        }
        Self::new(factors)
    }

    pub fn factors(&self) -> &[u32] {
        &self.factors
    }

    /// Product of the factors
    pub fn element_count(&self) -> usize {
        self.factors.iter().map(|f| *f as usize).product()
    }

    /// Stable 64-bit key derived from the canonical factor list
    pub fn shard_key(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for factor in &self.factors {
            hasher.update(&factor.to_be_bytes());
        }
        let hash = hasher.finalize();
        let mut key = [0u8; 8];
        key.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_be_bytes(key)
    }

    /// Shard index among `shards` shards; zero shards maps everything to 0
    pub fn shard(&self, shards: u64) -> u64 {
        if shards == 0 {
            return 0;
        }
        self.shard_key() % shards
    }
}

impl Display for PrimeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, factor) in self.factors.iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{}", factor)?;
        }
        Ok(())
    }
}

fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2u32;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let a = PrimeShape::new(vec![5, 2, 3]).unwrap();
        let b = PrimeShape::new(vec![2, 3, 5]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.factors(), &[2, 3, 5]);
        assert_eq!(a.element_count(), 30);
        assert_eq!(a.to_string(), "2x3x5");
        assert_eq!(a.shard_key(), b.shard_key());
    }

    #[test]
    fn test_rejects_invalid_factors() {
        assert!(PrimeShape::new(vec![]).is_err());
        assert!(PrimeShape::new(vec![4]).is_err());
        assert!(PrimeShape::new(vec![1, 2]).is_err());
        assert!(PrimeShape::new(vec![2; MAX_FACTORS + 1]).is_err());
        assert!(PrimeShape::new(vec![2; MAX_FACTORS]).is_ok());
    }

    #[test]
    fn test_rejects_oversized() {
        assert!(PrimeShape::new(vec![65_521, 65_521]).is_err());
        assert!(PrimeShape::new(vec![4_294_967_291, 4_294_967_291]).is_err());
    }

    #[test]
    fn test_for_elements() {
        assert_eq!(PrimeShape::for_elements(12).unwrap().factors(), &[2, 2, 3]);
        assert_eq!(PrimeShape::for_elements(97).unwrap().factors(), &[97]);
        assert!(PrimeShape::for_elements(1).is_err());
        assert!(PrimeShape::for_elements(MAX_ELEMENTS + 1).is_err());
    }

    #[test]
    fn test_shard_distribution() {
        let shape = PrimeShape::new(vec![2, 7]).unwrap();
        assert!(shape.shard(4) < 4);
        assert_eq!(shape.shard(0), 0);
        assert_eq!(shape.shard(1), 0);
    }
}
