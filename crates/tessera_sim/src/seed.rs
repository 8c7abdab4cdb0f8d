//! Seed management for reproducible simulations.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Source of a simulation seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSource {
    /// From a literal value
    Literal(u64),
    /// From a string (hashed)
    FromString(String),
}

impl SeedSource {
    /// Generate a seed value
    #[must_use]
    pub fn to_seed(&self) -> u64 {
        match self {
            SeedSource::Literal(seed) => *seed,
            SeedSource::FromString(s) => {
                // FNV-1a
                let mut hash = 0xcbf2_9ce4_8422_2325u64;
                for b in s.bytes() {
                    hash ^= u64::from(b);
                    hash = hash.wrapping_mul(0x0100_0000_01b3);
                }
                hash
            }
        }
    }
}

/// Simulation seed for reproducibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Base seed value
    pub seed: u64,
    /// Source of the seed
    pub source: SeedSource,
}

impl SimSeed {
    /// Create a new simulation seed
    #[must_use]
    pub fn new(source: SeedSource) -> Self {
        let seed = source.to_seed();
        Self { seed, source }
    }

    /// Create a seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self::new(SeedSource::Literal(seed))
    }

    /// Create a seed from a string
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::new(SeedSource::FromString(s.into()))
    }

    /// Create an RNG from this seed
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::from_literal(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_literal_seed() {
        assert_eq!(SimSeed::from_literal(123).seed, 123);
    }

    #[test]
    fn test_string_seed_reproducible() {
        let a = SimSeed::from_string("cluster");
        let b = SimSeed::from_string("cluster");
        assert_eq!(a.seed, b.seed);

        let c = SimSeed::from_string("other");
        assert_ne!(a.seed, c.seed);
    }

    #[test]
    fn test_rng_reproducible() {
        let seed = SimSeed::from_literal(7);
        let v1: u64 = seed.rng().gen();
        let v2: u64 = seed.rng().gen();
        assert_eq!(v1, v2);
    }

    #[test]
    fn test_default_seed() {
        assert_eq!(SimSeed::default().seed, 42);
    }
}
