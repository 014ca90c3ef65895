//! Human-readable cluster identity generation
//!
//! Identities look like `calm-river-a1b2c3`: an adjective, a noun and six
//! random hex digits. The word lists give about 8,000 pairs and the suffix
//! 16.7 million values per pair, so the retry cap is only ever reached if
//! the random source is broken.

use crate::errors::{ProxboxError, Result};
use crate::types::ClusterIdentity;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// Default number of candidates tried before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Number of random bytes in the hex suffix (two hex digits each)
const TOKEN_BYTES: usize = 3;

const ADJECTIVES: &[&str] = &[
    "aged", "ancient", "autumn", "billowing", "bitter", "black", "blue", "bold", "broad",
    "broken", "calm", "cold", "cool", "crimson", "curly", "damp", "dark", "dawn", "delicate",
    "divine", "dry", "empty", "falling", "fancy", "flat", "floral", "fragrant", "frosty",
    "gentle", "green", "hidden", "holy", "icy", "jolly", "late", "lingering", "little",
    "lively", "long", "lucky", "misty", "morning", "muddy", "mute", "nameless", "noisy", "odd",
    "old", "orange", "patient", "plain", "polished", "proud", "purple", "quiet", "rapid",
    "raspy", "red", "restless", "rough", "round", "royal", "shiny", "shrill", "shy", "silent",
    "small", "snowy", "soft", "solitary", "sparkling", "spring", "square", "steep", "still",
    "summer", "super", "sweet", "throbbing", "tight", "tiny", "twilight", "wandering",
    "weathered", "white", "wild", "winter", "wispy", "withered", "yellow", "young",
];

const NOUNS: &[&str] = &[
    "art", "band", "bar", "base", "bird", "block", "boat", "bonus", "bread", "breeze", "brook",
    "bush", "butterfly", "cake", "cell", "cherry", "cloud", "credit", "darkness", "dawn",
    "dew", "disk", "dream", "dust", "feather", "field", "fire", "firefly", "flower", "fog",
    "forest", "frog", "frost", "glade", "glitter", "grass", "hall", "hat", "haze", "heart",
    "hill", "king", "lab", "lake", "leaf", "limit", "math", "meadow", "mode", "moon",
    "morning", "mountain", "mouse", "mud", "night", "paper", "pine", "poetry", "pond",
    "queen", "rain", "recipe", "resonance", "rice", "river", "salad", "scene", "sea",
    "shadow", "shape", "silence", "sky", "smoke", "snow", "snowflake", "sound", "star", "sun",
    "sunset", "surf", "term", "thunder", "tooth", "tree", "truth", "union", "unit", "violet",
    "voice", "water", "waterfall", "wave", "wildflower", "wind", "wood",
];

/// Produces collision-free, human-readable cluster identities
#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    max_attempts: u32,
}

impl IdentityGenerator {
    /// Create a generator that gives up after `max_attempts` collisions
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Configured retry cap
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Generate an identity not present in `existing` using the thread RNG
    pub fn generate(&self, existing: &HashSet<ClusterIdentity>) -> Result<ClusterIdentity> {
        self.generate_with_rng(existing, &mut rand::thread_rng())
    }

    /// Generate an identity not present in `existing` using the given RNG
    pub fn generate_with_rng<R: Rng + ?Sized>(
        &self,
        existing: &HashSet<ClusterIdentity>,
        rng: &mut R,
    ) -> Result<ClusterIdentity> {
        for attempt in 1..=self.max_attempts {
            let candidate = Self::candidate(rng)?;
            if !existing.contains(&candidate) {
                return Ok(candidate);
            }
            debug!(%candidate, attempt, "Identity collision, retrying");
        }
        Err(ProxboxError::ExhaustedNamespace {
            attempts: self.max_attempts,
        })
    }

    fn candidate<R: Rng + ?Sized>(rng: &mut R) -> Result<ClusterIdentity> {
        let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("calm");
        let noun = NOUNS.choose(rng).copied().unwrap_or("river");
        let mut token = [0u8; TOKEN_BYTES];
        rng.fill(&mut token);
        ClusterIdentity::parse(&format!("{adjective}-{noun}-{}", hex::encode(token)))
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_identity_shape() {
        let generator = IdentityGenerator::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let id = generator
            .generate_with_rng(&HashSet::new(), &mut rng)
            .unwrap();

        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
        assert_eq!(parts[2].len(), TOKEN_BYTES * 2);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_retries_past_collisions() {
        let generator = IdentityGenerator::default();
        let first = generator
            .generate_with_rng(&HashSet::new(), &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();

        // Same seed reproduces `first` as the first candidate, forcing a retry.
        let existing: HashSet<_> = [first.clone()].into_iter().collect();
        let second = generator
            .generate_with_rng(&existing, &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let generator = IdentityGenerator::new(4);
        // A constant RNG yields the same candidate every time.
        let mut rng = StepRng::new(0, 0);
        let only = generator
            .generate_with_rng(&HashSet::new(), &mut rng)
            .unwrap();

        let existing: HashSet<_> = [only].into_iter().collect();
        let err = generator
            .generate_with_rng(&existing, &mut StepRng::new(0, 0))
            .unwrap_err();
        assert_eq!(err, ProxboxError::ExhaustedNamespace { attempts: 4 });
    }
}
