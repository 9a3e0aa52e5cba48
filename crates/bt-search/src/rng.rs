//! Seeded random source whose exact position survives a snapshot.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Serialized position of a [`SearchRng`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RngState {
    seed: [u8; 32],
    stream: u64,
    word_pos: u128,
}

/// ChaCha8 generator that serializes as seed, stream and word position, so a
/// restored engine draws the same numbers the saved one would have.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "RngState", from = "RngState")]
pub struct SearchRng(ChaCha8Rng);

impl SearchRng {
    pub fn seed_from_u64(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl From<SearchRng> for RngState {
    fn from(rng: SearchRng) -> Self {
        Self {
            seed: rng.0.get_seed(),
            stream: rng.0.get_stream(),
            word_pos: rng.0.get_word_pos(),
        }
    }
}

impl From<RngState> for SearchRng {
    fn from(state: RngState) -> Self {
        let mut rng = ChaCha8Rng::from_seed(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(state.word_pos);
        Self(rng)
    }
}

impl RngCore for SearchRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.0.fill_bytes(dst)
    }
}
