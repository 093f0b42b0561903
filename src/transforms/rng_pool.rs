//! Shared PRNG pool for the parallel transform sections.
//!
//! A worker pops a generator (creating a freshly seeded one when the pool is
//! empty), drives its own sample with it, and pushes it back. The pool size
//! naturally bounds to the number of concurrent workers, and each new
//! generator gets a distinct seed stream derived from the base seed.

use rand::{rngs::StdRng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct RngPool {
    base_seed: u64,
    created: AtomicU64,
    stack: Mutex<Vec<StdRng>>,
}

impl RngPool {
    pub fn new(base_seed: u64) -> Self {
        Self {
            base_seed,
            created: AtomicU64::new(0),
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Pops a generator, seeding a new one when none is pooled.
    pub fn pop(&self) -> StdRng {
        if let Some(rng) = self.stack.lock().expect("rng pool poisoned").pop() {
            return rng;
        }
        let offset = self.created.fetch_add(1, Ordering::Relaxed);
        StdRng::seed_from_u64(self.base_seed.wrapping_add(offset))
    }

    /// Returns a generator to the pool.
    pub fn push(&self, rng: StdRng) {
        self.stack.lock().expect("rng pool poisoned").push(rng);
    }
}
