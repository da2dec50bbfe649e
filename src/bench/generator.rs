//! Random workload synthesis for the benchmark loop.

use super::config::SetBenchmarkConfig;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetAction {
    Contains,
    Add,
    Remove,
}

/// Draws actions according to the configured update percentage (updates
/// split equally between adds and removes) and keys uniformly from the
/// table's key range.
pub struct SetActionGenerator {
    rng: SmallRng,
    read_limit: u8,
    add_limit: u8,
    table_size: usize,
}

impl SetActionGenerator {
    pub fn new(config: &SetBenchmarkConfig) -> Self {
        let read_limit = 100 - config.updates;
        Self {
            rng: SmallRng::from_entropy(),
            read_limit,
            add_limit: read_limit + config.updates / 2,
            table_size: config.table_size,
        }
    }

    #[inline]
    pub fn generate_action(&mut self) -> SetAction {
        let action: u8 = self.rng.gen_range(0..=100);
        if action <= self.read_limit {
            SetAction::Contains
        } else if action <= self.add_limit {
            SetAction::Add
        } else {
            SetAction::Remove
        }
    }

    #[inline]
    pub fn generate_key(&mut self) -> usize {
        self.rng.gen_range(0..self.table_size)
    }
}
