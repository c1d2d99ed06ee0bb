//! drand48-compatible generator for the initial population.
//!
//! The master seeds this with a fixed value so every run places the same
//! robots; reproducing the exact C library sequence is part of the contract.

const MULTIPLIER: u64 = 0x5DEE_CE66D;
const INCREMENT: u64 = 0xB;
const MODULUS_BITS: u32 = 48;
const SEED_LOW: u64 = 0x330E;

/// 48-bit linear congruential generator with the drand48 constants.
#[derive(Debug, Clone)]
pub struct Rand48 {
    state: u64,
}

impl Rand48 {
    /// Equivalent of `srand48(seed)`: the high 32 bits of the state come from
    /// the seed, the low 16 bits are fixed.
    pub fn new(seed: u32) -> Self {
        Self { state: ((seed as u64) << 16) | SEED_LOW }
    }

    fn step(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT)
            & ((1u64 << MODULUS_BITS) - 1);
        self.state
    }

    /// Uniform double in [0.0, 1.0), advancing the state first like
    /// `drand48`.
    pub fn next_f64(&mut self) -> f64 {
        self.step() as f64 / (1u64 << MODULUS_BITS) as f64
    }
}
