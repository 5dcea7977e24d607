use rand::Rng;

/// Source of the randomness used for desynchronizing retransmissions. This is a trait to allow
///  deterministic tests.
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send {
    /// uniformly distributed in `0..=max`
    fn gen_u64_inclusive(&mut self, max: u64) -> u64;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_u64_inclusive(&mut self, max: u64) -> u64 {
        rand::thread_rng().gen_range(0..=max)
    }
}
