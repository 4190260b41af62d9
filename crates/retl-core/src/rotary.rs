//! Infinite cyclic cursor over a fixed set of slots.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Round-robin (or random) slot picker used to spread work across queues.
///
/// Each step is a single modulo operation; callers index their own slice
/// with the returned slot.
#[derive(Debug)]
pub struct RotaryIter {
    len: usize,
    next: usize,
    rng: Option<SmallRng>,
}

impl RotaryIter {
    /// Cyclic picker over `len` slots. `len` must be non-zero.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "rotary iterator needs at least one slot");
        Self {
            len,
            next: 0,
            rng: None,
        }
    }

    /// Uniform random picker over `len` slots.
    pub fn random(len: usize) -> Self {
        assert!(len > 0, "rotary iterator needs at least one slot");
        Self {
            len,
            next: 0,
            rng: Some(SmallRng::from_entropy()),
        }
    }

    pub fn next_index(&mut self) -> usize {
        match &mut self.rng {
            Some(rng) => rng.gen_range(0..self.len),
            None => {
                let i = self.next;
                self.next = (self.next + 1) % self.len;
                i
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_in_order() {
        let mut rot = RotaryIter::new(3);
        let picks: Vec<usize> = (0..7).map(|_| rot.next_index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_slot_always_zero() {
        let mut rot = RotaryIter::new(1);
        assert_eq!(rot.next_index(), 0);
        assert_eq!(rot.next_index(), 0);
    }

    #[test]
    fn random_stays_in_range() {
        let mut rot = RotaryIter::random(4);
        for _ in 0..100 {
            assert!(rot.next_index() < 4);
        }
    }
}
