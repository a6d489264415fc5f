//! Epsilon-greedy exploration schedule.

use rand::Rng;

/// Exploration rate decaying multiplicatively toward a floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    value: f64,
    decay: f64,
    floor: f64,
}

impl EpsilonSchedule {
    pub fn new(start: f64, decay: f64, floor: f64) -> Self {
        Self {
            value: start.max(floor),
            decay,
            floor,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Applies one decay step: `ε ← max(ε · decay, floor)`.
    pub fn step(&mut self) -> f64 {
        self.value = (self.value * self.decay).max(self.floor);
        self.value
    }

    /// Whether this decision should be a random one.
    pub fn explore<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen::<f64>() < self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn epsilon_monotone_and_floored() {
        let mut eps = EpsilonSchedule::new(1.0, 0.9, 0.1);
        let mut last = eps.value();
        for _ in 0..200 {
            let now = eps.step();
            assert!(now <= last);
            assert!(now >= 0.1);
            last = now;
        }
        assert_eq!(eps.value(), 0.1);
    }

    #[test]
    fn no_decay_keeps_value() {
        let mut eps = EpsilonSchedule::new(0.5, 1.0, 0.1);
        eps.step();
        assert_eq!(eps.value(), 0.5);
    }

    #[test]
    fn zero_epsilon_never_explores() {
        let eps = EpsilonSchedule::new(0.0, 0.9, 0.0);
        let mut rng = StdRng::seed_from_u64(9);
        assert!((0..1000).all(|_| !eps.explore(&mut rng)));
    }

    #[test]
    fn full_epsilon_always_explores() {
        let eps = EpsilonSchedule::new(1.0, 0.9, 0.0);
        let mut rng = StdRng::seed_from_u64(9);
        assert!((0..1000).all(|_| eps.explore(&mut rng)));
    }
}
