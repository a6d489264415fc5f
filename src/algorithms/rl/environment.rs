//! Environment contract and the wheelchair kinematics simulator.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::types::{ActionSpace, State};
use crate::error::Result;

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// State after the step.
    pub next_state: State,
    /// Scalar reward of the step.
    pub reward: f64,
}

/// An episodic environment driven by discrete action indices.
///
/// # Lifecycle
///
/// 1. Call [`Environment::reset`] to start an episode.
/// 2. Repeatedly call [`Environment::step`] with an action index.
///
/// Decoding the index into physical controls is the environment's concern.
pub trait Environment {
    /// Starts a new episode and returns its initial state.
    ///
    /// `Some(seed)` reseeds the environment; `None` continues its RNG stream.
    fn reset(&mut self, seed: Option<u64>) -> State;

    /// Advances the dynamics by one fixed interval.
    fn step(&mut self, action: usize) -> Result<StepResult>;
}

/// Configuration of a [`WheelchairEnv`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelchairParams {
    /// Wheel radius ρ.
    pub rho: f64,
    /// Axle width w.
    pub width: f64,
    /// Simulated seconds per step.
    pub t_interval: f64,
    /// RK4 sub-steps per interval.
    pub substeps: usize,
    /// Start angles are drawn uniformly from `[-angle_range, angle_range]`.
    pub angle_range: f64,
}

impl Default for WheelchairParams {
    fn default() -> Self {
        Self {
            rho: 3.0,
            width: 3.0,
            t_interval: 1.0,
            substeps: 10,
            angle_range: 3.14,
        }
    }
}

/// Planar two-wheeled robot with heading `theta` and wheel angles
/// `phi`, `psi`.
///
/// Wheel rates `(phidot, psidot)` drive
///
/// ```text
/// xdot     = rho/2 * (phidot + psidot) * cos(theta)
/// ydot     = rho/2 * (phidot + psidot) * sin(theta)
/// thetadot = rho/w * (phidot - psidot)
/// ```
///
/// The observed state is `(theta, phi, psi)` and the reward of a step is
/// the displacement along x.
#[derive(Debug)]
pub struct WheelchairEnv {
    params: WheelchairParams,
    action_space: ActionSpace,
    rng: StdRng,
    x: f64,
    y: f64,
    theta: f64,
    phi: f64,
    psi: f64,
}

impl WheelchairEnv {
    pub fn new(params: WheelchairParams, action_space: ActionSpace, seed: u64) -> Self {
        Self {
            params,
            action_space,
            rng: StdRng::seed_from_u64(seed),
            x: 0.0,
            y: 0.0,
            theta: 0.0,
            phi: 0.0,
            psi: 0.0,
        }
    }

    pub fn state(&self) -> State {
        vec![self.theta, self.phi, self.psi]
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Places the robot at the origin with the given angles.
    pub fn set_state(&mut self, theta: f64, phi: f64, psi: f64) -> State {
        self.x = 0.0;
        self.y = 0.0;
        self.theta = wrap_angle(theta);
        self.phi = wrap_angle(phi);
        self.psi = wrap_angle(psi);
        self.state()
    }

    fn derivative(&self, v: &[f64; 5], phidot: f64, psidot: f64) -> [f64; 5] {
        let theta = v[2];
        let forward = self.params.rho / 2.0 * (phidot + psidot);
        [
            forward * theta.cos(),
            forward * theta.sin(),
            self.params.rho / self.params.width * (phidot - psidot),
            phidot,
            psidot,
        ]
    }

    fn integrate(&mut self, phidot: f64, psidot: f64) {
        if self.params.t_interval == 0.0 || self.params.substeps == 0 {
            return;
        }
        let h = self.params.t_interval / self.params.substeps as f64;
        let mut v = [self.x, self.y, self.theta, self.phi, self.psi];
        for _ in 0..self.params.substeps {
            let k1 = self.derivative(&v, phidot, psidot);
            let k2 = self.derivative(&offset(&v, &k1, h / 2.0), phidot, psidot);
            let k3 = self.derivative(&offset(&v, &k2, h / 2.0), phidot, psidot);
            let k4 = self.derivative(&offset(&v, &k3, h), phidot, psidot);
            for i in 0..5 {
                v[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
            }
        }
        self.x = v[0];
        self.y = v[1];
        self.theta = wrap_angle(v[2]);
        self.phi = wrap_angle(v[3]);
        self.psi = wrap_angle(v[4]);
    }
}

impl Environment for WheelchairEnv {
    fn reset(&mut self, seed: Option<u64>) -> State {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        let range = self.params.angle_range;
        let theta = self.rng.gen_range(-range..=range);
        let phi = self.rng.gen_range(-range..=range);
        let psi = self.rng.gen_range(-range..=range);
        self.set_state(theta, phi, psi)
    }

    fn step(&mut self, action: usize) -> Result<StepResult> {
        let (phidot, psidot) = self.action_space.decode(action)?;
        let x_before = self.x;
        self.integrate(phidot, psidot);
        Ok(StepResult {
            next_state: self.state(),
            reward: self.x - x_before,
        })
    }
}

fn offset(v: &[f64; 5], k: &[f64; 5], scale: f64) -> [f64; 5] {
    let mut out = *v;
    for i in 0..5 {
        out[i] += k[i] * scale;
    }
    out
}

/// Wraps an angle into `[-π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI && angle > 0.0 {
        PI
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env() -> WheelchairEnv {
        WheelchairEnv::new(WheelchairParams::default(), ActionSpace::default(), 42)
    }

    #[test]
    fn reset_is_reproducible() {
        let mut a = make_env();
        let mut b = make_env();
        let first = a.reset(Some(7));
        assert_eq!(first, b.reset(Some(7)));
        assert_ne!(first, a.reset(None));
    }

    #[test]
    fn reset_angles_in_range() {
        let mut env = make_env();
        for seed in 0..20 {
            let state = env.reset(Some(seed));
            assert_eq!(state.len(), 3);
            for angle in state {
                assert!(angle.abs() <= 3.14);
            }
        }
    }

    #[test]
    fn zero_action_holds_position() {
        let mut env = make_env();
        env.set_state(0.3, 0.1, -0.2);
        let center = ActionSpace::default().encode(0.0, 0.0);
        let result = env.step(center).unwrap();
        assert!(result.reward.abs() < 1e-12);
        assert_eq!(result.next_state, vec![0.3, 0.1, -0.2]);
    }

    #[test]
    fn straight_drive_along_x() {
        let mut env = make_env();
        env.set_state(0.0, 0.0, 0.0);
        // phidot = psidot = 1: theta stays 0, x advances rho/2 * 2 * t = 3.
        let forward = ActionSpace::default().encode(1.0, 1.0);
        let result = env.step(forward).unwrap();
        assert!((result.reward - 3.0).abs() < 1e-9);
        assert!(result.next_state[0].abs() < 1e-12);
        assert!((result.next_state[1] - 1.0).abs() < 1e-9);
        let (_, y) = env.position();
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn turning_in_place_changes_heading() {
        let mut env = make_env();
        env.set_state(0.0, 0.0, 0.0);
        let spin = ActionSpace::default().encode(0.5, -0.5);
        let result = env.step(spin).unwrap();
        assert!(result.reward.abs() < 1e-9);
        // thetadot = rho/w * (0.5 + 0.5) = 1.
        assert!((result.next_state[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_action_is_rejected() {
        let mut env = make_env();
        env.reset(Some(1));
        assert!(env.step(81).is_err());
    }

    #[test]
    fn wrap_angle_range() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert_eq!(wrap_angle(1.0), 1.0);
        assert!((wrap_angle(7.0 * PI) - PI).abs() < 1e-9);
    }
}
