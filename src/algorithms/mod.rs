pub mod rl;

use crate::error::Result;
use rl::types::{State, Transition};

/// An online learner driven episode by episode.
///
/// The training loop calls, per episode:
///
/// 1. [`Agent::on_episode_start`]
/// 2. per step: [`Agent::select_action_index`], environment step,
///    [`Agent::on_new_sample`], [`Agent::replay_mem`]
/// 3. [`Agent::on_terminated`]
///
/// and [`Agent::on_finished`] once after the last episode.
pub trait Agent {
    /// Prepares for episode `episode_index` (0-based).
    fn on_episode_start(&mut self, episode_index: usize) -> Result<()>;

    /// Chooses an action for `state`; `explore` enables random actions.
    fn select_action_index(&mut self, state: &State, explore: bool) -> Result<usize>;

    /// Records an observed transition.
    fn on_new_sample(&mut self, transition: Transition) -> Result<()>;

    /// Runs one learning iteration over stored experience.
    fn replay_mem(&mut self) -> Result<()>;

    fn on_terminated(&mut self) {}

    fn on_finished(&mut self) {}
}
