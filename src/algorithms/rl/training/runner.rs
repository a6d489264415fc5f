//! Episode loop and multi-run experiment driver.

use std::path::Path;

use tracing::{debug, info};

use crate::algorithms::rl::config::ExperimentConfig;
use crate::algorithms::rl::environment::Environment;
use crate::algorithms::rl::results::{next_result_index, save_run};
use crate::algorithms::rl::types::{State, Transition};
use crate::algorithms::Agent;
use crate::error::Result;

/// Runs one episode of `episode_length` steps and returns its total reward.
///
/// The environment must already be reset; learning happens after every
/// step.
pub fn run_episode<A, E>(
    agent: &mut A,
    env: &mut E,
    initial_state: State,
    episode_index: usize,
    episode_length: usize,
) -> Result<f64>
where
    A: Agent + ?Sized,
    E: Environment + ?Sized,
{
    agent.on_episode_start(episode_index)?;
    let mut state = initial_state;
    let mut total_reward = 0.0;
    for _ in 0..episode_length {
        let action = agent.select_action_index(&state, true)?;
        let step = env.step(action)?;
        total_reward += step.reward;
        agent.on_new_sample(Transition::new(
            state,
            action,
            step.reward,
            step.next_state.clone(),
        ))?;
        agent.replay_mem()?;
        state = step.next_state;
    }
    agent.on_terminated();
    Ok(total_reward)
}

/// Trains `agent` for `experiment.episodes` episodes.
///
/// Returns the cumulative reward of every episode.
pub fn train_agent<A, E>(
    agent: &mut A,
    env: &mut E,
    experiment: &ExperimentConfig,
    run_index: usize,
) -> Result<Vec<f64>>
where
    A: Agent + ?Sized,
    E: Environment + ?Sized,
{
    let mut rewards = Vec::with_capacity(experiment.episodes);
    for episode in 0..experiment.episodes {
        if episode % 10 == 0 {
            info!(run = run_index, episode, "training");
        }
        let initial_state = env.reset(None);
        let reward = run_episode(agent, env, initial_state, episode, experiment.episode_length)?;
        debug!(run = run_index, episode, reward, "episode finished");
        rewards.push(reward);
    }
    agent.on_finished();
    Ok(rewards)
}

/// Trains `experiment.runs` fresh agents and saves each reward curve to
/// `output_dir`.
///
/// Each run's seed is the next free result index plus
/// `experiment.seed_offset`; both factories receive it so agent and
/// environment are seeded before training starts.
pub fn run_experiment<A, E, FA, FE>(
    experiment: &ExperimentConfig,
    output_dir: &Path,
    mut make_agent: FA,
    mut make_env: FE,
) -> Result<Vec<Vec<f64>>>
where
    A: Agent,
    E: Environment,
    FA: FnMut(u64) -> Result<A>,
    FE: FnMut(u64) -> E,
{
    experiment.validate()?;
    let mut all_rewards = Vec::with_capacity(experiment.runs);
    for run in 0..experiment.runs {
        let seed = next_result_index(output_dir)? as u64 + experiment.seed_offset;
        let mut agent = make_agent(seed)?;
        let mut env = make_env(seed);
        env.reset(Some(seed));
        let rewards = train_agent(&mut agent, &mut env, experiment, run)?;
        let path = save_run(output_dir, &rewards)?;
        info!(run, seed, path = %path.display(), "run saved");
        all_rewards.push(rewards);
    }
    Ok(all_rewards)
}
