// Demonstration: train one equivalence-augmented agent on the wheelchair
// environment and print its learning curve.
//
// Build/run from this repo root:
//   cargo run --features nn --example wheelchair_demo -- --episodes 30 --k 7

#[cfg(feature = "nn")]
fn main() {
    use std::env;

    use eqdqn::algorithms::rl::config::{AgentConfig, ExperimentConfig};
    use eqdqn::algorithms::rl::environment::{Environment, WheelchairEnv, WheelchairParams};
    use eqdqn::algorithms::rl::results::{normalize_unit_range, RunSummary};
    use eqdqn::algorithms::rl::training::{train_agent, EquivalenceDqnAgent};

    let args: Vec<String> = env::args().collect();
    let episodes: usize = arg_value(&args, "--episodes")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);
    let k: usize = arg_value(&args, "--k")
        .and_then(|s| s.parse().ok())
        .unwrap_or(11);
    let seed: u64 = arg_value(&args, "--seed")
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let agent_config = AgentConfig {
        k_neighbors: k,
        ..AgentConfig::default()
    };
    let experiment = ExperimentConfig {
        runs: 1,
        episodes,
        ..ExperimentConfig::default()
    };

    let mut agent = match EquivalenceDqnAgent::new(&agent_config, seed, tch::Device::Cpu) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("Failed to build agent: {e}");
            std::process::exit(2);
        }
    };
    let params = WheelchairParams {
        t_interval: experiment.t_interval,
        ..WheelchairParams::default()
    };
    let mut env = WheelchairEnv::new(params, agent_config.action_space, seed);
    env.reset(Some(seed));

    let rewards = match train_agent(&mut agent, &mut env, &experiment, 0) {
        Ok(rewards) => rewards,
        Err(e) => {
            eprintln!("Training failed: {e}");
            std::process::exit(1);
        }
    };

    let scaled = normalize_unit_range(&rewards).unwrap_or_else(|_| vec![0.0; rewards.len()]);
    for (episode, (reward, level)) in rewards.iter().zip(&scaled).enumerate() {
        let bar = "#".repeat((level * 40.0).round() as usize);
        println!("{episode:>4} {reward:>9.3} {bar}");
    }
    println!();
    println!("{}", RunSummary::from_runs(format!("k = {k}"), &[rewards]));
    println!(
        "epsilon {:.3}, cache entries {}, iterations {}",
        agent.epsilon(),
        agent.cache().len(),
        agent.iteration()
    );
}

#[cfg(not(feature = "nn"))]
fn main() {
    eprintln!(
        "This example requires the 'nn' feature.\n\
Run:\n\
  cargo run --features nn --example wheelchair_demo -- --episodes 30 --k 7"
    );
}

#[cfg(feature = "nn")]
fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
