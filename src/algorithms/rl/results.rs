//! Per-run reward curves on disk and their aggregation.
//!
//! Each run is stored as `<dir>/<n>.csv`, a single comma-separated row with
//! the cumulative reward of every episode. `n` is the smallest unused
//! integer, so runs never overwrite each other.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const EXTENSION: &str = "csv";

fn result_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{index}.{EXTENSION}"))
}

/// Smallest index without a result file in `dir`. Creates `dir` if needed.
pub fn next_result_index<P: AsRef<Path>>(dir: P) -> Result<usize> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let mut index = 0;
    while result_path(dir, index).exists() {
        index += 1;
    }
    Ok(index)
}

/// Writes one run's episode rewards under the next free index.
pub fn save_run<P: AsRef<Path>>(dir: P, rewards: &[f64]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let path = result_path(dir, next_result_index(dir)?);
    let row: Vec<String> = rewards.iter().map(|r| r.to_string()).collect();
    fs::write(&path, format!("{}\n", row.join(",")))?;
    Ok(path)
}

/// Reads one result file.
pub fn load_run<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    line.split(',')
        .map(|field| {
            field.trim().parse::<f64>().map_err(|e| Error::ResultFormat {
                path: path.to_path_buf(),
                reason: format!("{field:?}: {e}"),
            })
        })
        .collect()
}

/// Reads `0.csv, 1.csv, …` until the first missing index.
pub fn load_runs<P: AsRef<Path>>(dir: P) -> Result<Vec<Vec<f64>>> {
    let dir = dir.as_ref();
    let mut runs = Vec::new();
    let mut index = 0;
    loop {
        let path = result_path(dir, index);
        if !path.exists() {
            break;
        }
        runs.push(load_run(&path)?);
        index += 1;
    }
    Ok(runs)
}

/// Per-episode mean across runs, truncated to the shortest run.
pub fn mean_curve(runs: &[Vec<f64>]) -> Vec<f64> {
    let episodes = runs.iter().map(Vec::len).min().unwrap_or(0);
    (0..episodes)
        .map(|e| runs.iter().map(|r| r[e]).sum::<f64>() / runs.len() as f64)
        .collect()
}

/// Per-episode population standard deviation across runs, truncated to the
/// shortest run.
pub fn std_curve(runs: &[Vec<f64>]) -> Vec<f64> {
    let mean = mean_curve(runs);
    mean.iter()
        .enumerate()
        .map(|(e, m)| {
            let var = runs.iter().map(|r| (r[e] - m).powi(2)).sum::<f64>() / runs.len() as f64;
            var.sqrt()
        })
        .collect()
}

/// Min-max scales `values` onto `[0, 1]`.
///
/// A zero range cannot be scaled and is reported as
/// [`Error::DegenerateRange`] rather than producing NaNs.
pub fn normalize_unit_range(values: &[f64]) -> Result<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let range = max - min;
    if range == 0.0 {
        return Err(Error::DegenerateRange(min));
    }
    Ok(values.iter().map(|v| (v - min) / range).collect())
}

/// Headline numbers for one result directory.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub label: String,
    pub n_runs: usize,
    pub n_episodes: usize,
    /// Mean reward over all episodes and runs.
    pub mean_reward: f64,
    /// Mean reward of the last episode across runs.
    pub final_reward: f64,
    /// Spread of the last episode's reward across runs.
    pub final_std: f64,
}

impl RunSummary {
    /// Loads every run in `dir` and summarizes it.
    pub fn from_dir<P: AsRef<Path>>(label: impl Into<String>, dir: P) -> Result<Self> {
        let runs = load_runs(dir)?;
        Ok(Self::from_runs(label, &runs))
    }

    /// Summarizes runs already in memory.
    pub fn from_runs(label: impl Into<String>, runs: &[Vec<f64>]) -> Self {
        let curve = mean_curve(runs);
        let spread = std_curve(runs);
        let mean_reward = if curve.is_empty() {
            0.0
        } else {
            curve.iter().sum::<f64>() / curve.len() as f64
        };
        Self {
            label: label.into(),
            n_runs: runs.len(),
            n_episodes: curve.len(),
            mean_reward,
            final_reward: curve.last().copied().unwrap_or(0.0),
            final_std: spread.last().copied().unwrap_or(0.0),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== {} ({} runs × {} episodes) ===",
            self.label, self.n_runs, self.n_episodes
        )?;
        writeln!(f, "  Mean episode reward:   {:.3}", self.mean_reward)?;
        write!(
            f,
            "  Final episode reward:  {:.3} ± {:.3}",
            self.final_reward, self.final_std
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_auto_increments() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("runs");
        assert_eq!(next_result_index(&dir).unwrap(), 0);
        let first = save_run(&dir, &[1.0, 2.0]).unwrap();
        let second = save_run(&dir, &[3.0, 4.0]).unwrap();
        assert!(first.ends_with("0.csv"));
        assert!(second.ends_with("1.csv"));
        assert_eq!(next_result_index(&dir).unwrap(), 2);
    }

    #[test]
    fn saved_row_reads_back() {
        let tmp = TempDir::new().unwrap();
        let rewards = vec![0.5, -1.25, 3.0];
        let path = save_run(tmp.path(), &rewards).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0.5,-1.25,3\n");
        assert_eq!(load_run(&path).unwrap(), rewards);
    }

    #[test]
    fn malformed_row_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0.csv");
        fs::write(&path, "1.0,abc\n").unwrap();
        assert!(matches!(
            load_run(&path),
            Err(Error::ResultFormat { .. })
        ));
    }

    #[test]
    fn mean_curve_truncates_to_shortest() {
        let runs = vec![vec![1.0, 2.0, 3.0], vec![3.0, 4.0]];
        assert_eq!(mean_curve(&runs), vec![2.0, 3.0]);
        assert!(mean_curve(&[]).is_empty());
    }

    #[test]
    fn std_curve_is_population_spread() {
        let runs = vec![vec![1.0, 2.0, 9.0], vec![3.0, 2.0]];
        assert_eq!(std_curve(&runs), vec![1.0, 0.0]);
        assert!(std_curve(&[]).is_empty());
    }

    #[test]
    fn normalize_unit_range_scales() {
        let scaled = normalize_unit_range(&[2.0, 4.0, 3.0]).unwrap();
        assert_eq!(scaled, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn normalize_zero_range_is_error() {
        assert!(matches!(
            normalize_unit_range(&[1.5, 1.5, 1.5]),
            Err(Error::DegenerateRange(v)) if v == 1.5
        ));
    }

    #[test]
    fn summary_from_dir() {
        let tmp = TempDir::new().unwrap();
        save_run(tmp.path(), &[1.0, 3.0]).unwrap();
        save_run(tmp.path(), &[3.0, 5.0]).unwrap();
        let summary = RunSummary::from_dir("baseline", tmp.path()).unwrap();
        assert_eq!(summary.n_runs, 2);
        assert_eq!(summary.n_episodes, 2);
        assert_eq!(summary.mean_reward, 3.0);
        assert_eq!(summary.final_reward, 4.0);
        assert_eq!(summary.final_std, 1.0);
        let report = summary.to_string();
        assert!(report.contains("baseline"));
        assert!(report.contains("4.000 ± 1.000"));
    }
}
