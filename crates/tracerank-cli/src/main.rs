use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, bail};
use clap::Parser;
use tracerank_engine::{Event, weights_file};
use tracerank_training::{GeometricCrafter, Trainer, WeightsCrafter, pool};

mod report;

/// Trains a weight vector that ranks each event's designated winner first.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Maximum number of training cycles; 1 evaluates and reports only
    max_cycles: u64,
    /// Worker thread count, or 0 for half the hardware threads
    threads: usize,
    /// Alternating `<winner-name> <event-file>` pairs, optionally followed
    /// by an initial weights file
    #[arg(required = true, num_args = 2..)]
    inputs: Vec<String>,
    /// Also write a JSON training report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.max_cycles < 1 {
        bail!("maximum number of training cycles must be at least 1");
    }
    let (pairs, weights_path) = split_inputs(&cli.inputs)?;
    let worker_count = pool::resolve_worker_count(cli.threads);

    eprintln!("Loading {} event files...", pairs.len());
    let mut events = Vec::with_capacity(pairs.len());
    for &(winner_name, file) in &pairs {
        let event = Event::from_file(Path::new(file), winner_name)
            .with_context(|| format!("loading event file '{file}'"))?;
        let digraph = event.candidates()[0].digraph();
        eprintln!(
            "  '{}': {} candidates of {} x {} requiring {} weights, winner '{winner_name}'",
            event.name(),
            event.candidates_count(),
            digraph.rows(),
            digraph.cols(),
            event.required_weights_count(),
        );
        events.push(event);
    }

    let weights_count = events[0].required_weights_count();
    for event in &events[1..] {
        if event.required_weights_count() != weights_count {
            bail!(
                "incompatible events: '{}' requires {} weights but '{}' requires {}",
                event.name(),
                event.required_weights_count(),
                events[0].name(),
                weights_count,
            );
        }
    }

    let crafter = match weights_path {
        Some(file) => {
            let weights = weights_file::read_weights(Path::new(file), weights_count)
                .with_context(|| format!("loading weights file '{file}'"))?;
            eprintln!("Loaded {weights_count} initial weights from '{file}'.");
            GeometricCrafter::with_weights(weights)
        }
        None => {
            eprintln!("Starting from {weights_count} randomized weights.");
            GeometricCrafter::new(weights_count)
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("installing the stop signal handler")?;
    }

    let events: Vec<Arc<Mutex<Event>>> = events
        .into_iter()
        .map(|event| Arc::new(Mutex::new(event)))
        .collect();

    let (final_weights, outcome, weights_file_name) = if cli.max_cycles > 1 {
        eprintln!("Press Ctrl-C to stop; the best weights seen so far are kept.");
        let mut trainer = Trainer::new(
            events.clone(),
            Box::new(crafter),
            worker_count,
            cli.max_cycles,
            Arc::clone(&stop),
        );
        let outcome = trainer.run();

        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let path = weights_file::write_weights(Path::new("."), &timestamp, trainer.final_weights())
            .context("writing the weights file")?;
        eprintln!("{weights_count} weights were written to '{}'.", path.display());

        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        (trainer.final_weights().to_vec(), Some(outcome), name)
    } else {
        eprintln!("Single cycle requested: evaluating and reporting only.");
        // The crafter pre-alters its live vector at construction; report
        // under the untouched starting weights the user supplied.
        (crafter.best().to_vec(), None, None)
    };

    // One evaluation under the persisted weights, on the main thread, so the
    // reported ranks are exactly what the weights file reproduces.
    for event in &events {
        event.lock().unwrap().evaluate(&final_weights);
    }

    let mut rank_total = 0;
    eprintln!("The final ranks are:");
    for event in &events {
        let event = event.lock().unwrap();
        let rank = event.winner_rank();
        rank_total += rank;
        eprintln!("  {rank} for '{}' in '{}'", event.winner().name(), event.name());
    }
    eprintln!("  Rank total is {rank_total} over {} events.", events.len());

    eprintln!("The final ordered candidates are:");
    for event in &events {
        let event = event.lock().unwrap();
        let listing = event
            .ranked_candidates()
            .into_iter()
            .map(|candidate| format!("{}({})", candidate.name(), candidate.sink()))
            .collect::<Vec<_>>()
            .join(" ");
        eprintln!("  '{}': {listing}", event.name());
    }

    if let Some(report_path) = &cli.report {
        let report = report::TrainingReport {
            trained_at: chrono::Utc::now(),
            max_cycles: cli.max_cycles,
            cycles_run: outcome.as_ref().map_or(0, |o| o.cycles_run),
            worker_count,
            stop_requested: outcome.as_ref().is_some_and(|o| o.stop_requested),
            rank_total,
            weights_file: weights_file_name,
            events: events
                .iter()
                .map(|event| report::EventReport::from_event(&event.lock().unwrap()))
                .collect(),
        };
        report::save(report_path, &report)?;
        eprintln!("Report written to '{}'.", report_path.display());
    }

    Ok(())
}

/// Splits the trailing arguments into `<winner-name> <event-file>` pairs and,
/// when their count is odd, a final weights file.
fn split_inputs(inputs: &[String]) -> anyhow::Result<(Vec<(&str, &str)>, Option<&str>)> {
    let (pair_args, weights) = if inputs.len() % 2 == 1 {
        (
            &inputs[..inputs.len() - 1],
            inputs.last().map(String::as_str),
        )
    } else {
        (inputs, None)
    };
    if pair_args.is_empty() {
        bail!("at least one `<winner-name> <event-file>` pair is required");
    }
    let pairs = pair_args
        .chunks_exact(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect();
    Ok((pairs, weights))
}

#[cfg(test)]
mod tests {
    use std::{env, fs, fs::File};

    use tracerank_engine::{Candidate, Digraph};

    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|&v| v.to_owned()).collect()
    }

    #[test]
    fn test_even_inputs_are_all_pairs() {
        let inputs = args(&["AAA", "one.bin", "BBB", "two.bin"]);
        let (pairs, weights) = split_inputs(&inputs).unwrap();
        assert_eq!(pairs, vec![("AAA", "one.bin"), ("BBB", "two.bin")]);
        assert_eq!(weights, None);
    }

    #[test]
    fn test_odd_inputs_end_with_a_weights_file() {
        let inputs = args(&["AAA", "one.bin", "weights.16w70"]);
        let (pairs, weights) = split_inputs(&inputs).unwrap();
        assert_eq!(pairs, vec![("AAA", "one.bin")]);
        assert_eq!(weights, Some("weights.16w70"));
    }

    #[test]
    fn test_lone_weights_file_is_rejected() {
        let inputs = args(&["weights.16w70"]);
        assert!(split_inputs(&inputs).is_err());
    }

    #[test]
    fn test_cli_parses_the_documented_surface() {
        let cli = Cli::try_parse_from([
            "tracerank", "100000", "0", "ACME", "event1.bin", "ZEN", "event2.bin", "w.16w70",
        ])
        .unwrap();
        assert_eq!(cli.max_cycles, 100_000);
        assert_eq!(cli.threads, 0);
        assert_eq!(cli.inputs.len(), 5);
        assert_eq!(cli.report, None);
    }

    #[test]
    fn test_cli_rejects_missing_pairs() {
        assert!(Cli::try_parse_from(["tracerank", "100", "0"]).is_err());
    }

    #[test]
    fn test_evaluate_only_reports_under_the_supplied_weights() {
        let dir = env::temp_dir().join(format!("tracerank-cli-eval-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let winner = Candidate::new("UP", Digraph::new(2, 2, vec![9; 4]));
        let loser = Candidate::new("DOWN", Digraph::new(2, 2, vec![1; 4]));
        let event = Event::new("eval", vec![winner, loser], 0);
        let event_path = dir.join("eval-event.bin");
        let mut event_file = File::create(&event_path).unwrap();
        event.write_to(&mut event_file, 8).unwrap();

        // Halving weights reproduce each candidate's first-layer row sum as
        // its sink: 294_912 for the 9s matrix, 32_768 for the 1s matrix.
        let weights = vec![16_384; event.required_weights_count()];
        let weights_path =
            weights_file::write_weights(&dir, "2026-08-02_12-00-00", &weights).unwrap();

        let report_path = dir.join("eval-report.json");
        let cli = Cli {
            max_cycles: 1,
            threads: 1,
            inputs: vec![
                "UP".to_owned(),
                event_path.display().to_string(),
                weights_path.display().to_string(),
            ],
            report: Some(report_path.clone()),
        };
        run(&cli).unwrap();

        let report: serde_json::Value =
            serde_json::from_reader(File::open(&report_path).unwrap()).unwrap();
        assert_eq!(report["cycles_run"], 0);
        assert_eq!(report["rank_total"], 1);
        assert!(report["weights_file"].is_null());
        // The exact sinks of the supplied weights, not of some perturbed
        // proposal the crafter staged at construction.
        let candidates = report["events"][0]["candidates"].as_array().unwrap();
        assert_eq!(candidates[0]["name"], "UP");
        assert_eq!(candidates[0]["sink"], 294_912);
        assert_eq!(candidates[1]["name"], "DOWN");
        assert_eq!(candidates[1]["sink"], 32_768);
    }
}
