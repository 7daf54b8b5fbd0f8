//        ____                      _
// __   _|___ \__  ___ __ ___   ___| |_ ___ _ __
// \ \ / / __) \ \/ / '_ ` _ \ / _ \ __/ _ \ '__|
//  \ V / / __/ >  <| | | | | |  __/ ||  __/ |
//   \_/ |_____/_/\_\_| |_| |_|\___|\__\___|_|

// PRR, latency and CBR measurement for V2X runs, with reactive and adaptive DCC on top.
// Feed it the synthetic workload or a trace recorded elsewhere.

// Copyright 2025 The v2xmeter authors

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use v2xmeter::dcc::PolicyRegistry;
use v2xmeter::metrics::RunSummary;
use v2xmeter::metrics::logger::SummaryLogger;
use v2xmeter::simulation::{SimConfig, Simulation, Trace};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{Level, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args, Clone)]
struct RunArgs {
    /// JSON configuration; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    technology: Option<String>,
    #[arg(short, long)]
    duration: Option<f64>,
    #[arg(short = 'n', long)]
    vehicles: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    /// Print per-packet PRR and latency lines.
    #[arg(long)]
    stdout: bool,
    /// Write the end-of-run CBR report to this file.
    #[arg(long)]
    cbr_file: Option<String>,
    #[arg(short, long, default_value = "results")]
    output: PathBuf,
}

impl RunArgs {
    fn load(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
            None => SimConfig::default(),
        };
        if let Some(technology) = &self.technology {
            config = config.with_technology(technology);
        }
        if let Some(duration) = self.duration {
            config = config.with_duration(duration);
        }
        if let Some(vehicles) = self.vehicles {
            config = config.with_vehicles(vehicles);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if self.stdout {
            config.verbose_stdout = true;
        }
        if let Some(file) = &self.cbr_file {
            config.write_cbr_to_file = true;
            config.cbr_file = file.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// One run on the synthetic workload.
    Run {
        #[arg(short, long)]
        policy: Option<String>,
        #[command(flatten)]
        args: RunArgs,
    },

    /// Repeated runs per DCC policy, averaged.
    Compare {
        #[arg(short, long, default_value = "none,reactive,adaptive")]
        policies: String,
        #[arg(short, long, default_value_t = 3)]
        repetitions: u32,
        #[command(flatten)]
        args: RunArgs,
    },

    /// Feed a recorded CSV trace through the engine.
    Replay {
        trace: PathBuf,
        #[arg(short, long)]
        policy: Option<String>,
        #[command(flatten)]
        args: RunArgs,
    },

    List,
}

fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { policy, args } => {
            let mut config = args.load()?;
            if let Some(policy) = policy {
                config = config.with_policy(policy);
            }
            run_single(config, &args.output)?;
        }

        Commands::Compare {
            policies,
            repetitions,
            args,
        } => {
            let config = args.load()?;
            compare_policies(&config, &policies, repetitions, &args.output, program_start)?;
        }

        Commands::Replay { trace, policy, args } => {
            let mut config = args.load()?;
            if let Some(policy) = policy {
                config = config.with_policy(policy);
            }
            replay_trace(config, &trace, args.duration.is_some(), &args.output)?;
        }

        Commands::List => {
            println!("\nAvailable DCC policies");
            println!("  - none");
            for policy in PolicyRegistry::global().list() {
                println!("  - {}", policy);
            }

            println!("\nChannel technologies");
            println!("  - 80211p");
            println!("  - nr");

            println!("\nUsage: cargo run -- run --policy <name>");
            println!("Example: cargo run -- compare --policies none,reactive --repetitions 5\n");
        }
    }

    let total_time = program_start.elapsed();
    info!("Total runtime: {:.2}s", total_time.as_secs_f64());

    Ok(())
}

fn progress_bar(len: u64, unit: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!("[{{elapsed_precise}}] {{bar:40.orange/yellow}} {{pos}}/{{len}}{unit} {{msg}}"))?,
    );
    Ok(pb)
}

fn run_single(config: SimConfig, output: &Path) -> Result<()> {
    info!("v2xmeter: single run");

    let mut sim = Simulation::with_workload(config)?;
    let pb = progress_bar(sim.end_time().as_secs_f64().ceil() as u64, "s")?;
    let summary = sim.run(Some(&pb))?;
    pb.finish_with_message("Simulation complete");

    comparison_table(std::slice::from_ref(&summary));
    save_results(&[summary], output, "run")
}

fn compare_policies(
    base: &SimConfig,
    policies: &str,
    repetitions: u32,
    output: &Path,
    global_start: Instant,
) -> Result<()> {
    let policy_names: Vec<&str> = policies.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

    info!("v2xmeter: comparison");
    info!("Policies: {}", policy_names.join(", "));
    info!("Repetitions: {}", repetitions);
    info!("Duration per run: {}s", base.simulation_time_seconds);

    let jobs: Vec<(String, u32)> = policy_names
        .iter()
        .flat_map(|p| (1..=repetitions).map(move |rep| (p.to_string(), rep)))
        .collect();
    let pb = progress_bar(jobs.len() as u64, " runs")?;

    let runs: Vec<RunSummary> = jobs
        .par_iter()
        .map(|(policy, rep)| -> Result<RunSummary> {
            let config = base
                .clone()
                .with_policy(policy.as_str())
                .with_name(format!("{}_{}", policy, rep))
                .with_seed(base.seed + u64::from(*rep) - 1);
            let summary = Simulation::with_workload(config)?.run(None)?;
            pb.inc(1);
            Ok(summary)
        })
        .collect::<Result<_>>()?;
    pb.finish_with_message(format!("done in {}", format_time(global_start.elapsed())));

    let averaged: Vec<RunSummary> = policy_names
        .iter()
        .filter_map(|name| {
            let reps: Vec<RunSummary> = runs.iter().filter(|r| r.label.starts_with(&format!("{}_", name))).cloned().collect();
            RunSummary::average(&reps).map(|mut avg| {
                avg.label = name.to_string();
                avg
            })
        })
        .collect();

    comparison_table(&averaged);
    save_results(&averaged, output, "comparison")
}

fn replay_trace(mut config: SimConfig, path: &Path, fixed_duration: bool, output: &Path) -> Result<()> {
    let trace = Trace::from_path(path)?;
    info!("Replaying {} events from {}", trace.event_count(), path.display());

    if !fixed_duration {
        // Let the last packets reach their PRR timeout.
        config.simulation_time_seconds = trace.span().as_secs_f64() + config.prr_computation_timeout_seconds + 0.001;
    }
    if config.name == SimConfig::default().name {
        config.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "replay".to_string());
    }

    let mut sim = Simulation::from_trace(config, &trace)?;
    let summary = sim.run(None)?;
    comparison_table(std::slice::from_ref(&summary));
    save_results(&[summary], output, "replay")
}

/// JSON snapshot per invocation plus one appended CSV row per summary.
fn save_results(summaries: &[RunSummary], output: &Path, kind: &str) -> Result<()> {
    std::fs::create_dir_all(output)?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let json_path = output.join(format!("{}_{}.json", kind, timestamp));
    std::fs::write(&json_path, serde_json::to_string_pretty(summaries)?)?;
    info!("Summary saved to: {}", json_path.display());

    let csv_path = output.join("summary.csv");
    SummaryLogger::append(&csv_path)?.log_batch(summaries)?;
    info!("Appended {} rows to {}", summaries.len(), csv_path.display());
    Ok(())
}

fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn comparison_table(summaries: &[RunSummary]) {
    println!("\n╔═══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                              DCC COMPARISON                                   ║");
    println!("╠═══════════════╦═══════════╦═══════════╦════════════╦════════════╦═════════════╣");
    println!("║ Run           ║ PRR       ║ Latency   ║ CBR        ║ Sent       ║ Baseline    ║");
    println!("║               ║           ║ (ms)      ║ (%)        ║ (packets)  ║ (stations)  ║");
    println!("╠═══════════════╬═══════════╬═══════════╬════════════╬════════════╬═════════════╣");

    for s in summaries {
        println!(
            "║ {:<13} ║ {:>9.4} ║ {:>9.3} ║ {:>9.2}% ║ {:>10} ║ {:>11.2} ║",
            s.label,
            s.avg_prr,
            s.avg_latency_ms,
            s.avg_cbr * 100.0,
            s.packets_sent,
            s.avg_baseline,
        );
    }

    println!("╚═══════════════╩═══════════╩═══════════╩════════════╩════════════╩═════════════╝\n");

    if summaries.len() < 2 {
        return;
    }
    if let Some(best) = summaries.iter().max_by(|a, b| a.avg_prr.total_cmp(&b.avg_prr)) {
        println!("Highest PRR: {} ({:.4})", best.label, best.avg_prr);
    }
    if let Some(best) = summaries.iter().min_by(|a, b| a.avg_latency_ms.total_cmp(&b.avg_latency_ms)) {
        println!("Lowest Latency: {} ({:.3} ms)", best.label, best.avg_latency_ms);
    }
    if let Some(best) = summaries.iter().min_by(|a, b| a.avg_cbr.total_cmp(&b.avg_cbr)) {
        println!("Lowest CBR: {} ({:.2}%)", best.label, best.avg_cbr * 100.0);
    }

    println!();
}
