//! StormTrack Simulator CLI
//!
//! Run tracking scenarios on fixtures or seeded synthetic storm fields.

use clap::Parser;
use stormtrack_core::{SplitPolicy, TrackingConfig};
use stormtrack_sim::scenarios::ScenarioId;
use stormtrack_sim::{ScenarioResult, ScenarioRunner, SimExport, ThresholdExtractor};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// StormTrack deterministic scenario runner
#[derive(Parser, Debug)]
#[command(name = "stormtrack-sim")]
#[command(about = "Track storm cells through fixture and synthetic scenarios")]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (rectangle, independent_rectangles, two_merging,
    /// only_fuse, only_split, splitting_in_two, storm_field, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of random seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Frames generated for storm_field
    #[arg(short, long, default_value = "20")]
    frames: usize,

    /// Storms spawned for storm_field
    #[arg(long, default_value = "6")]
    storms: usize,

    /// Split identity policy (inherit, branch)
    #[arg(long, default_value = "inherit", value_parser = parse_split_policy)]
    split_policy: SplitPolicy,

    /// Halo parameter of extracted clusters (reported in exports; linking
    /// uses the plain ellipse)
    #[arg(long, default_value = "6.0")]
    min_axis: f64,

    /// Lower extraction threshold
    #[arg(long, default_value = "0.0")]
    thresh_low: f64,

    /// Core extraction threshold
    #[arg(long, default_value = "2.5")]
    thresh_high: f64,

    /// Same-frame consolidation fraction (e.g. 0.8)
    #[arg(long)]
    frac_ellipse: Option<f64>,

    /// Fold clusters whose centres sit inside each other's ellipse
    #[arg(long)]
    merge_contained: bool,

    /// Drop tracks with less than this fraction inside the coastal mask (e.g. 0.8)
    #[arg(long)]
    frac_mask: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frames and tracks of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn parse_split_policy(s: &str) -> Result<SplitPolicy, String> {
    match s.to_lowercase().as_str() {
        "inherit" => Ok(SplitPolicy::Inherit),
        "branch" => Ok(SplitPolicy::Branch),
        _ => Err(format!("Unknown split policy: {} (expected inherit or branch)", s)),
    }
}

fn build_runner(args: &Args, seed: u64) -> ScenarioRunner {
    let mut config = TrackingConfig::default()
        .with_split_policy(args.split_policy)
        .with_contained_merge(args.merge_contained);
    if let Some(frac) = args.frac_ellipse {
        config = config.with_overlap_fraction(frac);
    }

    let extractor = ThresholdExtractor::new(args.thresh_low, args.thresh_high).with_min_axis(args.min_axis);
    let runner = ScenarioRunner::new(seed)
        .with_config(config)
        .with_frames(args.frames)
        .with_storms(args.storms)
        .with_extractor(extractor);

    match args.frac_mask {
        Some(frac) => runner.with_mask_fraction(frac),
        None => runner,
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("StormTrack Simulator v{}", env!("CARGO_PKG_VERSION"));
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        let result = build_runner(&args, base_seed).run(scenarios[0]);
        if let Err(e) = SimExport::from_result(&result).write_to_file(export_path) {
            error!("Failed to write {}: {}", export_path, e);
            std::process::exit(1);
        }

        if result.passed {
            info!("✓ {} (seed={}) PASSED - exported to {}", scenarios[0].name(), base_seed, export_path);
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenarios[0].name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = build_runner(&args, seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "time_steps": r.store.num_time_steps(),
                    "tracks": r.num_tracks(),
                    "merges": r.num_merges(),
                    "splits": r.num_splits(),
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode summary: {}", e),
        }
    } else if failed_count == 0 {
        info!("All {} scenario runs passed", total);
    } else {
        error!("{}/{} scenario runs failed", failed_count, total);
        for result in all_results.iter().filter(|r| !r.passed) {
            error!(
                "  - {} seed={}: {}",
                result.scenario.name(),
                result.seed,
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
