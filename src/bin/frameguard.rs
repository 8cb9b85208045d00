//! Frameguard CLI binary.
//!
//! Offline access to the validation gate for operators and test engineers.
//!
//! # Commands
//!
//! - `check` - Run a JSON query through the full pipeline
//! - `scan` - Score a single string against the threat signatures
//! - `normalize` - Show the canonical form of a string
//! - `rules` - List field rules (or threat signatures)

use std::io::{self, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use frameguard::{
    normalize::Normalizer,
    security::{all_signatures, PatternDetector, SIGNATURES_VERSION},
    Config, JsonLinesSink, Pipeline, RuleSet, TracingSink, VERSION,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "frameguard")]
#[command(version = VERSION)]
#[command(about = "Frameguard - query validation gate for the eyewear catalogue API", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON query through the full pipeline
    Check {
        /// JSON query (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Config file (default: $XDG_CONFIG_HOME/frameguard/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score a single string against the threat signatures
    Scan {
        /// Content to scan (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Rejection threshold (0.0 - 1.0)
        #[arg(short, long, default_value = "0.7")]
        threshold: f32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the canonical form of a string
    Normalize {
        /// Content to normalize (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List field rules
    Rules {
        /// List threat signatures instead
        #[arg(short, long)]
        signatures: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Check {
            input,
            file,
            config,
            json,
        } => cmd_check(input, file, config, json),

        Commands::Scan {
            input,
            file,
            threshold,
            json,
        } => cmd_scan(input, file, threshold, json),

        Commands::Normalize { input, file, json } => cmd_normalize(input, file, json),

        Commands::Rules { signatures, json } => cmd_rules(signatures, json),
    }
}

fn cmd_check(
    input: Option<String>,
    file: Option<PathBuf>,
    config: Option<PathBuf>,
    json_output: bool,
) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let query: Value = serde_json::from_str(content.trim())?;

    let config = Config::load(config)?;
    let pipeline = Pipeline::from_config(&config)?;
    let result = pipeline.evaluate(&query);

    match &config.audit.log_path {
        Some(path) => {
            pipeline.audit().flush(&JsonLinesSink::open(path)?);
        },
        None => {
            pipeline.audit().flush(&TracingSink);
        },
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.safe {
        println!("ACCEPTED (risk: {:.2})", result.risk_score);
        if let Some(value) = &result.value {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        for alteration in &result.alterations {
            println!("  altered: {}", serde_json::to_string(alteration)?);
        }
    } else {
        println!("REJECTED at {} (risk: {:.2})", result.stage, result.risk_score);
        if let Some(err) = &result.rejection {
            println!("  {err}");
        }
        print_threats(&result.signatures);
    }

    if !result.safe {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_scan(
    input: Option<String>,
    file: Option<PathBuf>,
    threshold: f32,
    json_output: bool,
) -> anyhow::Result<()> {
    let content = read_input(input, file)?;

    let detector = PatternDetector::from_config(&Config::load(None)?.pipeline)
        .with_threshold(threshold);
    let report = detector.scan(&content)?;
    let reject = detector.should_reject(&report);

    if json_output {
        let output = serde_json::json!({
            "safe": !reject,
            "risk_score": report.risk_score,
            "threats": report.threats,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !reject {
        println!("SAFE (risk: {:.2})", report.risk_score);
        print_threats(&report.threats);
    } else {
        println!("UNSAFE (risk: {:.2})", report.risk_score);
        println!();
        println!("Detected threats:");
        print_threats(&report.threats);
    }

    if reject {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_normalize(input: Option<String>, file: Option<PathBuf>, json_output: bool) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let normalizer = Normalizer::from_config(&Config::load(None)?.pipeline);
    let normalized = normalizer.normalize_str(content.trim_end_matches('\n'));

    if json_output {
        println!("{}", serde_json::to_string_pretty(&normalized)?);
        return Ok(());
    }

    println!("{}", normalized.canonical);
    if !normalized.layers.is_empty() {
        let layers: Vec<String> = normalized.layers.iter().map(ToString::to_string).collect();
        eprintln!("layers: {}", layers.join(" -> "));
    }
    if normalized.invisible_removed > 0 {
        eprintln!("invisible characters removed: {}", normalized.invisible_removed);
    }
    if let Some(suspicion) = normalized.suspicion {
        eprintln!("suspicious: {suspicion:?}");
    }
    Ok(())
}

fn cmd_rules(signatures: bool, json_output: bool) -> anyhow::Result<()> {
    if signatures {
        let all: Vec<_> = all_signatures().collect();
        if json_output {
            let output: Vec<_> = all
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "category": s.category,
                        "severity": s.severity,
                        "description": s.description,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Threat signatures (v{SIGNATURES_VERSION}, {}):", all.len());
            for s in all {
                println!("  {:<30} {:<20} {:.2}  {}", s.name, s.category, s.severity, s.description);
            }
        }
        return Ok(());
    }

    let rules = RuleSet::catalogue();
    if json_output {
        let output: Vec<_> = rules.iter().collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Field rules ({}):", rules.len());
        for rule in rules.iter() {
            let scope = if rule.queryable { "filter" } else { "option" };
            println!("  {:<16} {:<8} {}", rule.field, scope, rule.description);
        }
    }
    Ok(())
}

fn print_threats(threats: &[frameguard::DetectedThreat]) {
    for threat in threats {
        println!(
            "  - {} ({}) severity: {:.2} at {}",
            threat.name, threat.category, threat.severity, threat.path
        );
        println!("    {}", threat.description);
    }
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            Ok(s)
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
