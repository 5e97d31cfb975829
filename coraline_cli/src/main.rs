use coraline_core::config::CoralineConfig;
use coraline_core::driver::FuzzDriver;
use coraline_core::executor::ExecutionHarness;
use coraline_core::handler::{Finding, Findings, LogHandler};
use coraline_core::mutator::{MutationRule, RuleKind};
use coraline_core::seed;
use coraline_core::session::Session;
use coraline_core::workdir::WorkDir;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "coraline.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Score-guided mutation fuzzer", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info", global = true)]
    log: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mutate the sample and run the target once per index
    Fuzz(FuzzArgs),
    /// Write the mutated buffer for one index, for reproducing a finding
    Mutate(MutateArgs),
}

#[derive(clap::Args, Debug)]
struct FuzzArgs {
    /// Configuration file; `coraline.toml` is used when present
    #[clap(short, long, alias = "config-file", value_parser)]
    config: Option<PathBuf>,
    #[clap(long)]
    sample: Option<PathBuf>,
    #[clap(long)]
    scores: Option<PathBuf>,
    #[clap(long)]
    seed: Option<String>,
    #[clap(long)]
    rule: Option<RuleKind>,
    /// Per-run timeout in seconds
    #[clap(short, long)]
    timeout: Option<u64>,
    #[clap(long)]
    work_dir: Option<PathBuf>,
    #[clap(long)]
    start: Option<u64>,
    /// Exclusive end index; runs until interrupted when omitted
    #[clap(long)]
    end: Option<u64>,
    #[clap(long)]
    threads: Option<usize>,
    /// Leave the work directory in place after the run
    #[clap(long)]
    keep_work_dir: bool,
    /// Target program and leading arguments; the input path is appended
    #[clap(last = true)]
    target: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct MutateArgs {
    #[clap(long)]
    sample: PathBuf,
    #[clap(long)]
    scores: PathBuf,
    #[clap(long)]
    seed: String,
    #[clap(long)]
    index: u64,
    #[clap(long, default_value = "threshold")]
    rule: RuleKind,
    #[clap(short, long)]
    out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log) {
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let result = match cli.command {
        Command::Fuzz(args) => run_fuzz(args),
        Command::Mutate(args) => run_mutate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<CoralineConfig> {
    match path {
        Some(config_path) => {
            tracing::info!(path = ?config_path, "loading configuration");
            CoralineConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                tracing::info!(path = ?default_config_path, "loading default configuration");
                CoralineConfig::load_from_file(&default_config_path)
            } else {
                Ok(CoralineConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut CoralineConfig, args: FuzzArgs) {
    let session = &mut config.session;
    if args.sample.is_some() {
        session.sample = args.sample;
    }
    if args.scores.is_some() {
        session.scores = args.scores;
    }
    if args.seed.is_some() {
        session.seed = args.seed;
    }
    if let Some(rule) = args.rule {
        session.rule = rule;
    }

    let harness = &mut config.harness;
    if !args.target.is_empty() {
        harness.command = args.target;
    }
    if let Some(timeout) = args.timeout {
        harness.timeout_secs = timeout;
    }
    if args.work_dir.is_some() {
        harness.work_dir = args.work_dir;
    }

    let fuzzer = &mut config.fuzzer;
    if let Some(start) = args.start {
        fuzzer.start = start;
    }
    if args.end.is_some() {
        fuzzer.end = args.end;
    }
    if let Some(threads) = args.threads {
        fuzzer.threads = threads;
    }
}

fn run_fuzz(args: FuzzArgs) -> anyhow::Result<()> {
    let keep_work_dir = args.keep_work_dir;
    let mut config = load_config(args.config.clone())?;
    apply_overrides(&mut config, args);
    tracing::debug!(?config, "effective configuration");

    let sample_path = config
        .session
        .sample
        .clone()
        .context("no sample given (use --sample or [session] sample)")?;
    let scores_path = config
        .session
        .scores
        .clone()
        .context("no score table given (use --scores or [session] scores)")?;
    if config.harness.command.is_empty() {
        anyhow::bail!("no target given (pass it after `--`, or set [harness] command)");
    }

    let session = Session::load(&sample_path, &scores_path, config.session.seed.clone())?;
    let root = config
        .harness
        .work_dir
        .clone()
        .unwrap_or_else(|| WorkDir::default_root(&seed::hex(session.seed())));
    let workdir = WorkDir::create(&root)?;

    let harness = ExecutionHarness::new(config.harness.command.clone(), workdir, session.seed())?
        .with_poll_interval(config.harness.poll_interval());
    let driver = FuzzDriver::new(session, harness)
        .with_boxed_rule(config.session.rule.build())
        .with_timeout(config.harness.timeout())
        .with_threads(config.fuzzer.threads);

    let cancel = driver.cancel_flag();
    register_interrupts(&cancel)?;

    let range = config.fuzzer.range();
    println!(
        "Fuzzing {:?} over indices {} with seed {} (rule: {}, work dir: {:?})",
        driver.harness().command(),
        range,
        driver.session().seed(),
        config.session.rule.as_str(),
        root
    );
    if !range.is_bounded() {
        println!("No end index given; press Ctrl-C to stop");
    }

    let mut handler = LogHandler::new(Findings::new(), |index| driver.mutated(index));
    let result = driver.fuzz(range, &mut handler);
    let findings = handler.into_inner();

    if !keep_work_dir {
        if let Err(err) = driver.cleanup() {
            tracing::warn!(error = %err, "failed to clean up work directory");
        }
    }

    let stats = result?;
    for finding in &findings.found {
        match finding {
            Finding::Hang { index } => println!("  hang   index={index}"),
            Finding::Crash { index, status } => println!("  crash  index={index} status={status}"),
        }
    }
    println!(
        "{} after {} executions in {:.2?} ({:.2} execs/sec): {} normal, {} hangs, {} crashes",
        if stats.cancelled { "Interrupted" } else { "Finished" },
        stats.executions,
        stats.elapsed,
        stats.execs_per_sec(),
        stats.normal,
        stats.hangs,
        stats.crashes
    );
    if stats.cleanup_failures > 0 {
        println!("  {} transient inputs could not be removed", stats.cleanup_failures);
    }
    if stats.findings() > 0 {
        println!(
            "Reproduce with: coraline mutate --seed {} --index <INDEX> --sample {:?} --scores {:?} --out <FILE>",
            driver.session().seed(),
            sample_path,
            scores_path
        );
    }
    Ok(())
}

fn register_interrupts(cancel: &Arc<AtomicBool>) -> anyhow::Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(cancel))
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

fn run_mutate(args: MutateArgs) -> anyhow::Result<()> {
    let session = Session::load(&args.sample, &args.scores, Some(args.seed))?;
    let buffer = args.rule.build().mutate(
        session.seed(),
        args.index,
        session.sample(),
        session.scores(),
    );
    std::fs::write(&args.out, &buffer)
        .with_context(|| format!("failed to write mutated input to {:?}", args.out))?;
    println!(
        "Wrote {} bytes for index {} (seed {}) to {:?}",
        buffer.len(),
        args.index,
        session.seed(),
        args.out
    );
    Ok(())
}
