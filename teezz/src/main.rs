//! CLI entry point (spec.md §6.4): `fuzz`, `triage`, `probevaldep`,
//! `recover`. Grounded on `cognitod::main`'s `clap::Parser` derive style
//! and `anyhow::Context` error plumbing, adapted to four subcommands
//! instead of one flat flag set.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::info;
use tokio::net::TcpStream;

use teezz::config::Config;
use teezz::device::{AdbDeviceController, DeviceController};
use teezz::fuzz::FuzzCampaign;
use teezz::recovery::valuedeps::SyntheticCallRule;
use teezz::runner::{Runner, SequenceRunner, SessionMetaData};

#[derive(Parser, Debug)]
#[command(name = "teezz")]
#[command(about = "Coverage-guided, model-aware grey-box fuzzer for TEE client APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a fuzzing campaign.
    Fuzz(FuzzArgs),
    /// Replay a single crashing sequence.
    Triage(TriageArgs),
    /// Probe and prune redundant value dependencies from a seed corpus.
    Probevaldep(ProbeValDepArgs),
    /// Recover parameter templates and value dependencies for a batch of
    /// recorded interaction groups.
    Recover(RecoverArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Target TEE client API ("triangle", "optee" or "qsee").
    target_tee: String,
    /// Campaign config file (TOML). Falls back to `TEEZZ_CONFIG` / `teezz.toml`.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Executor port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,
    /// Android device id to `adb forward` the executor port through.
    #[arg(long, conflicts_with = "tcp")]
    adb: Option<String>,
    /// `host:port` of an executor already reachable over TCP.
    #[arg(long, conflicts_with = "adb")]
    tcp: Option<String>,
}

#[derive(Args, Debug)]
struct FuzzArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Directory of recorded seed sequences.
    #[arg(long = "in", value_name = "DIR")]
    in_dir: Option<PathBuf>,
    /// Campaign directory (holds queue/, crashes/, timeouts/, cov/, stats.json).
    #[arg(long = "out", value_name = "DIR")]
    out_dir: Option<PathBuf>,
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Caps the number of candidates run this invocation.
    #[arg(long)]
    nruns: Option<u64>,
}

#[derive(Args, Debug)]
struct TriageArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Crashing sequence directory to replay.
    crash_seq_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ProbeValDepArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Directory of seed sequences to probe.
    #[arg(long = "in", value_name = "DIR")]
    in_dir: PathBuf,
    /// Directory the pruned sequences are written under (`<out>/seeds/`).
    #[arg(long = "out", value_name = "DIR")]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct RecoverArgs {
    /// Target TEE client API ("triangle", "optee" or "qsee").
    target_tee: String,
    /// Directory of recorded interaction groups to recover in place.
    #[arg(long = "in", value_name = "DIR")]
    batch_dir: PathBuf,
    /// Bounded worker pool size for Stage 4 common-subsequence mining.
    #[arg(long, default_value_t = 4)]
    max_workers: usize,
    /// Apply the built-in Triangle fingerprint-enrollment synthetic-call rule.
    #[arg(long)]
    synthesize_fp_enroll: bool,
}

fn load_config(path: &Option<PathBuf>) -> Config {
    if let Some(path) = path {
        std::env::set_var("TEEZZ_CONFIG", path);
    }
    Config::load()
}

/// Shells out to `adb forward` so a TCP connect to `127.0.0.1:{port}`
/// reaches the executor over the device's USB/network transport.
async fn adb_forward(serial: &str, port: u16) -> anyhow::Result<()> {
    let serial = serial.to_string();
    let status = tokio::task::spawn_blocking(move || {
        std::process::Command::new("adb")
            .args(["-s", &serial, "forward", &format!("tcp:{port}"), &format!("tcp:{port}")])
            .status()
    })
    .await
    .context("adb forward task panicked")?
    .context("failed to spawn adb")?;
    if !status.success() {
        anyhow::bail!("adb forward tcp:{port} tcp:{port} failed");
    }
    Ok(())
}

/// Resolves the device selector (CLI flags over config file) and
/// connects to the executor, returning the stream and, for an `adb`
/// target, a controller the caller can drive the reset ladder through.
async fn connect_target(cfg: &Config, target: &TargetArgs) -> anyhow::Result<(TcpStream, Option<AdbDeviceController>)> {
    let port = target.port.unwrap_or(cfg.campaign.port);
    let adb_serial = target.adb.clone().or_else(|| cfg.device.adb_serial.clone());
    let tcp_host = target.tcp.clone().or_else(|| cfg.device.tcp_host.clone());

    if let Some(serial) = adb_serial {
        adb_forward(&serial, port).await?;
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .context("connecting to adb-forwarded executor port")?;
        Ok((stream, Some(AdbDeviceController::new(serial))))
    } else if let Some(host) = tcp_host {
        let stream = TcpStream::connect(&host).await.context("connecting to executor")?;
        Ok((stream, None))
    } else {
        anyhow::bail!("no device target given: pass --adb <serial> or --tcp <host:port>, or set [device] in the config file")
    }
}

async fn handshake(stream: TcpStream, target_tee: &str) -> anyhow::Result<Runner<TcpStream>> {
    let mut runner = Runner::new(stream);
    let meta = SessionMetaData::for_variant(target_tee, None, &[]);
    runner.start(&meta).await.context("session START handshake failed")?;
    Ok(runner)
}

async fn run_fuzz(args: FuzzArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.target.config);
    let (stream, device_ctrl) = connect_target(&cfg, &args.target).await?;
    let runner = handshake(stream, &args.target.target_tee).await?;
    let seq_runner = SequenceRunner::new(runner);

    let out_dir = args.out_dir.unwrap_or_else(|| cfg.campaign.out_dir.clone());
    let in_dir = args.in_dir.unwrap_or_else(|| cfg.campaign.in_dir.clone());
    let duration = Duration::from_secs(args.duration_secs.unwrap_or(cfg.campaign.duration_secs));
    let nruns = args.nruns.or(cfg.campaign.nruns);
    let event_log_path = out_dir.join(&cfg.logging.event_log);

    let mut campaign = FuzzCampaign::bootstrap(
        seq_runner,
        &args.target.target_tee,
        &out_dir,
        Some(in_dir.as_path()),
        Some(event_log_path.as_path()),
    )
    .context("failed to bootstrap campaign")?;

    let device: Option<&dyn DeviceController> = if cfg.target.reboot {
        device_ctrl.as_ref().map(|c| c as &dyn DeviceController)
    } else {
        None
    };

    campaign.run_for(duration, nruns, device).await?;
    info!(
        "campaign finished: {} sequences, {} crashes, {} new coverage tuples",
        campaign.stats().sequences,
        campaign.stats().crashes,
        campaign.stats().newcov
    );
    Ok(())
}

async fn run_triage(args: TriageArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.target.config);
    let (stream, _device_ctrl) = connect_target(&cfg, &args.target).await?;
    let runner = handshake(stream, &args.target.target_tee).await?;
    let mut seq_runner = SequenceRunner::new(runner);

    let result = teezz::triage::triage(&mut seq_runner, &args.target.target_tee, &args.crash_seq_dir).await?;
    if !result.crashed {
        anyhow::bail!("crash did not reproduce");
    }
    Ok(())
}

async fn run_probevaldep(args: ProbeValDepArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.target.config);
    let (stream, _device_ctrl) = connect_target(&cfg, &args.target).await?;
    let runner = handshake(stream, &args.target.target_tee).await?;
    let mut seq_runner = SequenceRunner::new(runner);

    let reports = teezz::probevaldep::probe_value_dependencies(
        &mut seq_runner,
        &args.target.target_tee,
        &args.in_dir,
        &args.out_dir,
    )
    .await?;
    for report in &reports {
        info!(
            "{}: removed {}/{} value dependencies",
            report.seed_dir.display(),
            report.removed_dep_count,
            report.original_dep_count
        );
    }
    Ok(())
}

async fn run_recover(args: RecoverArgs) -> anyhow::Result<()> {
    let rules = if args.synthesize_fp_enroll {
        vec![SyntheticCallRule::triangle_pre_enroll_to_enroll()]
    } else {
        Vec::new()
    };

    let written = teezz::recovery::recover_batch_with_rules(&args.batch_dir, &args.target_tee, args.max_workers, &rules)
        .await
        .context("format-recovery pipeline failed")?;
    info!("recovered {} seed group(s) under {:?}", written.len(), args.batch_dir);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", Config::load().logging.level);
    }
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Fuzz(args) => run_fuzz(args).await,
        Command::Triage(args) => run_triage(args).await,
        Command::Probevaldep(args) => run_probevaldep(args).await,
        Command::Recover(args) => run_recover(args).await,
    };

    if let Err(err) = &result {
        log::error!("{err:?}");
        std::process::exit(1);
    }
    Ok(())
}
