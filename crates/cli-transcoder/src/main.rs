use std::io::Write;
use std::path::PathBuf;
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, Level, LevelFilter};
use transcoder::{
    config::RunConfig,
    nzbget,
    pipeline::{self, RunStatus, Toolchain},
};

/// Re-encode a directory of videos to HEVC, replacing originals that pass the size gate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to process; taken from NZBPP_DIRECTORY when run by NZBGet
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// NZBGet reads `[LEVEL] message` lines from stdout into its own log
fn init_logger(verbose: bool, under_nzbget: bool) {
    let default_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level).parse_default_env();

    if under_nzbget {
        builder
            .target(env_logger::Target::Stdout)
            .format(|buf, record| {
                let tag = match record.level() {
                    Level::Error => "ERROR",
                    Level::Warn => "WARNING",
                    Level::Info => "INFO",
                    Level::Debug | Level::Trace => "DETAIL",
                };
                writeln!(buf, "[{}] {}", tag, record.args())
            });
    } else {
        builder.format_timestamp_secs();
    }

    builder.init();
}

/// Resolve the directory and settings for this run
fn load_run(args: &Args, under_nzbget: bool) -> Result<(PathBuf, RunConfig)> {
    let cfg = RunConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    if under_nzbget {
        info!("Script triggered from NZBGet");
        let ctx = nzbget::from_env(env_var, cfg)?;
        let dir = args.dir.clone().unwrap_or(ctx.directory);
        return Ok((dir, ctx.config));
    }

    match &args.dir {
        Some(dir) => Ok((dir.clone(), cfg)),
        None => bail!("No directory given; pass --dir or run as an NZBGet post-processing script"),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let under_nzbget = nzbget::is_nzbget(env_var);
    init_logger(args.verbose, under_nzbget);

    let (dir, cfg) = match load_run(&args, under_nzbget) {
        Ok(run) => run,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(RunStatus::Error.exit_code());
        }
    };

    info!("Processing directory: {}", dir.display());
    info!("  Extensions: {}", cfg.extensions.join(","));
    info!(
        "  CRF sd/hd/fullhd/uhd: {}/{}/{}/{}",
        cfg.crf.sd, cfg.crf.hd, cfg.crf.full_hd, cfg.crf.uhd
    );
    info!(
        "  rc-lookahead {}, aq-mode {}, preset {}",
        cfg.tuning.rc_lookahead, cfg.tuning.aq_mode, cfg.tuning.preset
    );
    info!("  Size gate: {}-{}%", cfg.min_percent, cfg.max_percent);
    info!("  Attempts per file: {}, convert DTS: {}", cfg.retry_budget, cfg.convert_dts);

    let tools = Toolchain::from_config(&cfg);
    let status = match pipeline::run(&dir, &cfg, &tools).await {
        Ok(summary) => summary.status(),
        Err(e) => {
            error!("{}", e);
            RunStatus::Error
        }
    };

    info!("Exiting with {:?} ({})", status, status.exit_code());
    std::process::exit(status.exit_code());
}
