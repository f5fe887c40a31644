use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use libxpu::host::HostServices;
use libxpu::{TargetSpec, VolumeContext, VolumeInitiator, XpuConfig, XpuInitiator};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "xpuctl")]
#[command(about = "Attach volumes through an xPU", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attach a volume, print its device path and hold it until Ctrl-C
    Attach(AttachArgs),
    /// Validate an xpu-<backend>-<transport> target type
    ParseTarget {
        /// Target type, e.g. xpu-opi-nvme
        target_type: String,
    },
}

#[derive(Debug, Args)]
struct AttachArgs {
    /// xPU control plane endpoint, e.g. http://10.0.0.2:50051
    #[arg(long, value_name = "URL")]
    endpoint: String,

    /// Target type (format: xpu-<backend>-<transport>)
    #[arg(long, value_name = "TYPE")]
    target_type: String,

    /// Volume context entry (format: KEY=VALUE), can be set multiple times
    #[arg(long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// YAML or JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Timeout for establishing the control plane connection, in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,
}

fn init_tracing(json: bool) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn parse_context(options: &[String]) -> Result<VolumeContext> {
    let mut parsed = HashMap::new();
    for raw in options {
        let (key, value) = raw.split_once('=').with_context(|| {
            format!("invalid --context value `{raw}`: expected format KEY=VALUE")
        })?;

        let key = key.trim();
        if key.is_empty() {
            bail!("invalid --context value `{raw}`: key must not be empty");
        }

        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(VolumeContext::from(parsed))
}

fn load_config(path: Option<&PathBuf>) -> Result<XpuConfig> {
    let config = match path {
        Some(path) => XpuConfig::from_file(path)?,
        None => XpuConfig::default(),
    };
    Ok(config.apply_env()?)
}

async fn attach(args: AttachArgs) -> Result<()> {
    let config = load_config(args.config.as_ref()).context("load config")?;
    let volume = parse_context(&args.context)?;
    let channel = libxpu::opi::connect(
        &args.endpoint,
        Duration::from_secs(args.connect_timeout_secs),
    )
    .await
    .context("connect to xPU control plane")?;

    let host = HostServices::sysfs(&config);
    let mut xpu = XpuInitiator::with_host(&args.target_type, volume, channel, host, &config)
        .context("build initiator")?;

    let path = xpu.connect().await.context("attach volume")?;
    println!("{}", path.display());
    info!(path = %path.display(), "volume attached, press Ctrl-C to detach");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to wait for Ctrl-C, detaching now");
    }

    xpu.disconnect().await.context("detach volume")?;
    info!("volume detached");
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Attach(args) => attach(args).await,
        Command::ParseTarget { target_type } => {
            let target: TargetSpec = target_type.parse()?;
            println!(
                "backend={} transport={} pci={}",
                target.backend,
                target.transport,
                target.transport.is_pci()
            );
            Ok(())
        }
    }
}
