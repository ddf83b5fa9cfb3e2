//! hopnat entry point
//!
//! Loads configuration, detects the host platform and runs one redirect
//! operation. Exit code 0 on success (skipped families included), 1 on a
//! hard failure, 2 on configuration errors.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hy2_common::{Platform, ShellExecutor};
use hy2_hopnat::config::DEFAULT_CONFIG_PATH;
use hy2_hopnat::{AddressFamily, HopNatConfig, NatContext, PortRange, RedirectMgr, RedirectReport};

const EXIT_CONFIG: u8 = 2;

/// UDP port-hopping redirect manager for Hysteria 2
#[derive(Parser, Debug)]
#[command(name = "hopnat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the hopping redirect
    Add(RuleArgs),
    /// Remove the hopping redirect
    Remove(RuleArgs),
    /// List installed redirects
    Status {
        #[arg(long, value_enum, default_value_t = FamilyArg::Both)]
        family: FamilyArg,
    },
    /// Report whether the kernel supports IPv6 NAT
    Probe,
    /// Show the detected platform
    Platform,
}

#[derive(Args, Debug)]
struct RuleArgs {
    /// Hopping range, e.g. 20000:50000 (overrides the config file)
    #[arg(long)]
    range: Option<PortRange>,

    /// Port the server listens on (overrides the config file)
    #[arg(long = "to")]
    to: Option<u16>,

    #[arg(long, value_enum, default_value_t = FamilyArg::Both)]
    family: FamilyArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FamilyArg {
    V4,
    V6,
    Both,
}

impl FamilyArg {
    fn families(self) -> &'static [AddressFamily] {
        match self {
            FamilyArg::V4 => &[AddressFamily::Ipv4],
            FamilyArg::V6 => &[AddressFamily::Ipv6],
            FamilyArg::Both => &AddressFamily::ALL,
        }
    }
}

impl RuleArgs {
    /// Command-line values take precedence over the file
    fn resolve(&self, config: &HopNatConfig) -> anyhow::Result<(PortRange, u16)> {
        let ports = match self.range {
            Some(range) => range,
            None => config.port_range()?,
        };
        let target = self.to.unwrap_or(config.hopping.target);
        if target == 0 {
            bail!("target port must not be 0");
        }
        Ok((ports, target))
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<HopNatConfig> {
    let config = HopNatConfig::load_or_default(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}

fn print_report(report: &RedirectReport) -> ExitCode {
    for entry in report.entries() {
        match &entry.result {
            Ok(change) => println!("{}: {}", entry.family, change.outcome),
            Err(e) => println!("{}: failed: {}", entry.family, e),
        }
    }
    for warning in report.warnings() {
        warn!("{}", warning);
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        for (family, e) in report.failures() {
            error!(family = %family, "{}", e);
        }
        ExitCode::FAILURE
    }
}

/// Runs `add` (`install`) or `remove`
async fn change(
    mgr: &mut RedirectMgr<ShellExecutor>,
    config: &HopNatConfig,
    args: &RuleArgs,
    install: bool,
) -> ExitCode {
    let (ports, target) = match args.resolve(config) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let families = args.family.families();

    let result = if install {
        info!("Ensuring redirect udp {} -> {}", ports, target);
        mgr.apply(ports, target, families).await
    } else {
        info!("Removing redirect udp {} -> {}", ports, target);
        mgr.remove(ports, target, families).await
    };

    match result {
        Ok(report) => print_report(&report),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn status(mgr: &mut RedirectMgr<ShellExecutor>, families: &[AddressFamily]) -> ExitCode {
    let mut code = ExitCode::SUCCESS;

    for &family in families {
        match mgr.list(family).await {
            Ok(rules) if rules.is_empty() => println!("{}: no redirects", family),
            Ok(rules) => {
                for rule in rules {
                    println!("{}", rule);
                }
            }
            Err(e) if e.is_soft() => println!("{}: unavailable ({})", family, e),
            Err(e) => {
                error!("{}", e);
                code = ExitCode::FAILURE;
            }
        }
    }

    code
}

fn print_platform(platform: &Platform, ctx: &NatContext) {
    println!("os:              {} {}", platform.os_id, platform.version_id);
    println!("family:          {}", platform.os_family.as_str());
    println!("package manager: {}", platform.package_manager.command());
    println!("init system:     {}", platform.init_system.as_str());
    println!("persistence:     {}", ctx.persistence);
    if let Some(package) = platform.package_manager.persistence_package() {
        println!("persistence pkg: {}", package);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let platform = match Platform::detect() {
        Ok(platform) => platform,
        Err(e) => {
            error!("Failed to detect platform: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ctx = match config.nat_context(&platform) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Command::Platform = cli.command {
        print_platform(&platform, &ctx);
        return ExitCode::SUCCESS;
    }

    let mut mgr = RedirectMgr::new(ShellExecutor, ctx);

    match cli.command {
        Command::Add(args) => change(&mut mgr, &config, &args, true).await,
        Command::Remove(args) => change(&mut mgr, &config, &args, false).await,
        Command::Status { family } => status(&mut mgr, family.families()).await,
        Command::Probe => {
            let supported = mgr.probe_ipv6_nat_support().await;
            println!(
                "IPv6 NAT: {}",
                if supported { "supported" } else { "not supported" }
            );
            ExitCode::SUCCESS
        }
        Command::Platform => ExitCode::SUCCESS,
    }
}
