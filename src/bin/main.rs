//! CLI tool for devmon

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "devmon")]
#[command(about = "devmon: list devices and watch device events from the native device subsystem", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.config/devmon/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// List devices currently present
    List {
        /// Only list devices in this subsystem (repeatable, matches any)
        #[arg(short, long = "subsystem")]
        subsystems: Vec<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print device events as they happen
    Watch {
        /// Event source: "udev" or "kernel"
        #[arg(short, long)]
        source: Option<String>,
        /// Exit after this many events
        #[arg(short = 'n', long)]
        count: Option<u64>,
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Show every property of one device
    Info {
        /// Device sys-path, e.g. /sys/class/net/lo
        syspath: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use devmon::{Config, DeviceContext, Error, Platform};

    let cli = Cli::parse();

    env_logger::init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let ctx = match DeviceContext::open() {
        Ok(ctx) => ctx,
        Err(Error::CapabilityUnavailable(msg)) => {
            let platform = Platform::current();
            let reason = platform.unavailable_reason().unwrap_or(msg);
            eprintln!("Device monitoring is not available: {}", reason);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };
    log::debug!("opened {} context", ctx.provider());

    match cli.command {
        Commands::List { subsystems, json } => {
            let subsystems = if subsystems.is_empty() {
                config.monitor.subsystems.clone()
            } else {
                subsystems
            };
            run_list(&ctx, &config, &subsystems, json)?;
        }
        Commands::Watch {
            source,
            count,
            json,
        } => {
            let source = source.unwrap_or_else(|| config.monitor.source_name.clone());
            run_watch(&ctx, &config, &source, count, json)?;
        }
        Commands::Info { syspath, json } => {
            run_info(&ctx, &config, &syspath, json)?;
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn run_list(
    ctx: &devmon::DeviceContext,
    config: &devmon::Config,
    subsystems: &[String],
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut enumerator = ctx.enumerator()?.with_extractor(config.extractor());
    for subsystem in subsystems {
        enumerator.add_subsystem_filter(subsystem)?;
    }
    enumerator.scan()?;

    let devices: Vec<_> = enumerator.entries()?.collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("=== Devices ===");
    for device in &devices {
        print_device_line(device);
    }
    println!("\n{} device(s)", devices.len());
    Ok(())
}

#[cfg(feature = "cli")]
fn run_watch(
    ctx: &devmon::DeviceContext,
    config: &devmon::Config,
    source: &str,
    count: Option<u64>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    use devmon::MonitorWorker;

    let monitor = ctx.monitor(source)?.with_extractor(config.extractor());
    let worker = MonitorWorker::spawn(monitor, config.worker.queue_capacity)?;
    if !json {
        println!("Watching '{}' events (Ctrl+C to exit)", source);
    }

    let mut seen = 0u64;
    while count.map_or(true, |limit| seen < limit) {
        let event = worker.recv()?;
        seen += 1;
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!(
                "[{}] #{} {}",
                event.received_at.format("%H:%M:%S%.3f"),
                event.sequence,
                event.properties
            );
        }
    }

    // The worker stays blocked in the native receive until one more event
    // arrives, so exit without joining it.
    drop(worker);
    Ok(())
}

#[cfg(feature = "cli")]
fn run_info(
    ctx: &devmon::DeviceContext,
    config: &devmon::Config,
    syspath: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = ctx
        .device_from_syspath(syspath)?
        .ok_or_else(|| format!("no device at {}", syspath))?;
    let extractor = config.extractor();
    let properties = extractor.extract(&device);
    let all = extractor.collect(&device);

    if json {
        let value = serde_json::json!({
            "syspath": syspath,
            "summary": properties,
            "properties": all,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("=== Device Information ===");
    println!("Sys-path: {}", syspath);
    print_device_line(&properties);
    println!("\nProperties ({}):", all.len());
    for (key, value) in &all {
        println!("  {}={}", key, value);
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn print_device_line(device: &devmon::DeviceProperties) {
    println!(
        "{:<10} {:<12} {}",
        device.subsystem.as_deref().unwrap_or("-"),
        device.driver.as_deref().unwrap_or("-"),
        device.dev_path.as_deref().unwrap_or("-")
    );
    if device.id_vendor.is_some() || device.id_model.is_some() {
        println!(
            "           Vendor: {}  Product: {}",
            device.id_vendor.as_deref().unwrap_or("-"),
            device.id_model.as_deref().unwrap_or("-")
        );
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
