use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use roboctl::brick::VexBrick;
use roboctl::config::{Config, ProgramModeKind, VEX_DEVICE_ENV};
use roboctl::errors::BrickError;

/// Flash and inspect VEX controllers through the PIC bootloader
#[derive(Parser, Debug)]
#[command(name = "vexctl", version, long_about = None)]
struct Cli {
    /// Dump every frame sent and received
    #[arg(short, long, global = true)]
    debug: bool,

    /// Serial device the programming cable is attached to
    #[arg(long, env = VEX_DEVICE_ENV, global = true)]
    dev: Option<PathBuf>,

    /// Shell command to run after a successful command
    #[arg(long, value_name = "PROG", global = true)]
    launch: Option<String>,

    /// Echo the controller's serial output after a successful command
    #[arg(long, global = true)]
    monitor: bool,

    /// Enter program mode by toggling RTS/DTR instead of asking for the button
    #[arg(long, global = true)]
    control_lines: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the bootloader version
    Status,
    /// Flash an Intel hex image
    Upload { file: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { "roboctl=debug" } else { "roboctl=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vexctl: {:#}", err);
            let code = err.downcast_ref::<BrickError>().map_or(1, BrickError::exit_code);
            std::process::exit(code);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::from_env().with_debug(cli.debug);
    if let Some(dev) = cli.dev {
        config.serial_device = dev;
    }
    if cli.control_lines {
        config.program_mode = ProgramModeKind::ControlLines;
    }

    let mut vex = VexBrick::new(&config.serial_device, &config);

    println!("Opening {}...", vex.device().display());
    vex.open()
        .with_context(|| format!("could not open {}", config.serial_device.display()))?;

    let mut outcome = match cli.command {
        Some(Command::Status) => vex.status().map(|version| println!("{}", version)),
        Some(Command::Upload { file }) => upload(&mut vex, &file),
        None => Ok(()),
    };
    if outcome.is_ok() && cli.monitor {
        let stdout = std::io::stdout();
        outcome = vex.monitor(&mut stdout.lock()).map(|n| debug!(bytes = n, "monitor done"));
    }

    let closed = vex.close();
    outcome?;
    closed?;

    match cli.launch {
        Some(prog) => launch(&prog),
        None => Ok(0),
    }
}

fn upload(vex: &mut VexBrick, file: &Path) -> Result<(), BrickError> {
    let mut stderr = std::io::stderr();
    let report = vex.upload(file, &mut |done, total| {
        let _ = write!(stderr, "\rWriting {}/{} clusters", done, total);
        let _ = stderr.flush();
    })?;
    eprintln!();
    println!(
        "{} bytes in {:.2}s ({:.0} bytes/s)",
        report.bytes,
        report.elapsed.as_secs_f64(),
        report.bytes_per_second()
    );
    Ok(())
}

/// Runs `prog` through the shell and passes on its exit status.
fn launch(prog: &str) -> Result<i32> {
    debug!(prog, "launching");
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(prog)
        .status()
        .with_context(|| format!("could not launch '{}'", prog))?;
    match status.code() {
        Some(code) => Ok(code),
        None => bail!("'{}' was killed by a signal", prog),
    }
}
