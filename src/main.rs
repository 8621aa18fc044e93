use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use roboctl::brick::{discover, BrickHandle, ProbeFlags};
use roboctl::config::{Config, BTNAME_ENV};
use roboctl::errors::BrickError;
use roboctl::meta::OutputPort;
use roboctl::upload::UploadFlags;

/// Talk to Lego NXT bricks over USB or Bluetooth
#[derive(Parser, Debug)]
#[command(name = "roboctl", version, long_about = None)]
struct Cli {
    /// Dump every frame sent and received
    #[arg(short, long, global = true)]
    debug: bool,

    /// Bluetooth name or address of the NXT to use when none is on USB
    #[arg(long, env = BTNAME_ENV, global = true)]
    btname: Option<String>,

    /// Replace files that already exist on the brick
    #[arg(long, global = true)]
    overwrite: bool,

    /// Repeat a sound until stopped
    #[arg(long = "loop", global = true)]
    looping: bool,

    /// Do not play a sound when an upload finishes
    #[arg(long, global = true)]
    no_sound: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print name, firmware and battery of every brick
    Status,
    /// Copy programs or sounds to the brick
    Upload { files: Vec<PathBuf> },
    /// Remove a file from the brick
    Delete { name: String },
    /// Start a program
    Start { name: String },
    /// Stop the running program on every brick
    Stop,
    /// Play a sound file stored on the brick
    Playsound { name: String },
    /// Play a tone
    Playtone {
        /// Frequency in Hz, 200 to 14000
        frequency: u16,
        /// Duration in milliseconds
        duration: u16,
    },
    /// Run a motor at a power between -100 and 100
    Motor {
        port: OutputPort,
        #[arg(allow_hyphen_values = true)]
        power: i8,
    },
    /// Reset the brick's sleep timer and print the timeout
    Keepalive,
}

impl Cli {
    fn upload_flags(&self) -> UploadFlags {
        let mut flags = UploadFlags::NONE;
        if self.overwrite {
            flags |= UploadFlags::OVERWRITE;
        }
        if !self.no_sound {
            flags |= UploadFlags::PLAY_SOUND;
        }
        flags
    }
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

    if let Err(err) = run(cli) {
        eprintln!("roboctl: {:#}", err);
        let code = err.downcast_ref::<BrickError>().map_or(1, BrickError::exit_code);
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env().with_debug(cli.debug);
    if let Some(name) = &cli.btname {
        config.bluetooth_name = name.clone();
    }

    let probe = ProbeFlags::NXT | ProbeFlags::USB | ProbeFlags::BLUETOOTH;
    let mut bricks = discover(probe, &config)?;
    info!(count = bricks.len(), "bricks found");

    let flags = cli.upload_flags();
    let looping = cli.looping;
    match cli.command {
        Command::Status => {
            let outcomes = bricks.each(|brick| brick.status())?;
            report_all(outcomes, |status| println!("{}\n", status))?;
        }
        Command::Stop => {
            let outcomes = bricks.each(|brick| brick.stop())?;
            report_all(outcomes, |()| ())?;
        }
        Command::Upload { files } => {
            single(&mut bricks, |brick| {
                for file in &files {
                    let report = brick.upload(file, flags)?;
                    println!(
                        "{}: {} bytes in {:.2}s ({:.0} bytes/s)",
                        file.display(),
                        report.bytes,
                        report.elapsed.as_secs_f64(),
                        report.bytes_per_second()
                    );
                }
                Ok(())
            })?;
        }
        Command::Delete { name } => single(&mut bricks, |brick| brick.delete(&name))?,
        Command::Start { name } => single(&mut bricks, |brick| brick.start(&name))?,
        Command::Playsound { name } => {
            single(&mut bricks, |brick| brick.play_sound(&name, looping))?
        }
        Command::Playtone {
            frequency,
            duration,
        } => single(&mut bricks, |brick| brick.play_tone(frequency, duration))?,
        Command::Motor { port, power } => {
            single(&mut bricks, |brick| brick.motor_on(port, power))?
        }
        Command::Keepalive => {
            let timeout = single(&mut bricks, |brick| brick.keep_alive())?;
            println!("Sleep timeout: {} ms", timeout);
        }
    }

    Ok(())
}

/// Runs `op` on the only connected brick.
fn single<T>(
    bricks: &mut roboctl::BrickList,
    op: impl FnOnce(&mut BrickHandle) -> Result<T, BrickError>,
) -> Result<T, BrickError> {
    bricks.single_mut()?.session(op)
}

/// Prints each success and returns the first failure.
fn report_all<T>(
    outcomes: Vec<Result<T, BrickError>>,
    mut print: impl FnMut(T),
) -> Result<(), BrickError> {
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => print(value),
            Err(e) => {
                eprintln!("roboctl: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_flags_are_accepted_before_the_subcommand() {
        let cli = Cli::try_parse_from([
            "roboctl",
            "--overwrite",
            "--no-sound",
            "upload",
            "pong.rxe",
        ])
        .unwrap();
        assert_eq!(cli.upload_flags(), UploadFlags::OVERWRITE);
        assert!(matches!(cli.command, Command::Upload { ref files } if files.len() == 1));

        let cli = Cli::try_parse_from(["roboctl", "upload", "pong.rxe"]).unwrap();
        assert_eq!(cli.upload_flags(), UploadFlags::PLAY_SOUND);
    }

    #[test]
    fn loop_applies_to_playsound() {
        let cli = Cli::try_parse_from(["roboctl", "--loop", "playsound", "Woops"]).unwrap();
        assert!(cli.looping);
        let cli = Cli::try_parse_from(["roboctl", "playsound", "Woops", "--loop"]).unwrap();
        assert!(cli.looping);
    }
}
