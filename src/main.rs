use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use wchisp::error::UserError;
use wchisp::flashing::NoProgress;
use wchisp::transport::{Baudrate, SerialTransport, UsbTransport};
use wchisp::{ChipDB, FlashOptions, Flashing, ProgressCallbacks, Session, Transport};

#[derive(Parser)]
#[command(
    name = "wchisp",
    about = "Flash WCH MCUs through the USB ISP bootloader",
    version
)]
struct Cli {
    /// Select the device whose UID matches, e.g. cd-ab-01-02-03-04-05-06
    #[arg(short = 'd', long = "device", global = true)]
    uid: Option<String>,
    /// No verify after writing to flash, done by default
    #[arg(short = 'n', long, global = true)]
    no_verify: bool,
    /// Print a progress-bar during command operation
    #[arg(short, long, global = true)]
    progress: bool,
    /// Reset after command completed
    #[arg(short, long, global = true)]
    reset: bool,
    /// Debug logging, including every frame on the wire.
    /// Verify runs by default, so there is no verify switch; see `-n`.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Use a UART bootloader on this serial port instead of USB
    #[arg(long, global = true)]
    port: Option<String>,
    /// Line speed to switch to after connecting over UART
    #[arg(long, value_enum, default_value_t = Baudrate::default(), global = true)]
    baudrate: Baudrate,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices
    List,
    #[command(flatten)]
    Device(DeviceCommand),
}

/// Verbs run against the one selected device.
#[derive(Subcommand)]
enum DeviceCommand {
    /// Get info about the selected chip
    Info,
    /// Download to code flash
    #[command(alias = "write")]
    Flash {
        /// The firmware image, raw binary or Intel HEX
        path: PathBuf,
    },
    /// Verify code flash content
    Verify { path: PathBuf },
    /// Reset the target
    Reset,
    /// Show the RDPR/USER/DATA/WPR config registers
    Config,
    /// Remove code flash read protection and reset
    Unprotect,
    /// Hex dump the data flash (EEPROM)
    EepromDump,
    /// Erase and program the data flash (EEPROM)
    EepromWrite { path: PathBuf },
}

/// Terminal progress bar, one per erase/program/verify pass.
#[derive(Default)]
struct CliProgress {
    bar: Option<ProgressBar>,
}

impl ProgressCallbacks for CliProgress {
    fn init(&mut self, action: &str, total: usize) {
        let style = ProgressStyle::with_template("{msg:>7} [{bar:50}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let bar = ProgressBar::new(total as u64).with_style(style);
        bar.set_message(action.to_string());
        self.bar = Some(bar);
    }

    fn update(&mut self, current: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(current as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let db = ChipDB::load()?;

    match &cli.port {
        Some(port) => {
            let mut session = Session::open(SerialTransport::open(port)?, &db)?;
            if cli.baudrate != Baudrate::default() {
                session.set_baudrate(cli.baudrate)?;
            }
            run(&cli, vec![session])
        }
        None => {
            let sessions = UsbTransport::open_all()?
                .into_iter()
                .map(|transport| Session::open(transport, &db))
                .collect::<wchisp::Result<Vec<_>>>()?;
            run(&cli, sessions)
        }
    }
}

fn run<T: Transport>(cli: &Cli, mut sessions: Vec<Session<T>>) -> Result<()> {
    if sessions.is_empty() {
        return Err(UserError::NoDevice.into());
    }

    let command = match &cli.command {
        Commands::List => {
            for (i, session) in sessions.iter().enumerate() {
                println!("{}: {}", i, session);
            }
            return Ok(());
        }
        Commands::Device(command) => command,
    };

    let session = wchisp::session::select(&mut sessions, cli.uid.as_deref())?;
    session.key_exchange()?;
    println!("{}", session);

    let mut cli_progress = CliProgress::default();
    let mut no_progress = NoProgress;
    let progress: &mut dyn ProgressCallbacks = if cli.progress {
        &mut cli_progress
    } else {
        &mut no_progress
    };
    let options = FlashOptions {
        verify: !cli.no_verify,
    };

    match command {
        DeviceCommand::Info => {
            session.dump_info();
            log::info!("Code Flash Protected: {}", session.code_flash_protected()?);
        }
        DeviceCommand::Flash { path } => {
            let image = wchisp::image::read_firmware_from_file(path)?;
            log::info!("Firmware size: {}", image.len());
            Flashing::new(session, options).flash(&image, progress)?;
        }
        DeviceCommand::Verify { path } => {
            let image = wchisp::image::read_firmware_from_file(path)?;
            log::info!("Firmware size: {}", image.len());
            Flashing::new(session, options).verify(&image, progress)?;
        }
        DeviceCommand::Reset => {
            session.end(1)?;
            return Ok(());
        }
        DeviceCommand::Config => {
            let config = session.config_registers()?;
            for word in config.chunks(4) {
                let line: Vec<String> = word.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{}", line.join(" "));
            }
        }
        DeviceCommand::Unprotect => {
            session.unprotect()?;
            return Ok(());
        }
        DeviceCommand::EepromDump => {
            let size = session.chip().eeprom_size as usize;
            let data = Flashing::new(session, options).read_data(0, size)?;
            let mut out = Vec::new();
            hxdmp::hexdump(&data, &mut out)?;
            std::io::stdout().write_all(&out)?;
            println!();
        }
        DeviceCommand::EepromWrite { path } => {
            let data = wchisp::image::read_firmware_from_file(path)?;
            Flashing::new(session, options).write_data(&data, progress)?;
        }
    }

    if cli.reset {
        session.end(1)?;
    }
    Ok(())
}
