use std::io::Read as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use jtagpi_io::{jtag::TapWalker, rows::RowParser};
use jtagpi_xvc::XvcServer;
use tracing::info;

use crate::gpio::{GpioPins, PinNumbers};
use crate::pin_guard::PinGuard;

mod gpio;
mod pin_guard;

#[derive(clap::Parser)]
struct Args {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Args)]
struct GlobalOpts {
    /// Raise the log level; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TCP port the XVC server listens on.
    #[arg(short, long, default_value_t = 2542)]
    port: u16,

    /// XVC `jtag_delay` spin count between pin updates.
    #[arg(short, long, default_value_t = 40)]
    delay: u32,

    /// BCM GPIO pin for TCK.
    #[arg(short = 'c', long, default_value_t = 11)]
    tck: u8,
    /// BCM GPIO pin for TMS.
    #[arg(short = 'm', long, default_value_t = 25)]
    tms: u8,
    /// BCM GPIO pin for TDI.
    #[arg(short = 'i', long, default_value_t = 10)]
    tdi: u8,
    /// BCM GPIO pin for TDO.
    #[arg(short = 'o', long, default_value_t = 9)]
    tdo: u8,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run the XVC server until SIGINT/SIGTERM.
    Xvc,
    /// Parse a row file (or `-` for stdin) and walk it once, printing
    /// `results`.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    rows_file: PathBuf,
}

fn main() -> Result<()> {
    let Args { global, command } = Args::parse();
    init_logging(global.verbose)?;

    let pins = PinNumbers {
        tck: global.tck,
        tms: global.tms,
        tdi: global.tdi,
        tdo: global.tdo,
    };

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handlers(&running)?;

    let gpio = GpioPins::new(pins).map_err(|err| eyre!("failed to acquire GPIO pins: {err}"))?;
    let guarded = PinGuard::new(gpio);

    match command {
        CliCommand::Xvc => {
            let mut server = XvcServer::new(guarded, global.port, global.delay, running);
            server.serve()?;
        }
        CliCommand::Run(args) => {
            let text = read_rows_source(&args.rows_file)?;
            let legs = RowParser::parse_rows(text.lines())?;
            let mut walker = TapWalker::new(guarded);
            walker.push_legs(legs);
            walker.run_until_idle()?;
            for result in &walker.state.results {
                println!("{result:#x}");
            }
        }
    }

    Ok(())
}

fn read_rows_source(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// `signal_hook::flag::register` only ever *sets* the flag it's given, so we
/// register SIGINT/SIGTERM against a private `stop` flag and translate it
/// into clearing `running` on a cheap polling thread, rather than fighting
/// the crate's one-directional API.
fn install_signal_handlers(running: &Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, stop.clone())?;
    signal_hook::flag::register(SIGTERM, stop.clone())?;

    let running = running.clone();
    std::thread::spawn(move || loop {
        if stop.load(Ordering::Relaxed) {
            info!("shutdown signal received");
            running.store(false, Ordering::Relaxed);
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    });
    Ok(())
}

fn init_logging(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .with(tracing_error::ErrorLayer::default())
        .init();
    color_eyre::install()?;
    Ok(())
}
