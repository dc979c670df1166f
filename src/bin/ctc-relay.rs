use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use structopt::StructOpt;

use prettytable::{format::FormatBuilder, row, Table};

use log::{debug, LevelFilter, Log};

use tokio_serial::Serial;

use ctc_relay::*;

#[derive(StructOpt, Debug)]
#[structopt(name = "ctc-relay", about = "Conrad Technology Centrum relay card")]
struct App {
    /// Enable debug output, including the raw bytes of every frame
    #[structopt(short, long)]
    debug: bool,

    /// Serial device of the relay card, e.g. /dev/ttyUSB0
    #[structopt(short, long, env = "TTY", parse(from_os_str))]
    tty: PathBuf,

    /// Device address. Defaults to 0, which broadcasts to every card.
    #[structopt(short, long, default_value = "0")]
    address: u8,

    /// Read timeout in seconds (float allowed)
    #[structopt(short = "T", long, parse(try_from_str = parse_timeout))]
    timeout: Option<Duration>,

    #[structopt(subcommand)]
    command: AppCommand,
}

#[derive(StructOpt, Debug)]
enum AppCommand {
    /// Initialize relay card chain
    #[structopt(alias = "i")]
    Init,
    /// Set single relay
    #[structopt(alias = "s")]
    Set(RelayFlags),
    /// Clear single relay
    #[structopt(alias = "c")]
    Clear(RelayFlags),
    /// Toggle single relay
    #[structopt(alias = "t")]
    Toggle(RelayFlags),
    /// Get or set all relays of the port
    #[structopt(alias = "p")]
    Port {
        /// Relay positions to set (ORed together), 0-255
        #[structopt(short, long)]
        set: Option<Relays>,
    },
}

#[derive(StructOpt, Debug)]
struct RelayFlags {
    /// Relay number, 1-8
    relay: Relay,
}

fn parse_timeout(s: &str) -> Result<Duration, Error> {
    let secs = s.parse::<f64>().map_err(|_| Error::InvalidTimeout)?;
    timeout_from_secs(secs)
}

fn create_table() -> Table {
    let mut table = Table::new();
    let format = FormatBuilder::new()
        .column_separator(' ')
        .padding(0, 0)
        .build();

    table.set_format(format);
    table
}

async fn init_chain(card: &mut RelayCard<Serial>) -> Result<()> {
    card.discover_with(|controller| {
        println!(
            "Controller {}: Firmware version {}",
            controller.address, controller.firmware_version
        )
    })
    .await?;

    Ok(())
}

async fn port(card: &mut RelayCard<Serial>, address: u8, set: Option<Relays>) -> Result<()> {
    if let Some(port) = set {
        return Ok(card.set_port(address, port).await?);
    }

    port_table(card.get_port(address).await?).printstd();

    Ok(())
}

fn port_table(port: Relays) -> Table {
    let mut table = create_table();
    table.add_row(row!["Port   :", format!("0x{:02X}", port.bits())]);
    for relay in Relay::all() {
        let state = if port.contains_relay(relay) { "On" } else { "Off" };
        table.add_row(row![format!("Relay {}:", relay), state]);
    }
    table
}

// Frame echo and the rest of our own tracing, without tokio/mio chatter
fn debug_logger() -> impl Log {
    pretty_env_logger::formatted_builder()
        .filter_module("ctc_relay", LevelFilter::Debug)
        .build()
}

fn init_logging(debug: bool) -> Result<()> {
    if debug {
        log::set_boxed_logger(Box::new(debug_logger()))?;
        log::set_max_level(LevelFilter::Debug);
    } else {
        pretty_env_logger::init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::from_args();

    init_logging(app.debug)?;

    debug!("{:#?}", app);

    let mut card = RelayCard::from_path(&app.tty)
        .with_context(|| format!("Failed to open relay card at {}", app.tty.display()))?;
    card.set_timeout(app.timeout);

    match app.command {
        AppCommand::Init => init_chain(&mut card).await?,
        AppCommand::Set(flags) => card.set_relay(app.address, flags.relay).await?,
        AppCommand::Clear(flags) => card.clear_relay(app.address, flags.relay).await?,
        AppCommand::Toggle(flags) => card.toggle_relay(app.address, flags.relay).await?,
        AppCommand::Port { set } => port(&mut card, app.address, set).await?,
    }

    Ok(())
}
