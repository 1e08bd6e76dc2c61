#[macro_use]
extern crate log;

use std::path::PathBuf;

use anyhow::Context;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use stm32_uart_bootloader::linux::{load_image, BootInput, ExitJumper};
use stm32_uart_bootloader::memory::ImageMemory;
use stm32_uart_bootloader::{parse_hex, Bootloader, Layout, Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Run the bootloader on the serial port, simulating the device
    Serve(Serve),

    /// Read the bootloader version
    GetVersion,

    /// List the commands supported by the bootloader
    GetHelp,

    /// Read the chip identifier
    GetCid,

    /// Read the flash read protection level
    GetRdp,
}

#[derive(Clone, Debug, StructOpt)]
pub struct Serve {
    /// Application image, mapped at the application base address
    #[structopt(long)]
    image: PathBuf,

    /// Device id reported through the chip id register
    #[structopt(long, default_value = "0x451", parse(try_from_str = parse_hex))]
    dev_id: u32,

    /// Read protection level stored in the option bytes
    #[structopt(long, default_value = "0xAA", parse(try_from_str = parse_hex))]
    rdp_level: u32,

    /// Enter command mode regardless of the boot input
    #[structopt(long)]
    command_mode: bool,

    /// Sysfs GPIO number sampled as the boot input, ignored with --command-mode
    #[structopt(long)]
    boot_gpio: Option<u64>,

    #[structopt(flatten)]
    layout: Layout,
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    match &o.operation {
        Operation::Serve(s) => serve(&o, s),
        op => query(&o, op),
    }
}

fn serve(o: &Args, s: &Serve) -> anyhow::Result<()> {
    let layout = s.layout.clone();

    let memory = ImageMemory::new()
        .with_word(layout.idcode, s.dev_id & 0x0FFF)
        .with_word(layout.option_bytes, (s.rdp_level & 0xFF) << 8);
    let memory = load_image(memory, &s.image, layout.app_base)
        .with_context(|| format!("loading image {}", s.image.display()))?;

    let size = std::fs::metadata(&s.image)?.len();
    info!(
        "Mapped {} image at 0x{:08x}",
        bytefmt::format(size),
        layout.app_base
    );

    let input = match (s.command_mode, s.boot_gpio) {
        (true, _) => BootInput::Fixed(true),
        (false, Some(n)) => BootInput::gpio(n).context("configuring boot gpio")?,
        (false, None) => BootInput::Fixed(false),
    };

    info!("Opening serial port {}", o.port);

    let bl = Bootloader::linux(&o.port, o.baud, memory, layout, o.options.clone())
        .context("opening serial port")?;

    // Only returns if the hand-off was refused
    let e = bl.start(&input, &ExitJumper);
    Err(e).context("application hand-off failed")
}

fn query(o: &Args, op: &Operation) -> anyhow::Result<()> {
    info!("Connecting to serial port");

    let mut p = Programmer::linux(&o.port, o.baud, o.options.clone())
        .context("connecting to serial port")?;

    match op {
        Operation::GetVersion => {
            let v = p.get_version()?;
            info!("Bootloader version: 0x{:02x}", v);
        }
        Operation::GetHelp => {
            let codes = p.get_help()?;
            info!("Supported commands: {}", hex::encode(&codes));
        }
        Operation::GetCid => {
            let id = p.get_chip_id()?;
            info!("Chip ID: 0x{:03x}", id);
        }
        Operation::GetRdp => {
            let level = p.get_rdp_level()?;
            info!("RDP level: 0x{:02x}", level);
        }
        Operation::Serve(_) => unreachable!(),
    }

    Ok(())
}
