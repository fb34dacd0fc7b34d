use std::fs;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Result, WrapErr};
use log::{debug, error, info, warn};

use jtag_axi::backend::mpsse::{self, LocalConfig, MpsseBackend};
use jtag_axi::backend::openocd::{OpenOcdBackend, RemoteConfig, OPENOCD_TCL_TERMINATOR};
use jtag_axi::backend::TapBackend;
use jtag_axi::bridge::{Bridge, BridgeConfig};
use jtag_axi::delay::StdDelay;
use jtag_axi::error::BridgeError;
use jtag_axi::svf::{self, player::Player, player::DEFAULT_CLOCK_HZ};

type CliBridge = Bridge<Box<dyn TapBackend>, StdDelay>;

/// LED register of the reference design.
const LED_REGISTER: u32 = 0x43c0_0000;

const LED_PATTERNS: [(&str, u32); 8] = [
    ("OFF", 0x0),
    ("ALL_ON", 0xf),
    ("ALT1", 0xa),
    ("ALT2", 0x5),
    ("LED0", 0x1),
    ("LED1", 0x2),
    ("LED2", 0x4),
    ("LED3", 0x8),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// FTDI MPSSE adapter on this machine
    Local,
    /// OpenOCD TCL server
    Remote,
}

#[derive(Parser)]
#[command(version, about, arg_required_else_help(true))]
struct CliArguments {
    #[arg(global = true, long, value_enum, default_value_t = BackendKind::Remote)]
    /// How to reach the JTAG chain
    backend: BackendKind,

    #[arg(global = true, long, default_value = "localhost")]
    /// OpenOCD host
    host: String,
    #[arg(global = true, long, default_value_t = 6666)]
    /// OpenOCD TCL port
    port: u16,
    #[arg(global = true, long, default_value = "chip")]
    /// Chip name the tap is declared under
    chip: String,
    #[arg(global = true, long, default_value = "tap")]
    /// Tap name
    tap: String,
    #[arg(global = true, long, default_value_t = 6)]
    /// Instruction register length of the FPGA
    ir_length: u8,
    #[arg(global = true, long, default_value = "5", value_parser = parse_seconds)]
    /// Seconds to wait for the server to connect or answer
    timeout: Duration,
    #[arg(global = true, long)]
    /// End commands with 0x1a as OpenOCD's own TCL port expects, instead of a newline
    openocd_tcl: bool,

    #[arg(global = true, long, default_value = "Digilent USB Device A")]
    /// USB description of the local adapter
    description: String,
    #[arg(global = true, long, default_value = "10000000", value_parser = parse_number)]
    /// TCK frequency of the local adapter in hertz
    adapter_clock: u32,

    #[arg(global = true, long, default_value_t = 0)]
    /// Reconnect and retry a failed bridge operation this many times
    retries: u32,

    #[arg(global = true, short, long, action = ArgAction::Count)]
    /// More output; repeat for more
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a word to an AXI address
    Write {
        #[arg(value_parser = parse_number)]
        address: u32,
        #[arg(value_parser = parse_number)]
        data: u32,
    },
    /// Read a word from an AXI address
    Read {
        #[arg(value_parser = parse_number)]
        address: u32,
    },
    /// Walk the LED patterns, writing and reading back each one
    Test {
        #[arg(long, default_value = "0x43c00000", value_parser = parse_number)]
        address: u32,
        #[arg(long, default_value = "0xf", value_parser = parse_number)]
        /// Bits compared on read back
        mask: u32,
        #[arg(long, default_value_t = 200)]
        /// Pause after each pattern so the LEDs can be seen
        pause_ms: u64,
    },
    /// Replay an SVF file through the backend
    Svf {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CLOCK_HZ)]
        /// TCK rate used to turn RUNTEST cycles into time
        clock_hz: NonZeroU32,
        #[arg(long)]
        /// Parse and list the statements without touching the hardware
        dry_run: bool,
    },
    /// List the FTDI adapters the driver can see
    List,
}

/// `0x` hex, `0b` binary or decimal.
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.replace('_', "");
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u32::from_str_radix(bin, 2)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("{:?} is not a 32-bit number: {}", s, e))
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s.parse().map_err(|e| format!("{:?} is not a number of seconds: {}", s, e))?;
    if !(seconds > 0.0 && seconds.is_finite()) {
        return Err(format!("timeout must be positive, got {}", s));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn open_backend(args: &CliArguments) -> Box<dyn TapBackend> {
    match args.backend {
        BackendKind::Local => Box::new(MpsseBackend::new(LocalConfig {
            description: args.description.clone(),
            clock_hz: args.adapter_clock,
            ..Default::default()
        })),
        BackendKind::Remote => Box::new(OpenOcdBackend::new(RemoteConfig {
            host: args.host.clone(),
            port: args.port,
            chip: args.chip.clone(),
            tap: args.tap.clone(),
            ir_length: args.ir_length,
            timeout: args.timeout,
            terminator: if args.openocd_tcl { OPENOCD_TCL_TERMINATOR } else { b'\n' },
            ..Default::default()
        })),
    }
}

fn open_bridge(args: &CliArguments) -> Result<CliBridge> {
    let config = BridgeConfig {
        ir_length: args.ir_length.into(),
        ..Default::default()
    };
    Ok(Bridge::with_config(open_backend(args), StdDelay, config)?)
}

/// Run `op`, connecting first if needed.  Connection and shift failures are retried up to
/// `retries` times, each retry on a fresh connection.
fn with_retries<T>(
    retries: u32,
    bridge: &mut CliBridge,
    mut op: impl FnMut(&mut CliBridge) -> Result<T, BridgeError>,
) -> Result<T, BridgeError> {
    let mut attempt = 0;
    loop {
        let result = if bridge.backend().is_connected() {
            op(bridge)
        } else {
            bridge.connect().and_then(|()| op(bridge))
        };
        match result {
            Err(err @ (BridgeError::Connect(_) | BridgeError::Shift(_))) if attempt < retries => {
                attempt += 1;
                warn!("{}, retrying ({}/{})", err, attempt, retries);
                bridge.disconnect();
            }
            result => return result,
        }
    }
}

fn led_test(args: &CliArguments, address: u32, mask: u32, pause: Duration) -> Result<()> {
    let mut bridge = open_bridge(args)?;
    let mut failed = 0;
    for (name, pattern) in LED_PATTERNS {
        info!("pattern {}: {:#06b}", name, pattern);
        match with_retries(args.retries, &mut bridge, |b| b.verify_roundtrip(address, pattern, mask)) {
            Ok(true) => println!("{:<6} {:#06b} ok", name, pattern),
            Ok(false) => {
                println!("{:<6} {:#06b} MISMATCH", name, pattern);
                failed += 1;
            }
            Err(err) => {
                error!("pattern {}: {}", name, err);
                println!("{:<6} {:#06b} FAILED", name, pattern);
                failed += 1;
            }
        }
        thread::sleep(pause);
    }
    bridge.disconnect();
    if failed > 0 {
        bail!("{} of {} patterns failed", failed, LED_PATTERNS.len());
    }
    println!("all {} patterns passed", LED_PATTERNS.len());
    Ok(())
}

fn play_svf(args: &CliArguments, file: &PathBuf, clock_hz: NonZeroU32, dry_run: bool) -> Result<()> {
    let text = fs::read_to_string(file).wrap_err_with(|| format!("reading {}", file.display()))?;

    if dry_run {
        let (script, errors) = svf::parse_lenient(&text);
        for statement in script.statements() {
            println!("{:>5}: {:?}", statement.line, statement.instruction);
        }
        for err in &errors {
            error!("{}", err);
        }
        if !errors.is_empty() {
            bail!("{} bad lines in {}", errors.len(), file.display());
        }
        println!("{} statements", script.len());
        return Ok(());
    }

    let mut backend = open_backend(args);
    backend.connect()?;
    let result = Player::with_clock(StdDelay, clock_hz).play_source(&text, &mut backend);
    backend.disconnect();
    let count = result.wrap_err_with(|| format!("replaying {}", file.display()))?;
    println!("replayed {} statements", count);
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli_args = CliArguments::parse();

    let level = match cli_args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
    debug!("backend {:?}", cli_args.backend);

    match &cli_args.command {
        Command::Write { address, data } => {
            let mut bridge = open_bridge(&cli_args)?;
            with_retries(cli_args.retries, &mut bridge, |b| b.write(*address, *data))?;
            bridge.disconnect();
            println!("{:#010x} <- {:#010x}", address, data);
        }
        Command::Read { address } => {
            let mut bridge = open_bridge(&cli_args)?;
            let data = with_retries(cli_args.retries, &mut bridge, |b| b.read(*address))?;
            bridge.disconnect();
            println!("{:#010x}", data);
        }
        Command::Test { address, mask, pause_ms } => {
            if *address != LED_REGISTER {
                info!("testing {:#010x} instead of the LED register", address);
            }
            led_test(&cli_args, *address, *mask, Duration::from_millis(*pause_ms))?;
        }
        Command::Svf { file, clock_hz, dry_run } => play_svf(&cli_args, file, *clock_hz, *dry_run)?,
        Command::List => {
            let adapters = mpsse::list_adapters()?;
            if adapters.is_empty() {
                println!("no adapters found");
            }
            for adapter in adapters {
                println!("{:<32} {}", adapter.description, adapter.serial_number);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn numbers() {
        assert_eq!(parse_number("0x43C00000"), Ok(0x43c0_0000));
        assert_eq!(parse_number("0b1010"), Ok(10));
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0xffff_ffff"), Ok(u32::MAX));
        assert!(parse_number("0x1_0000_0000").is_err());
        assert!(parse_number("twelve").is_err());
        assert!(parse_seconds("0").is_err());
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
    }

    #[test]
    fn arguments() {
        CliArguments::command().debug_assert();
        let args = CliArguments::try_parse_from(["jtag-axi", "write", "0x43c00000", "0b0101", "--retries", "2"]).unwrap();
        assert_eq!(args.backend, BackendKind::Remote);
        assert_eq!(args.retries, 2);
        assert!(matches!(args.command, Command::Write { address: 0x43c0_0000, data: 5 }));
    }
}
