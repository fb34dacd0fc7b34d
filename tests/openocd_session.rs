#![cfg(feature = "std")]

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::eyre::Result;
use jtag_axi::backend::openocd::{OpenOcdBackend, RemoteConfig};
use jtag_axi::backend::TapBackend;
use jtag_axi::bridge::{Bridge, BridgeConfig};
use jtag_axi::codec::{self, Frame, Opcode};
use jtag_axi::delay::StdDelay;
use jtag_axi::error::{BridgeError, ConnectError, PlayError, ShiftError};
use jtag_axi::svf::player::Player;

const LED: u32 = 0x43c0_0000;

/// The FPGA end: a 4-bit LED register behind USER1, answering each drscan with the frame
/// latched by the previous one.
#[derive(Default)]
struct LedTarget {
    led: u32,
    out_frame: u128,
}

impl LedTarget {
    fn drscan(&mut self, command: &str) -> String {
        let operand = command.split_whitespace().nth(3).unwrap_or("0x0");
        let value = u128::from_str_radix(operand.trim_start_matches("0x"), 16).unwrap_or(0);
        let reply = format!("{:024x}", self.out_frame);
        let frame = Frame::from_bits(value);
        self.out_frame = match Opcode::try_from(frame.command()) {
            Ok(Opcode::Write) => {
                self.led = frame.data() & 0xf;
                0
            }
            Ok(Opcode::Read) => codec::pack(Opcode::Read, frame.address().into(), self.led.into())
                .map(|f| f.bits())
                .unwrap_or(0),
            _ => 0,
        };
        reply
    }
}

type CommandLog = Arc<Mutex<Vec<String>>>;

/// Newline-terminated TCL server on an ephemeral port.  With `drop_first_drscan` the first
/// drscan closes the connection instead of being answered.
fn fake_openocd(drop_first_drscan: bool) -> Result<(SocketAddr, CommandLog)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let log = CommandLog::default();
    let server_log = Arc::clone(&log);
    thread::spawn(move || {
        let mut target = LedTarget::default();
        let mut drop_next = drop_first_drscan;
        for stream in listener.incoming() {
            let Ok(mut writer) = stream else { break };
            let Ok(read_half) = writer.try_clone() else { break };
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let command = line.trim().to_string();
                server_log.lock().unwrap().push(command.clone());
                let reply = if command.starts_with("drscan") {
                    if drop_next {
                        drop_next = false;
                        break;
                    }
                    target.drscan(&command)
                } else {
                    String::new()
                };
                if writer.write_all(format!("{}\n", reply).as_bytes()).is_err() {
                    break;
                }
            }
        }
    });
    Ok((addr, log))
}

fn remote(addr: SocketAddr, timeout: Duration) -> OpenOcdBackend {
    OpenOcdBackend::new(RemoteConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        timeout,
        ..Default::default()
    })
}

fn quick() -> BridgeConfig {
    BridgeConfig { settle_us: 0, ..Default::default() }
}

#[test]
fn bridge_over_tcl_session() -> Result<()> {
    let (addr, log) = fake_openocd(false)?;
    let mut backend = remote(addr, Duration::from_secs(2));
    let mut bridge = Bridge::with_config(&mut backend, StdDelay, quick())?;
    bridge.connect()?;

    bridge.write(LED, 0x5)?;
    assert_eq!(
        *log.lock().unwrap(),
        [
            "jtag newtap chip tap -irlen 6",
            "init",
            "pathmove RESET IDLE",
            "irscan chip.tap 0x02",
            "drscan chip.tap 96 0x0000000543c0000000000001",
        ]
    );

    assert_eq!(bridge.read(LED)?, 0x5);
    assert!(bridge.verify_roundtrip(LED, 0xa, 0xf)?);
    assert!(!bridge.verify_roundtrip(LED, 0x1a, 0xff)?);

    bridge.disconnect();
    assert!(!backend.is_connected());
    Ok(())
}

#[test]
fn refused_connection() -> Result<()> {
    let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
    let mut backend = remote(addr, Duration::from_secs(1));
    let started = Instant::now();
    assert!(matches!(backend.connect(), Err(ConnectError::Transport(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!backend.is_connected());
    Ok(())
}

#[test]
fn silent_server_times_out() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        let held = listener.accept();
        thread::sleep(Duration::from_secs(3));
        drop(held);
    });

    let mut backend = remote(addr, Duration::from_millis(200));
    let started = Instant::now();
    match backend.connect() {
        Err(ConnectError::Transport(err)) => {
            assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!backend.is_connected());
    Ok(())
}

#[test]
fn reconnect_after_dropped_session() -> Result<()> {
    let (addr, _log) = fake_openocd(true)?;
    let mut backend = remote(addr, Duration::from_secs(2));
    let mut bridge = Bridge::with_config(&mut backend, StdDelay, quick())?;
    bridge.connect()?;

    assert!(matches!(
        bridge.write(LED, 0x5),
        Err(BridgeError::Shift(ShiftError::Transport(_)))
    ));
    assert!(!bridge.backend().is_connected());
    assert!(matches!(bridge.read(LED), Err(BridgeError::Shift(ShiftError::NotConnected))));

    bridge.connect()?;
    bridge.write(LED, 0xc)?;
    assert_eq!(bridge.read(LED)?, 0xc);
    Ok(())
}

#[test]
fn svf_replay_over_tcl_session() -> Result<()> {
    let (addr, log) = fake_openocd(false)?;
    let mut backend = remote(addr, Duration::from_secs(2));
    backend.connect()?;

    let script = "// light every LED\nSTATE RESET;\nSIR 6 TDI (02);\nSDR 96 TDI (0000000f43C0000000000001);\nRUNTEST 10 TCK;\n";
    let count = Player::new(StdDelay).play_source(script, &mut backend)?;
    assert_eq!(count, 4);
    assert_eq!(
        log.lock().unwrap()[2..],
        [
            "pathmove RESET IDLE",
            "irscan chip.tap 0x02",
            "drscan chip.tap 96 0x0000000f43c0000000000001",
        ]
    );

    let mut bridge = Bridge::with_config(&mut backend, StdDelay, quick())?;
    assert_eq!(bridge.read(LED)?, 0xf);
    Ok(())
}

#[test]
fn replay_stops_at_bad_line_and_keeps_session() -> Result<()> {
    let (addr, log) = fake_openocd(false)?;
    let mut backend = remote(addr, Duration::from_secs(2));
    backend.connect()?;

    let script = "SIR 6 TDI (02);\nSDR 200 TDI (00);\nSDR 96 TDI (0000000f43C0000000000001);\n";
    let err = Player::new(StdDelay)
        .play_source(script, &mut backend)
        .expect_err("line 2 is too long to shift");
    assert_eq!(err.line(), 2);
    assert!(matches!(err, PlayError::Parse(_)));
    assert!(backend.is_connected());
    assert_eq!(log.lock().unwrap()[2..], ["irscan chip.tap 0x02"]);

    // the same session still carries bridge traffic
    let mut bridge = Bridge::with_config(&mut backend, StdDelay, quick())?;
    bridge.write(LED, 0x9)?;
    assert_eq!(bridge.read(LED)?, 0x9);
    Ok(())
}
