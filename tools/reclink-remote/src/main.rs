// SPDX-License-Identifier: Apache-2.0 OR MIT

//! reclink-remote - field-side heartbeat daemon
//!
//! Sends command heartbeats to the monitoring host and mirrors the host's
//! status frames as a tri-state link indicator. The desired mode is toggled
//! interactively on stdin, standing in for the record button on the real
//! panel; the state prints stand in for its LEDs.

use clap::Parser;
use colored::*;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reclink::config::{self, READ_SIZE};
use reclink::engine::{NullObserver, SharedCommand};
use reclink::transport::FrameSink;
use reclink::{
    EngineConfig, HeartbeatEngine, Mode, PeerState, Role, StateObserver, TcpClient, TcpServer,
    UdpClient, UdpServer,
};

/// Field-side heartbeat daemon
#[derive(Parser, Debug)]
#[command(name = "reclink-remote")]
#[command(version = "0.1.0")]
#[command(about = "Command recording on the monitoring host over a heartbeat link")]
struct Args {
    /// Address of the monitoring host
    #[arg(short, long, default_value = "127.0.0.1")]
    ip: String,

    /// Local port to receive status frames on
    #[arg(long, default_value_t = config::PORT_REMOTE)]
    listen_port: u16,

    /// Host port to send command frames to
    #[arg(long, default_value_t = config::PORT_HOST)]
    host_port: u16,

    /// Heartbeat period in milliseconds
    #[arg(long, default_value = "100")]
    period_ms: u64,

    /// Use stream (TCP) transport instead of datagrams
    #[arg(long)]
    tcp: bool,

    /// Start in recording mode instead of standby
    #[arg(long)]
    record: bool,

    /// Quiet mode - suppress the state indicator lines
    #[arg(short, long)]
    quiet: bool,
}

/// Prints peer-state transitions the way the panel LEDs would show them.
struct PanelIndicator;

impl StateObserver for PanelIndicator {
    fn on_state_changed(&self, new_state: PeerState) {
        let label = match new_state {
            PeerState::Disconnected => "DISCONNECTED".red().bold(),
            PeerState::Standby => "STANDBY".yellow().bold(),
            PeerState::Recording => "RECORDING".green().bold(),
        };
        eprintln!("{} host is {}", ">>>".blue().bold(), label);
    }

    fn on_connection_lost(&self) {
        eprintln!("{} link to host lost", "!!!".red().bold());
    }
}

fn main() {
    // RUST_LOG drives the library's debug output.
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Receive side, either transport.
enum Receiver {
    Udp(UdpServer),
    Tcp(TcpServer),
}

impl Receiver {
    fn disconnect(&mut self) {
        match self {
            Receiver::Udp(server) => server.disconnect(),
            Receiver::Tcp(server) => server.disconnect(),
        }
    }
}

/// Connect a stream client, retrying until the peer's listener is up.
///
/// The core transports treat connect failure as fatal; retry policy lives
/// here, where the operator can see it and Ctrl+C can end it.
fn connect_with_retry(
    ip: &str,
    port: u16,
    running: &AtomicBool,
) -> Result<TcpClient, Box<dyn std::error::Error>> {
    loop {
        match TcpClient::connect(ip, port) {
            Ok(client) => return Ok(client),
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    return Err(err.into());
                }
                log::info!("waiting for peer at {}:{}: {}", ip, port, err);
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Own listener first, then the client: in stream mode each side must
    // have its server up before the other's connect can succeed.
    let (tx, mut rx): (Arc<dyn FrameSink>, Receiver) = if args.tcp {
        let server = TcpServer::bind("", args.listen_port)?;
        let client = connect_with_retry(&args.ip, args.host_port, &running)?;
        client.set_timeouts(config::READ_TIMEOUT, Duration::ZERO);
        (Arc::new(client), Receiver::Tcp(server))
    } else {
        let server = UdpServer::bind("", args.listen_port)?;
        let client = UdpClient::connect(&args.ip, args.host_port)?;
        (Arc::new(client), Receiver::Udp(server))
    };

    let initial = if args.record { Mode::Recording } else { Mode::Standby };
    let command = Arc::new(SharedCommand::new(initial));

    let observer: Arc<dyn StateObserver> = if args.quiet {
        Arc::new(NullObserver)
    } else {
        Arc::new(PanelIndicator)
    };

    let mut engine = HeartbeatEngine::start(
        EngineConfig {
            role: Role::Commander,
            heartbeat_period: Duration::from_millis(args.period_ms),
            ..EngineConfig::default()
        },
        tx,
        command.clone(),
        observer,
    );
    let started = match &mut rx {
        Receiver::Udp(server) => {
            server.run_in_thread(engine.receiver(), READ_SIZE, config::READ_TIMEOUT)
        }
        Receiver::Tcp(server) => {
            server.run_in_thread(engine.stream_receiver(), config::ACCEPT_TIMEOUT)
        }
    };
    if !started {
        return Err("receive loop failed to start".into());
    }

    if !args.quiet {
        eprintln!("{} reclink remote", ">>>".green().bold());
        eprintln!(
            "    host={}:{} ({}), listening on :{}, period={}ms",
            args.ip,
            args.host_port,
            if args.tcp { "tcp" } else { "udp" },
            args.listen_port,
            args.period_ms
        );
        eprintln!("{}", "    r = record, s = standby, q = quit".dimmed());
    }

    // Stdin stands in for the record button. Ctrl+C works too; the handler
    // flips `running` and the next line (or EOF) gets us out.
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match line?.trim() {
            "r" | "record" => {
                command.set(Mode::Recording);
                log::info!("[remote] commanding recording");
            }
            "s" | "standby" => {
                command.set(Mode::Standby);
                log::info!("[remote] commanding standby");
            }
            "q" | "quit" => break,
            "" => {}
            other => eprintln!("unknown command: {:?} (r/s/q)", other),
        }
    }

    engine.stop();
    rx.disconnect();
    Ok(())
}
