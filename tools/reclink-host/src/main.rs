// SPDX-License-Identifier: Apache-2.0 OR MIT

//! reclink-host - host-side heartbeat daemon
//!
//! Listens for command heartbeats from the field device, drives the recorder
//! through configurable shell commands, and advertises the recorder's actual
//! mode back in status frames. When the link goes quiet past the liveness
//! window the recorder is reset so a reconnect starts from a known state.

use clap::Parser;
use colored::*;
use std::io;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reclink::config::{self, READ_SIZE};
use reclink::engine::SharedCommand;
use reclink::transport::FrameSink;
use reclink::{
    EngineConfig, HeartbeatEngine, Mode, PeerState, ProcessSupervisor, Role, StateObserver,
    TcpClient, TcpServer, UdpClient, UdpServer,
};

/// Host-side heartbeat daemon
#[derive(Parser, Debug)]
#[command(name = "reclink-host")]
#[command(version = "0.1.0")]
#[command(about = "Drive the recorder from remote heartbeat commands")]
struct Args {
    /// Address of the field device
    #[arg(short, long, default_value = "127.0.0.1")]
    ip: String,

    /// Local port to receive command frames on
    #[arg(long, default_value_t = config::PORT_HOST)]
    listen_port: u16,

    /// Remote port to send status frames to
    #[arg(long, default_value_t = config::PORT_REMOTE)]
    remote_port: u16,

    /// Heartbeat period in milliseconds
    #[arg(long, default_value = "100")]
    period_ms: u64,

    /// Use stream (TCP) transport instead of datagrams
    #[arg(long)]
    tcp: bool,

    /// Shell command that starts the recorder
    #[arg(long)]
    start_cmd: Option<String>,

    /// Shell command that stops the recorder
    #[arg(long)]
    stop_cmd: Option<String>,

    /// Shell command that resets the recorder after a lost link
    /// (defaults to the stop command)
    #[arg(long)]
    restart_cmd: Option<String>,

    /// Quiet mode - suppress the state indicator lines
    #[arg(short, long)]
    quiet: bool,
}

/// Recorder control through shell commands.
///
/// Commands run synchronously via `sh -c`; a missing command is a logged
/// no-op so the daemon can run as a pure link monitor.
struct ShellSupervisor {
    start_cmd: Option<String>,
    stop_cmd: Option<String>,
    restart_cmd: Option<String>,
}

impl ShellSupervisor {
    fn run_cmd(cmd: &Option<String>, what: &str) -> io::Result<()> {
        let Some(cmd) = cmd else {
            log::info!("[supervisor] no {} command configured", what);
            return Ok(());
        };
        log::info!("[supervisor] {}: {}", what, cmd);
        let status = Command::new("sh").arg("-c").arg(cmd).status()?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "{} command exited with {}",
                what, status
            )));
        }
        Ok(())
    }
}

impl ProcessSupervisor for ShellSupervisor {
    fn start(&self) -> io::Result<()> {
        Self::run_cmd(&self.start_cmd, "start")
    }

    fn stop(&self) -> io::Result<()> {
        Self::run_cmd(&self.stop_cmd, "stop")
    }

    fn restart(&self) -> io::Result<()> {
        if self.restart_cmd.is_some() {
            Self::run_cmd(&self.restart_cmd, "restart")
        } else {
            // A reset after a lost link means making sure the recorder is
            // down; recording resumes only on a fresh remote command.
            Self::run_cmd(&self.stop_cmd, "restart (stop)")
        }
    }
}

/// Maps peer-state transitions onto recorder control and keeps the
/// advertised status in step with what the recorder is actually doing.
struct RecorderDriver {
    supervisor: Arc<dyn ProcessSupervisor>,
    status: Arc<SharedCommand>,
    quiet: bool,
}

impl RecorderDriver {
    fn indicate(&self, new_state: PeerState) {
        if self.quiet {
            return;
        }
        let label = match new_state {
            PeerState::Disconnected => "DISCONNECTED".red().bold(),
            PeerState::Standby => "STANDBY".yellow().bold(),
            PeerState::Recording => "RECORDING".green().bold(),
        };
        eprintln!("{} remote is {}", ">>>".blue().bold(), label);
    }
}

impl StateObserver for RecorderDriver {
    fn on_state_changed(&self, new_state: PeerState) {
        self.indicate(new_state);
        match new_state {
            PeerState::Recording => match self.supervisor.start() {
                Ok(()) => self.status.set(Mode::Recording),
                Err(err) => log::error!("[host] recorder start failed: {}", err),
            },
            PeerState::Standby => {
                if let Err(err) = self.supervisor.stop() {
                    log::error!("[host] recorder stop failed: {}", err);
                }
                self.status.set(Mode::Standby);
            }
            // The loss handler owns the reset; the transition itself is
            // only indicated.
            PeerState::Disconnected => {}
        }
    }

    fn on_connection_lost(&self) {
        if !self.quiet {
            eprintln!("{} link to remote lost, resetting recorder", "!!!".red().bold());
        }
        if let Err(err) = self.supervisor.restart() {
            log::error!("[host] recorder reset failed: {}", err);
        }
        self.status.set(Mode::Standby);
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
        let client = connect_with_retry(&args.ip, args.remote_port, &running)?;
        client.set_timeouts(config::READ_TIMEOUT, Duration::ZERO);
        (Arc::new(client), Receiver::Tcp(server))
    } else {
        let server = UdpServer::bind("", args.listen_port)?;
        let client = UdpClient::connect(&args.ip, args.remote_port)?;
        (Arc::new(client), Receiver::Udp(server))
    };

    // Status frames carry the recorder's actual mode, not the commanded one.
    let status = Arc::new(SharedCommand::new(Mode::Standby));
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(ShellSupervisor {
        start_cmd: args.start_cmd.clone(),
        stop_cmd: args.stop_cmd.clone(),
        restart_cmd: args.restart_cmd.clone(),
    });
    let driver = Arc::new(RecorderDriver {
        supervisor,
        status: status.clone(),
        quiet: args.quiet,
    });

    let mut engine = HeartbeatEngine::start(
        EngineConfig {
            role: Role::Responder,
            heartbeat_period: Duration::from_millis(args.period_ms),
            ..EngineConfig::default()
        },
        tx,
        status,
        driver,
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
        eprintln!("{} reclink host", ">>>".green().bold());
        eprintln!(
            "    remote={}:{} ({}), listening on :{}, period={}ms",
            args.ip,
            args.remote_port,
            if args.tcp { "tcp" } else { "udp" },
            args.listen_port,
            args.period_ms
        );
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    engine.stop();
    rx.disconnect();
    Ok(())
}
