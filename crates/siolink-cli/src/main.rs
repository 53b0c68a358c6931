mod config;
mod script;

use clap::{Parser, Subcommand};
use log::{error, info};
use siolink_core::SioPort;
use siolink_net::{PeerListener, TcpRelayConnector};
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::CliConfig;
use crate::script::{LINK_TEST_SCRIPT, Script};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3301";

#[derive(Parser)]
#[command(name = "siolink", version, about = "GBA serial port relay harness")]
struct Args {
    /// Path to config file (defaults to the per-user siolink.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging of relay frames and register traffic
    #[arg(long)]
    debug: bool,

    /// Endpoint the relay dials on Connect
    #[arg(long)]
    target: Option<SocketAddrV4>,

    /// Dial the address carried by the Connect frame instead of the target
    #[arg(long)]
    honor_target: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a register script against the serial port
    Replay {
        /// Path to the script
        script: PathBuf,
    },
    /// Run the built-in link test: connect and send a 16-byte sample
    Tcptest,
    /// Accept one relay client and print every byte it sends
    Listen {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
        bind: SocketAddr,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_from_file(&config_path);
    if let Some(target) = args.target {
        cfg.relay.target = target;
    }
    if args.honor_target {
        cfg.relay.honor_requested_target = true;
    }

    let result = match &args.command {
        Command::Replay { script } => std::fs::read_to_string(script)
            .map_err(|e| format!("failed to read {}: {e}", script.display()))
            .and_then(|text| run_script(&cfg, &text)),
        Command::Tcptest => run_script(&cfg, LINK_TEST_SCRIPT),
        Command::Listen { bind } => listen(*bind),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_script(cfg: &CliConfig, text: &str) -> Result<(), String> {
    let script = Script::parse(text).map_err(|e| e.to_string())?;
    let connector = TcpRelayConnector::new(cfg.tcp_options()).map_err(|e| e.to_string())?;
    let mut port = SioPort::new(Box::new(connector), cfg.relay_config());

    let stdout = std::io::stdout();
    let summary = script
        .run(&mut port, stdout.lock())
        .map_err(|e| e.to_string())?;
    info!(
        "script done: {} bytes written, {} reads, {} serial IRQs",
        summary.written,
        summary.reads.len(),
        summary.serial_irqs
    );
    Ok(())
}

fn listen(bind: SocketAddr) -> Result<(), String> {
    let listener = PeerListener::bind(bind).map_err(|e| e.to_string())?;
    let mut peer = listener.accept().map_err(|e| e.to_string())?;

    let stdout = std::io::stdout();
    let count = peer
        .dump_hex(stdout.lock())
        .map_err(|e| format!("connection from {} failed: {e}", peer.peer_addr()))?;
    info!("{} disconnected after {count} bytes", peer.peer_addr());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_subcommands_and_overrides() {
        let args = Args::try_parse_from([
            "siolink",
            "--target",
            "127.0.0.1:4000",
            "--honor-target",
            "replay",
            "boot.txt",
        ])
        .unwrap();
        assert_eq!(args.target, Some("127.0.0.1:4000".parse().unwrap()));
        assert!(args.honor_target);
        assert!(matches!(args.command, Command::Replay { ref script } if script == &PathBuf::from("boot.txt")));
    }

    #[test]
    fn listen_defaults_to_relay_port() {
        let args = Args::try_parse_from(["siolink", "listen"]).unwrap();
        let Command::Listen { bind } = args.command else {
            panic!("expected listen");
        };
        assert_eq!(bind, DEFAULT_LISTEN_ADDR.parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Args::try_parse_from(["siolink", "--debug"]).is_err());
    }
}
