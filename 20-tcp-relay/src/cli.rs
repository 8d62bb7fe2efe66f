use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::{
    codec::{DEFAULT_MAX_FRAME_LEN, MAX_FRAME_LEN_LIMIT},
    discovery::DEFAULT_INSTANCE_NAME,
    server::{DEFAULT_OUTBOUND_QUEUE, DEFAULT_READ_CHUNK, RelayConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server.
    Serve(ServeArgs),
    /// Connect to a relay and interact with it from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:1302")]
    pub listen: SocketAddr,

    /// Largest frame payload, in bytes, a client may declare before it is dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,

    /// Bytes requested from a client socket per read.
    #[arg(long, default_value_t = DEFAULT_READ_CHUNK)]
    pub read_chunk: usize,

    /// Frames buffered for a client that is not keeping up before it is dropped.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,

    /// Advertise the relay on the local network over mDNS.
    #[arg(long)]
    pub advertise: bool,

    /// mDNS instance name used with --advertise.
    #[arg(long, default_value = DEFAULT_INSTANCE_NAME)]
    pub instance_name: String,
}

impl ServeArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_frame_len: self.max_frame_len.min(MAX_FRAME_LEN_LIMIT),
            read_chunk: self.read_chunk,
            outbound_queue: self.outbound_queue,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:1302")]
    pub server: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["tcp_relay", "serve"]).expect("parse serve");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.listen, "0.0.0.0:1302".parse::<SocketAddr>().unwrap());
        assert_eq!(args.relay_config().max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(args.relay_config().outbound_queue, DEFAULT_OUTBOUND_QUEUE);
        assert!(!args.advertise);
        assert_eq!(args.instance_name, DEFAULT_INSTANCE_NAME);
    }

    #[test]
    fn serve_overrides() {
        let cli = Cli::try_parse_from([
            "tcp_relay",
            "serve",
            "--listen",
            "127.0.0.1:0",
            "--max-frame-len",
            "64",
        ])
        .expect("parse serve");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.relay_config().max_frame_len, 64);
    }

    #[test]
    fn serve_advertise_flag() {
        let cli = Cli::try_parse_from([
            "tcp_relay",
            "serve",
            "--advertise",
            "--instance-name",
            "lab",
        ])
        .expect("parse serve");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert!(args.advertise);
        assert_eq!(args.instance_name, "lab");
    }

    #[test]
    fn oversized_frame_cap_is_clamped() {
        let huge = u64::MAX.to_string();
        let cli = Cli::try_parse_from(["tcp_relay", "serve", "--max-frame-len", huge.as_str()])
            .expect("parse serve");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.relay_config().max_frame_len, MAX_FRAME_LEN_LIMIT);
    }
}
