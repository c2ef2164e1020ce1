use std::{error::Error, net::SocketAddr, num::NonZeroUsize, process, time::Duration};

use boltstub::{
    HandshakeConfig, HandshakeMode, ServerConfig, StubServer, auto_session,
    bolt::{DEFAULT_SERVER_AGENT, ProtocolVersion},
    transport::SocketWire,
    util::{HexBytes, parse_delay},
};
use clap::Parser;
use log::info;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Bolt version to negotiate, e.g. "5.7"
    #[arg(short = 'v', long, default_value = "5.7")]
    bolt_version: ProtocolVersion,
    /// Feature flag bytes offered in manifest negotiation, e.g. "00"
    #[arg(long)]
    features: Option<HexBytes>,
    /// Answer every handshake with these bytes instead of negotiating
    #[arg(long, conflicts_with = "handshake_manifest")]
    handshake: Option<HexBytes>,
    /// Bytes the client must send after a fixed handshake response
    #[arg(long, requires = "handshake")]
    handshake_response: Option<HexBytes>,
    /// Only accept this manifest version
    #[arg(long)]
    handshake_manifest: Option<u8>,
    /// Seconds to wait before the first handshake write
    #[arg(long, value_parser = parse_delay)]
    handshake_delay: Option<Duration>,
    #[arg(long, default_value = DEFAULT_SERVER_AGENT)]
    server_agent: String,
    /// Number of connections served concurrently
    #[arg(long, default_value = "15")]
    workers: NonZeroUsize,
}

impl Cli {
    fn config(self) -> ServerConfig {
        let mode = match self.handshake {
            Some(HexBytes(response)) => HandshakeMode::Fixed {
                response,
                expected_reply: self.handshake_response.map(|HexBytes(b)| b),
            },
            None => HandshakeMode::Dynamic {
                manifest: self.handshake_manifest,
            },
        };
        ServerConfig {
            bolt_version: self.bolt_version,
            features: self.features.map(|HexBytes(b)| b),
            handshake: HandshakeConfig {
                mode,
                delay: self.handshake_delay,
            },
            server_agent: self.server_agent,
            workers: self.workers.get(),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let address = cli.address;
    let server = StubServer::new(address, cli.config())?;

    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        process::exit(130);
    })?;

    server.listen(auto_session::<SocketWire>)?;
    Ok(())
}
