use std::{
    fmt,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
};

use log::{debug, error, info, warn};

use crate::{
    bolt::{BoltProtocol, DEFAULT_SERVER_AGENT, ProtocolVersion, get_bolt_protocol},
    channel::{Channel, HandshakeConfig},
    error::StubError,
    transport::SocketWire,
};

use super::ThreadPool;

const DEFAULT_WORKERS: usize = 15;

/// Everything a connection needs to know before the client says anything.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bolt_version: ProtocolVersion,
    /// Feature flag bytes offered during manifest negotiation.
    pub features: Option<Vec<u8>>,
    pub handshake: HandshakeConfig,
    pub server_agent: String,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bolt_version: ProtocolVersion::new(5, 7),
            features: None,
            handshake: HandshakeConfig::default(),
            server_agent: DEFAULT_SERVER_AGENT.to_string(),
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ServerConfig {
    pub fn protocol(&self) -> Result<BoltProtocol, StubError> {
        let protocol = get_bolt_protocol(self.bolt_version, self.features.clone())?;
        Ok(protocol.with_server_agent(self.server_agent.as_str()))
    }
}

type Handler = dyn Fn(&mut Channel<SocketWire>) -> Result<(), StubError> + Send + Sync;

pub struct StubServer {
    listener: TcpListener,
    protocol: BoltProtocol,
    handshake: HandshakeConfig,
    pool: ThreadPool,
}

impl StubServer {
    /// Binds `address` and validates the configured protocol. Nothing is
    /// accepted until [`StubServer::listen`].
    pub fn new(address: SocketAddr, config: ServerConfig) -> Result<Self, StubError> {
        let protocol = config.protocol()?;
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            listener,
            protocol,
            handshake: config.handshake,
            pool: ThreadPool::new(config.workers)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StubError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, running `handler` on each one after a
    /// successful handshake.
    pub fn listen<H>(self, handler: H) -> Result<(), StubError>
    where
        H: Fn(&mut Channel<SocketWire>) -> Result<(), StubError> + Send + Sync + 'static,
    {
        info!(
            "listening at {}, talking Bolt {}",
            self.local_addr()?,
            self.protocol.version()
        );
        self.accept_loop(Arc::new(handler), None);
        Ok(())
    }

    /// Stops after `limit` accepted connections, then waits for their
    /// workers when the pool drops.
    fn accept_loop(self, handler: Arc<Handler>, limit: Option<usize>) {
        let incoming = self.listener.incoming();
        let incoming: Box<dyn Iterator<Item = _>> = match limit {
            Some(limit) => Box::new(incoming.take(limit)),
            None => Box::new(incoming),
        };

        for stream in incoming {
            match stream {
                Ok(stream) => {
                    let handler = Arc::clone(&handler);
                    let protocol = self.protocol.clone();
                    let handshake = self.handshake.clone();
                    self.pool.execute(move || {
                        handle_connection(stream, protocol, handshake, &*handler)
                    });
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
    }
}

fn handle_connection(
    stream: TcpStream,
    protocol: BoltProtocol,
    handshake: HandshakeConfig,
    handler: &Handler,
) {
    let wire = match SocketWire::new(stream) {
        Ok(wire) => wire,
        Err(e) => {
            warn!("failed to set up connection: {e}");
            return;
        }
    };
    let peer = wire
        .peer()
        .map_or_else(|| "unknown".to_string(), |addr| addr.to_string());
    debug!("[{peer}] connected");

    let prefix = peer.clone();
    let mut channel = Channel::new(wire, protocol, handshake)
        .with_log_sink(Box::new(move |args: fmt::Arguments<'_>| {
            info!("[{prefix}] {args}")
        }));

    match run_session(&mut channel, handler) {
        Ok(()) => debug!("[{peer}] session finished"),
        Err(e) => {
            report_fault(&peer, &e);
            if let Err(e) = channel.close() {
                debug!("[{peer}] failed to close connection: {e}");
            }
        }
    }
}

fn run_session(channel: &mut Channel<SocketWire>, handler: &Handler) -> Result<(), StubError> {
    channel.preamble()?;
    channel.version_handshake()?;
    handler(channel)
}

fn report_fault(peer: &str, fault: &StubError) {
    match fault {
        StubError::ServerExit(_) | StubError::Unimplemented(_) => error!("[{peer}] {fault}"),
        _ => warn!("[{peer}] {fault}"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        thread,
    };

    use super::*;
    use crate::server::auto_session;

    fn local_server(config: ServerConfig) -> (StubServer, SocketAddr) {
        let server = StubServer::new("127.0.0.1:0".parse().unwrap(), config).unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    #[test]
    fn handshake_and_goodbye_over_tcp() {
        let config = ServerConfig {
            bolt_version: ProtocolVersion::new(5, 4),
            workers: 1,
            ..Default::default()
        };
        let (server, addr) = local_server(config);
        let server =
            thread::spawn(move || server.accept_loop(Arc::new(auto_session::<SocketWire>), Some(1)));

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&[0x60, 0x60, 0xB0, 0x17]).unwrap();
        client
            .write_all(&[
                0x00, 0x00, 0x04, 0x05, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ])
            .unwrap();

        let mut reply = [0; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x00, 0x00, 0x04, 0x05]);

        // GOODBYE
        client.write_all(&[0x00, 0x02, 0xB0, 0x02, 0x00, 0x00]).unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        server.join().unwrap();
    }

    #[test]
    fn rejected_offer_aborts_connection() {
        let config = ServerConfig {
            bolt_version: ProtocolVersion::new(3, 0),
            workers: 1,
            ..Default::default()
        };
        let (server, addr) = local_server(config);
        let server =
            thread::spawn(move || server.accept_loop(Arc::new(auto_session::<SocketWire>), Some(1)));

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&[0x60, 0x60, 0xB0, 0x17]).unwrap();
        client.write_all(&[0x00, 0x00, 0x00, 0x05]).unwrap();
        client.write_all(&[0; 12]).unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, vec![0x00, 0x00, 0x00, 0x00]);

        server.join().unwrap();
    }

    #[test]
    fn invalid_features_fail_upfront() {
        let config = ServerConfig {
            features: Some(vec![0x80]),
            ..Default::default()
        };
        let err = StubServer::new("127.0.0.1:0".parse().unwrap(), config)
            .err()
            .unwrap();

        assert!(matches!(err, StubError::Protocol(_)));
    }

    #[test]
    fn zero_workers_is_an_error() {
        let config = ServerConfig {
            workers: 0,
            ..Default::default()
        };
        let err = StubServer::new("127.0.0.1:0".parse().unwrap(), config)
            .err()
            .unwrap();

        match err {
            StubError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
