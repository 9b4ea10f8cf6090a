//! Provisioning server.
//!
//! Two long-lived tasks share the connection [`Registry`]:
//!
//! * the **acceptor** waits on the listening socket, claims a registry slot
//!   for each new connection (or closes it immediately when the registry is
//!   full) and hands it to the dispatcher over a channel;
//! * the **dispatcher** runs one session task per connection. A session reads
//!   frames in arrival order, checks the protocol version and routes each
//!   command to the [`Provisioner`].
//!
//! A failure on one connection only ever ends that connection's session.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::codec::{send_message, JsonCodec, PayloadCodec};
use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::framing::FrameReader;
use crate::protocol::{ProvisionCommand, ProvisionRequest};
use crate::provision::Provisioner;
use crate::registry::{Registry, SlotGuard};

/// Per-connection settings shared by every session.
#[derive(Debug, Clone)]
struct SessionSettings {
    protocol_version: String,
    max_payload: usize,
    read_timeout: Duration,
    send_acks: bool,
}

/// A connection that holds a registry slot and waits for a session.
struct Accepted {
    stream: TcpStream,
    peer: SocketAddr,
    slot: SlotGuard,
}

pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    provisioner: Arc<dyn Provisioner>,
    settings: Arc<SessionSettings>,
    full_backoff: Duration,
    cancel: CancellationToken,
}

impl Server {
    /// Binds the listening socket. Nothing is accepted until [`run`](Self::run).
    pub async fn bind(config: &ServerConfig, provisioner: Arc<dyn Provisioner>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        info!("Provisioning server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: Registry::new(config.max_connections),
            provisioner,
            settings: Arc::new(SessionSettings {
                protocol_version: config.protocol_version.clone(),
                max_payload: config.max_payload_bytes,
                read_timeout: config.read_timeout(),
                send_acks: config.send_acks,
            }),
            full_backoff: config.full_backoff(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Cancelling this token stops the server and closes every connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the acceptor and dispatcher until shutdown.
    pub async fn run(self) {
        let (conn_tx, conn_rx) = mpsc::channel(self.registry.capacity().max(1));

        let acceptor = tokio::spawn(accept_loop(
            self.listener,
            Arc::clone(&self.registry),
            conn_tx,
            self.full_backoff,
            self.cancel.clone(),
        ));

        dispatch_loop(conn_rx, self.provisioner, self.settings, self.cancel.clone()).await;

        // The dispatcher only stops on cancellation or when the acceptor is gone.
        self.cancel.cancel();
        if let Err(e) = acceptor.await {
            error!("Acceptor task failed: {}", e);
        }
        info!("Provisioning server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    conn_tx: mpsc::Sender<Accepted>,
    full_backoff: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    sleep(full_backoff).await;
                    continue;
                }
            },
        };

        let slot = match registry.register(peer) {
            Ok(slot) => slot,
            Err(full) => {
                warn!("Rejecting {}: {}", peer, full);
                drop(stream);
                sleep(full_backoff).await;
                continue;
            }
        };

        info!("Accepted {} into slot {}", peer, slot.id());
        if conn_tx.send(Accepted { stream, peer, slot }).await.is_err() {
            break;
        }
    }
    debug!("Acceptor stopped");
}

async fn dispatch_loop(
    mut conn_rx: mpsc::Receiver<Accepted>,
    provisioner: Arc<dyn Provisioner>,
    settings: Arc<SessionSettings>,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = conn_rx.recv() => match accepted {
                Some(conn) => {
                    sessions.spawn(run_session(
                        conn,
                        Arc::clone(&provisioner),
                        Arc::clone(&settings),
                    ));
                }
                None => break,
            },
            Some(result) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!("Session task panicked: {}", e);
                    }
                }
            }
        }
    }

    debug!("Dispatcher stopping, closing {} session(s)", sessions.len());
    sessions.shutdown().await;
}

async fn run_session(conn: Accepted, provisioner: Arc<dyn Provisioner>, settings: Arc<SessionSettings>) {
    let Accepted { stream, peer, slot } = conn;
    let (reader, mut writer) = stream.into_split();
    let mut frames =
        FrameReader::new(reader, settings.max_payload).with_read_timeout(settings.read_timeout);

    loop {
        let parsed = match frames.read_frame().await {
            Ok(Some((code, payload))) => parse_request(code, payload, &settings.protocol_version),
            Ok(None) => {
                info!("{} closed connection (slot {})", peer, slot.id());
                break;
            }
            Err(e) => {
                warn!("Dropping {} (slot {}): {}", peer, slot.id(), e);
                break;
            }
        };

        let (command, request) = match parsed {
            Ok(parsed) => parsed,
            Err(ProtocolError::UnknownCommand(code)) => {
                warn!("Ignoring unknown command {:#06x} from {}", code, peer);
                continue;
            }
            Err(e) => {
                // No response on a protocol violation; the connection just goes away.
                warn!("Dropping {} (slot {}): {}", peer, slot.id(), e);
                break;
            }
        };

        debug!("{} from {} with {} VM(s)", command, peer, request.vms.len());
        if let Err(e) = provisioner.provision(command, request.vms).await {
            warn!("{} for {} failed: {:#}", command, peer, e);
            continue;
        }

        if settings.send_acks {
            let ack = ProvisionRequest {
                protocol_version: settings.protocol_version.clone(),
                vms: Vec::new(),
            };
            if let Err(e) =
                send_message::<JsonCodec, _, _>(&mut writer, command.ack_code(), &ack).await
            {
                warn!("Failed to acknowledge {} to {}: {}", command, peer, e);
                break;
            }
        }
    }
}

/// Decodes a provisioning payload, enforces the version gate and resolves
/// the command code, in that order.
fn parse_request(
    code: u32,
    payload: &[u8],
    expected_version: &str,
) -> Result<(ProvisionCommand, ProvisionRequest), ProtocolError> {
    let request: ProvisionRequest = JsonCodec::decode(payload)?;
    if !request.version_matches(expected_version) {
        return Err(ProtocolError::VersionMismatch {
            expected: expected_version.to_string(),
            received: request.protocol_version,
        });
    }
    let command = ProvisionCommand::from_code(code).ok_or(ProtocolError::UnknownCommand(code))?;
    Ok((command, request))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] =
        br#"{"Protocol-version":"0.1","VM":[{"name":"foo","type":"baseVM","uuid":"u1"}]}"#;

    #[test]
    fn parses_list_request() {
        let (command, request) = parse_request(0x0011, BODY, "0.1").unwrap();
        assert_eq!(command, ProvisionCommand::List);
        assert_eq!(request.vms.len(), 1);
        assert_eq!(request.vms[0].name, "foo");
    }

    #[test]
    fn version_gate_runs_before_routing() {
        let body = br#"{"Protocol-version":"0.2"}"#;
        assert!(matches!(
            parse_request(0x9999, body, "0.1"),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_command_with_valid_version() {
        assert!(matches!(
            parse_request(0x0012, BODY, "0.1"),
            Err(ProtocolError::UnknownCommand(0x0012))
        ));
    }

    #[test]
    fn malformed_payload() {
        assert!(matches!(
            parse_request(0x0011, b"\x00\x01", "0.1"),
            Err(ProtocolError::Payload(_))
        ));
    }
}
