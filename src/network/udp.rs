use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

use super::envelope::{decode, encode, Envelope, Tag};
use super::Transport;
use crate::broadcast::ProcessId;
use crate::common::config::ProtocolConfig;
use crate::common::error::{CodecError, TransportError};
use crate::common::metrics::{
    Metrics, ERROR_BIND, ERROR_EXHAUSTED, ERROR_OVERSIZE, ERROR_READ, ERROR_SEND, ERROR_UNPACK,
};
use crate::resolver::Resolver;

/// One UDP socket per process, used both to listen and to send.
pub struct UdpTransport {
    id: ProcessId,
    socket: Arc<UdpSocket>,
    addresses: HashMap<ProcessId, SocketAddr>,
    max_datagram: usize,
    send_attempts: u32,
    send_backoff: Duration,
    metrics: Arc<Metrics>,
}

impl UdpTransport {
    pub async fn bind(
        id: ProcessId,
        addr: SocketAddr,
        addresses: HashMap<ProcessId, SocketAddr>,
        config: &ProtocolConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| {
            metrics.record_error(ERROR_BIND);
            TransportError::Bind { addr, source }
        })?;
        info!(process = id, addr = %socket.local_addr()?, "UDP transport listening");

        Ok(UdpTransport {
            id,
            socket: Arc::new(socket),
            addresses,
            max_datagram: config.max_datagram,
            send_attempts: config.send_attempts.max(1),
            send_backoff: config.send_backoff(),
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Reads one datagram. `Ok(None)` means it was not a valid envelope and
    /// has been counted and dropped.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<Option<Envelope>, TransportError> {
        let (size, from) = self.socket.recv_from(buf).await.map_err(|e| {
            self.metrics.record_error(ERROR_READ);
            TransportError::Io(e)
        })?;

        // The buffer holds one byte more than the limit, so a full read was truncated.
        if size > self.max_datagram {
            self.metrics.record_error(ERROR_OVERSIZE);
            return Err(CodecError::Oversized {
                size,
                max: self.max_datagram,
            }
            .into());
        }

        match decode(&buf[..size]) {
            Ok(envelope) => {
                self.metrics.record_received(Tag::label(envelope.tag), size);
                trace!(process = self.id, %from, tag = envelope.tag, "Datagram received");
                Ok(Some(envelope))
            }
            Err(e) => {
                self.metrics.record_error(ERROR_UNPACK);
                warn!(process = self.id, %from, error = %e, "Dropping undecodable datagram");
                Ok(None)
            }
        }
    }

    /// Serves inbound datagrams until the socket fails. Every envelope is
    /// dispatched in its own task.
    pub async fn receive_loop(&self, resolver: Arc<Resolver>) -> Result<(), TransportError> {
        let mut buf = vec![0u8; self.max_datagram + 1];
        loop {
            match self.recv(&mut buf).await {
                Ok(Some(envelope)) => {
                    let resolver = Arc::clone(&resolver);
                    tokio::spawn(async move { resolver.handle(envelope).await });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(process = self.id, error = %e, "UDP receive loop stopping");
                    return Err(e);
                }
            }
        }
    }
}

async fn send_with_retry(
    socket: &UdpSocket,
    addr: SocketAddr,
    bytes: &[u8],
    attempts: u32,
    backoff: Duration,
) -> Result<(), TransportError> {
    for attempt in 1..=attempts {
        match socket.send_to(bytes, addr).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(%addr, attempt, error = %e, "UDP send failed");
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(TransportError::Exhausted { attempts })
}

impl Transport for UdpTransport {
    fn send(&self, to: ProcessId, envelope: Envelope) {
        let Some(&addr) = self.addresses.get(&to) else {
            self.metrics.record_error(ERROR_SEND);
            let error = TransportError::UnknownPeer(to);
            warn!(process = self.id, %error, "Dropping envelope");
            return;
        };

        let bytes = match encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.record_error(ERROR_SEND);
                error!(process = self.id, to, error = %e, "Could not encode envelope");
                return;
            }
        };
        if bytes.len() > self.max_datagram {
            self.metrics.record_error(ERROR_OVERSIZE);
            let error = CodecError::Oversized {
                size: bytes.len(),
                max: self.max_datagram,
            };
            error!(process = self.id, to, %error, "Envelope too large for one datagram");
            return;
        }

        let socket = Arc::clone(&self.socket);
        let metrics = Arc::clone(&self.metrics);
        let attempts = self.send_attempts;
        let backoff = self.send_backoff;
        let tag = Tag::label(envelope.tag);
        let id = self.id;
        tokio::spawn(async move {
            match send_with_retry(&socket, addr, &bytes, attempts, backoff).await {
                Ok(()) => metrics.record_sent(tag, bytes.len()),
                Err(e) => {
                    metrics.record_error(ERROR_EXHAUSTED);
                    warn!(process = id, to, %addr, error = %e, "Giving up on envelope");
                }
            }
        });
    }
}
