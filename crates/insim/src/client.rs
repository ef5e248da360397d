//! Polling TCP client for the InSim channel.
//!
//! The client connects, performs the ISI handshake and then reads
//! non-blockingly from inside [`InSimClient::poll`], which the orchestrator
//! calls once per frame-loop iteration. Decoded events come back in arrival
//! order. The write side is exposed as a cloneable [`InSimWriter`] behind
//! the [`PacketSink`] trait so collaborators (HUD) can draw without owning
//! the client.

use crate::decode::{Decoder, InSimEvent};
use crate::encode::build_mst;
use crate::framer::Framer;
use crate::{ProtocolError, build_isi};
use parking_lot::Mutex;
use pitwall_config::InSimSettings;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 512;
/// Retry bound for writes hitting a full socket buffer.
const SEND_RETRIES: usize = 100;
const SEND_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Anything that can deliver outbound InSim packets.
pub trait PacketSink {
    fn send(&self, packet: &[u8]) -> Result<(), ProtocolError>;
    fn is_connected(&self) -> bool;
}

/// Cloneable handle to the InSim write side.
#[derive(Clone)]
pub struct InSimWriter {
    stream: Arc<Mutex<Option<TcpStream>>>,
}

impl InSimWriter {
    /// A writer with no connection; every send reports [`ProtocolError::NotConnected`].
    pub fn disconnected() -> Self {
        Self {
            stream: Arc::new(Mutex::new(None)),
        }
    }
}

impl PacketSink for InSimWriter {
    fn send(&self, packet: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        send_all(stream, packet)
    }

    fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }
}

/// Write every byte, retrying briefly when the non-blocking socket is full.
fn send_all(stream: &mut TcpStream, packet: &[u8]) -> Result<(), ProtocolError> {
    let mut written = 0;
    let mut retries = 0;
    while written < packet.len() {
        match stream.write(&packet[written..]) {
            Ok(0) => return Err(ProtocolError::ConnectionClosed),
            Ok(n) => written += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                retries += 1;
                if retries > SEND_RETRIES {
                    return Err(ProtocolError::SendStalled(packet.len() - written));
                }
                std::thread::sleep(SEND_RETRY_DELAY);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// InSim TCP client with a polling read loop.
pub struct InSimClient {
    stream: Arc<Mutex<Option<TcpStream>>>,
    framer: Framer,
    decoder: Decoder,
}

impl InSimClient {
    /// Connect, switch the socket to non-blocking reads and send the ISI
    /// handshake.
    pub fn connect(settings: &InSimSettings) -> Result<Self, ProtocolError> {
        info!(host = %settings.host, port = settings.port, "connecting to InSim");
        let stream = TcpStream::connect((settings.host.as_str(), settings.port))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let client = Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            framer: Framer::new(),
            decoder: Decoder::new(),
        };
        client.writer().send(&build_isi(settings))?;
        Ok(client)
    }

    /// Build a client over an already-connected stream (tests use a socket
    /// pair; no handshake is sent).
    pub fn from_stream(stream: TcpStream) -> Result<Self, ProtocolError> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            framer: Framer::new(),
            decoder: Decoder::new(),
        })
    }

    /// Cloneable write-side handle.
    pub fn writer(&self) -> InSimWriter {
        InSimWriter {
            stream: Arc::clone(&self.stream),
        }
    }

    /// Send an MST chat-style command.
    pub fn send_command(&self, command: &str) -> Result<(), ProtocolError> {
        self.writer().send(&build_mst(command))
    }

    /// Read whatever the socket has buffered and decode it.
    ///
    /// Framing and schema violations are logged and skipped; only transport
    /// failures (peer close, socket errors) propagate, at which point the
    /// connection is torn down.
    pub fn poll(&mut self) -> Result<Vec<InSimEvent>, ProtocolError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let result = {
                let mut guard = self.stream.lock();
                let stream = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
                stream.read(&mut chunk)
            };
            match result {
                Ok(0) => {
                    debug!("InSim peer closed the connection");
                    self.close();
                    return Err(ProtocolError::ConnectionClosed);
                }
                Ok(n) => self.framer.extend(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.close();
                    return Err(err.into());
                }
            }
        }

        let mut events = Vec::new();
        for packet in self.framer.drain() {
            match self.decoder.decode(&packet) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "rejecting InSim packet"),
            }
        }
        Ok(events)
    }

    /// Drop the connection; subsequent writes report not-connected.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.framer.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }
}

impl Drop for InSimClient {
    fn drop(&mut self) {
        self.close();
    }
}
