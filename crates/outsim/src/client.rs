//! Blocking OutSim UDP client.

use crate::filter::SourceFilter;
use crate::frame::OutSimFrame;
use crate::rate::TokenBucket;
use crate::OutSimError;
use pitwall_config::OutSimSettings;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::Duration;
use tracing::{debug, info, warn};

const RECV_BUFFER: usize = 256;

/// UDP client yielding one [`OutSimFrame`] per accepted datagram.
pub struct OutSimClient {
    socket: UdpSocket,
    filter: Option<SourceFilter>,
    bucket: Option<TokenBucket>,
}

impl OutSimClient {
    /// Bind the configured port and apply the source filter, rate limit and
    /// receive timeout.
    pub fn bind(settings: &OutSimSettings) -> Result<Self, OutSimError> {
        let filter = settings
            .allowed_sources
            .as_deref()
            .map(SourceFilter::parse)
            .transpose()?;

        let bucket = match settings.max_packets_per_second {
            Some(rate) if rate > 0.0 => Some(TokenBucket::new(rate)),
            Some(rate) => {
                return Err(OutSimError::Config(format!(
                    "max_packets_per_second must be positive, got {rate}"
                )));
            }
            None => None,
        };

        let socket = UdpSocket::bind(("0.0.0.0", settings.port))?;
        if let Some(hz) = settings.update_hz {
            if hz <= 0.0 {
                return Err(OutSimError::Config(format!(
                    "update_hz must be positive, got {hz}"
                )));
            }
            socket.set_read_timeout(Some(Duration::from_secs_f64(1.0 / hz)))?;
        }
        info!(port = settings.port, "OutSim UDP listener bound");

        Ok(Self {
            socket,
            filter,
            bucket,
        })
    }

    /// Receive until a frame is accepted or the read times out.
    ///
    /// `Ok(None)` is the timeout tick that hands control back to the frame
    /// loop. Filtered, rate-limited and malformed datagrams are dropped in
    /// place; socket errors surface to the caller.
    pub fn next_frame(&mut self) -> Result<Option<OutSimFrame>, OutSimError> {
        let mut buffer = [0u8; RECV_BUFFER];
        loop {
            let (len, source) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    debug!("OutSim socket timed out waiting for data");
                    return Ok(None);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            if let Some(filter) = &self.filter
                && !filter.allows(source.ip())
            {
                warn!(source = %source, "dropping OutSim packet from disallowed source");
                continue;
            }

            if let Some(bucket) = &mut self.bucket
                && !bucket.try_acquire()
            {
                warn!(
                    source = %source,
                    dropped = bucket.dropped(),
                    "dropping OutSim packet over the configured rate"
                );
                continue;
            }

            match OutSimFrame::parse(&buffer[..len]) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    warn!(error = %err, "discarding invalid OutSim packet");
                }
            }
        }
    }

    /// Local address the socket bound to (tests bind port 0).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, OutSimError> {
        Ok(self.socket.local_addr()?)
    }
}
