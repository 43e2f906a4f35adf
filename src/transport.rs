//! Blocking TCP link to one peer.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::protocol::{Decoder, Framing, WireFrame, MAX_ENVELOPE_FRAME};

/// A connected stream. Clones made with [`Transport::try_clone`] share the
/// socket and its closed flag, so closing any handle closes them all.
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
    peer: String,
    closed: Arc<AtomicBool>,
}

impl Transport {
    /// Connect to `host:port`, trying every resolved address in turn.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ChatError::connection(&addr, e))?
            .collect();

        let mut last_error =
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for candidate in candidates {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => {
                    log::info!("connected to {} ({})", addr, candidate);
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => {
                    log::debug!("connect to {} failed: {}", candidate, e);
                    last_error = e;
                }
            }
        }
        Err(ChatError::connection(addr, last_error))
    }

    /// Wrap an already connected stream, e.g. one accepted by a listener.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        Self {
            stream,
            peer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            peer: self.peer.clone(),
            closed: Arc::clone(&self.closed),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Write the whole buffer.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    /// Read at most `max` bytes. An empty result means the peer closed the
    /// connection, or this side did.
    pub fn receive(&mut self, max: usize) -> io::Result<Vec<u8>> {
        if self.is_closed() {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; max];
        let n = loop {
            match self.stream.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if self.is_closed() => {
                    log::debug!("receive on closed transport to {}: {}", self.peer, e);
                    break 0;
                }
                Err(e) => return Err(e),
            }
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// Shut the socket down. Only the first call on any clone has an effect;
    /// a receive blocked on another clone returns promptly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => log::debug!("closed transport to {}", self.peer),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => log::warn!("shutdown of transport to {} failed: {}", self.peer, e),
        }
    }
}

/// Reads whole frames off a transport, keeping any extra frames a single
/// chunk carried for the next call.
#[derive(Debug)]
pub struct FrameReader<F> {
    transport: Transport,
    decoder: Decoder,
    chunk: usize,
    queued: VecDeque<F>,
}

impl<F: WireFrame> FrameReader<F> {
    pub fn new(transport: Transport, framing: Framing, chunk: usize) -> Self {
        Self {
            transport,
            decoder: Decoder::new(framing, MAX_ENVELOPE_FRAME),
            chunk,
            queued: VecDeque::new(),
        }
    }

    /// Next frame, or `None` once the connection is closed.
    pub fn next_frame(&mut self) -> Result<Option<F>> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Ok(Some(frame));
            }
            let chunk = self.transport.receive(self.chunk)?;
            if chunk.is_empty() {
                return Ok(None);
            }
            self.queued.extend(self.decoder.decode::<F>(&chunk)?);
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn close(&self) {
        self.transport.close();
    }
}
