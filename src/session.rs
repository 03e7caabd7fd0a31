//! Probe session: handshake + port discovery + timed probe loop.
//!
//! A [`ProbeSession`] owns the complete state for one exchange with the
//! server.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Requesting frames from [`crate::frame`] for each phase.
//! - Writing frames and reading fixed-size responses via
//!   [`crate::transport`].
//! - Feeding per-round timings into [`crate::rtt`].
//!
//! The protocol is strictly sequential: every round blocks on
//! write-then-read before the next begins, and the first transport error
//! aborts the whole session.  There are no retries — the stream underneath
//! is reliable and ordered, so a failure means the peer is gone or
//! non-conformant, not that a datagram was lost.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::{build_frame, Ipv4Header, UdpHeader};
use crate::rtt::RttAccumulator;
use crate::state::ProbeState;
use crate::transport::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Fixed payload of the handshake frame.
pub const HANDSHAKE_MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Number of probe rounds per session.
pub const PROBE_ROUNDS: u8 = 12;

/// Payload size of the first probe round; doubles every round after.
pub const INITIAL_PAYLOAD_LEN: usize = 2;

/// TTL written into the outer header unless the caller overrides it.
pub const DEFAULT_TTL: u8 = 50;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// One completed probe round.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    /// Zero-filled payload bytes carried by this round's frame.
    pub payload_len: usize,
    /// The server's 4-byte response, accepted unvalidated.
    pub response: u32,
    /// Time between the frame write and the last response byte.
    pub rtt: Duration,
}

/// Result of a fully completed session.
///
/// Only produced once all [`PROBE_ROUNDS`] rounds have succeeded; an
/// aborted session yields an error instead, never a partial report.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// The 4-byte handshake acknowledgement, accepted unvalidated.
    pub handshake_ack: u32,
    /// Destination port assigned by the server during port discovery.
    pub assigned_port: u16,
    /// One entry per probe round, in send order.
    pub samples: Vec<ProbeSample>,
    /// Mean RTT over all rounds.
    pub average_rtt: Duration,
}

// ---------------------------------------------------------------------------
// ProbeSession
// ---------------------------------------------------------------------------

/// A single probe exchange with the server.
///
/// Generic over the stream type so the binary can hand in a
/// `tokio::net::TcpStream` while tests use `tokio::io::duplex`.
pub struct ProbeSession<S> {
    transport: Transport<S>,
    state: ProbeState,
    /// Destination address written into every outer header.  Opaque to the
    /// session; the caller resolved it.
    dest_addr: Ipv4Addr,
    /// Destination port for the inner header.  0 until port discovery
    /// stores the server's assignment, exactly once.
    dest_port: u16,
    /// Payload size of the current probe round.
    payload_len: usize,
    ttl: u8,
    rtt: RttAccumulator,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProbeSession<S> {
    /// Create a session over an already-connected stream.
    pub fn new(stream: S, dest_addr: Ipv4Addr) -> Self {
        Self {
            transport: Transport::new(stream),
            state: ProbeState::default(),
            dest_addr,
            dest_port: 0,
            payload_len: INITIAL_PAYLOAD_LEN,
            ttl: DEFAULT_TTL,
            rtt: RttAccumulator::new(),
        }
    }

    /// Override the TTL written into outer headers.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Current FSM state.
    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Destination port learned from the server (0 before port discovery).
    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    /// RTT samples recorded so far.
    ///
    /// After an aborted session this holds the partial total of the rounds
    /// that completed; it is never folded into an average here.
    pub fn rtt(&self) -> &RttAccumulator {
        &self.rtt
    }

    // -----------------------------------------------------------------------
    // Protocol phases
    // -----------------------------------------------------------------------

    /// Run the whole session: handshake, port discovery, then
    /// [`PROBE_ROUNDS`] timed probe rounds.
    ///
    /// The first transport error aborts the session immediately; remaining
    /// rounds are not attempted and no average is computed.
    pub async fn run(&mut self) -> Result<ProbeReport, TransportError> {
        let handshake_ack = self.handshake().await?;
        let assigned_port = self.discover_port().await?;

        let mut samples = Vec::with_capacity(PROBE_ROUNDS as usize);
        self.payload_len = INITIAL_PAYLOAD_LEN;
        for round in 0..PROBE_ROUNDS {
            self.state = ProbeState::Probing(round);
            samples.push(self.probe_round().await?);
            self.payload_len *= 2;
        }
        self.state = ProbeState::Done;

        Ok(ProbeReport {
            handshake_ack,
            assigned_port,
            samples,
            average_rtt: self.rtt.average(),
        })
    }

    /// Send the magic-payload frame and read the 4-byte acknowledgement.
    ///
    /// Any 4 bytes are accepted — the value is an observability checkpoint,
    /// not a credential.
    async fn handshake(&mut self) -> Result<u32, TransportError> {
        let frame = self.next_frame(&HANDSHAKE_MAGIC);
        self.transport.send_frame(&frame).await?;
        self.state = ProbeState::HandshakeSent;

        let ack = self.transport.read_u32().await?;
        self.state = ProbeState::AckReceived;
        log::info!("[probe] handshake response: 0x{ack:X}");
        Ok(ack)
    }

    /// Read the 2-byte assigned port and store it into the session.
    async fn discover_port(&mut self) -> Result<u16, TransportError> {
        let port = self.transport.read_u16().await?;
        self.dest_port = port;
        self.state = ProbeState::PortAssigned;
        log::info!("[probe] assigned port: {port}");
        Ok(port)
    }

    /// One probe round: build, time, send, read, record.
    async fn probe_round(&mut self) -> Result<ProbeSample, TransportError> {
        let payload = vec![0u8; self.payload_len];
        let frame = self.next_frame(&payload);
        log::debug!("[probe] → frame with {} payload byte(s)", self.payload_len);

        let started = Instant::now();
        self.transport.send_frame(&frame).await?;
        let response = self.transport.read_u32().await?;
        let rtt = started.elapsed();

        self.rtt.record(rtt);
        log::info!(
            "[probe] {} byte(s): response 0x{response:X}, rtt {} ms",
            self.payload_len,
            rtt.as_millis()
        );
        Ok(ProbeSample {
            payload_len: self.payload_len,
            response,
            rtt,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Build one frame for the current session parameters.
    ///
    /// Headers are rebuilt from scratch every call: length and checksum
    /// fields always reflect this payload, never a previous one.  The
    /// source port is drawn fresh per frame.
    fn next_frame(&self, payload: &[u8]) -> Vec<u8> {
        let ip = Ipv4Header {
            tos: 0,
            ident: 0,
            ttl: self.ttl,
            src: Ipv4Addr::UNSPECIFIED,
            dst: self.dest_addr,
        };
        let udp = UdpHeader {
            src_port: rand::thread_rng().gen(),
            dst_port: self.dest_port,
        };
        build_frame(&ip, &udp, payload)
    }
}
