//! `udp-probe` — a latency probe that hand-assembles IPv4/UDP frames and
//! ships them to a diagnostic server over a plain TCP stream.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  frame bytes   ┌───────────────┐
//!  │ ProbeSession │───────────────▶│   Transport   │──▶ TCP stream
//!  │  (FSM + RTT) │◀───────────────│ (byte I/O)    │◀── fixed-size replies
//!  └──────┬───────┘  u32 / u16     └───────────────┘
//!         │ build_frame(ip, udp, payload)
//!  ┌──────▼───────┐
//!  │    frame     │  headers + payload, lengths recomputed per call
//!  └──────┬───────┘
//!         │ internet_checksum(bytes)
//!  ┌──────▼───────┐
//!  │   checksum   │  RFC 1071 one's-complement sum
//!  └──────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`checksum`]  — RFC 1071 Internet checksum
//! - [`frame`]     — wire format (header builders + frame constructor)
//! - [`state`]     — finite-state-machine types
//! - [`transport`] — byte-stream wrapper and error taxonomy
//! - [`rtt`]       — round-trip-time accumulation
//! - [`session`]   — the three-phase protocol driver

pub mod checksum;
pub mod frame;
pub mod rtt;
pub mod session;
pub mod state;
pub mod transport;

pub use session::{ProbeReport, ProbeSample, ProbeSession};
pub use state::ProbeState;
pub use transport::TransportError;
