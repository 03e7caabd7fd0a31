//! End-to-end tests for the three-phase probe protocol.
//!
//! Each test runs a real `ProbeSession` against one half of an in-memory
//! `tokio::io::duplex` stream, with the server half scripted in a
//! background task.  The stub server parses each incoming frame from its
//! outer total-length field, so these tests also exercise the wire format
//! as an actual peer would.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use udp_probe::checksum::internet_checksum;
use udp_probe::frame::{IPV4_HEADER_LEN, UDP_HEADER_LEN};
use udp_probe::session::{ProbeSession, HANDSHAKE_MAGIC, PROBE_ROUNDS};
use udp_probe::state::ProbeState;
use udp_probe::transport::TransportError;

// ---------------------------------------------------------------------------
// Stub server
// ---------------------------------------------------------------------------

/// Fixed 4-byte acknowledgement the stub sends for the handshake and for
/// every probe.  The client accepts any value; this one is recognisable in
/// failure output.
const ACK: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

/// Destination address the client is told to probe.  Never routed — it only
/// has to land in the outer header.
const DEST: std::net::Ipv4Addr = std::net::Ipv4Addr::new(192, 0, 2, 7);

/// Read one complete frame: a 20-byte outer header, then however many bytes
/// its total-length field claims follow it.
async fn read_frame(stream: &mut DuplexStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; IPV4_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    let total = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut frame = header.to_vec();
    frame.resize(total, 0);
    stream.read_exact(&mut frame[IPV4_HEADER_LEN..]).await?;
    Ok(frame)
}

/// Script the server side: ack the handshake, assign `port_bytes`, then ack
/// `rounds` probes.  Returns the handshake frame and every probe frame seen.
async fn run_server(
    mut stream: DuplexStream,
    port_bytes: [u8; 2],
    rounds: usize,
) -> (Vec<u8>, Vec<Vec<u8>>) {
    let handshake = read_frame(&mut stream).await.expect("handshake frame");
    stream.write_all(&ACK).await.unwrap();
    stream.write_all(&port_bytes).await.unwrap();

    let mut probes = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let frame = read_frame(&mut stream).await.expect("probe frame");
        probes.push(frame);
        stream.write_all(&ACK).await.unwrap();
    }
    (handshake, probes)
}

fn payload_len(frame: &[u8]) -> usize {
    frame.len() - IPV4_HEADER_LEN - UDP_HEADER_LEN
}

fn dst_port(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[IPV4_HEADER_LEN + 2], frame[IPV4_HEADER_LEN + 3]])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// The full exchange: handshake, port discovery, twelve doubling probes,
/// average only after all of them succeeded.
#[tokio::test]
async fn session_completes_full_exchange() {
    let (client, server) = tokio::io::duplex(65536);
    let server_task = tokio::spawn(run_server(server, [0x00, 0x50], PROBE_ROUNDS as usize));

    let mut session = ProbeSession::new(client, DEST);
    let report = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("session timed out")
        .expect("session failed");

    assert_eq!(session.state(), ProbeState::Done);
    assert_eq!(report.handshake_ack, 0xCAFE_BABE);
    assert_eq!(report.assigned_port, 80);
    assert_eq!(report.samples.len(), PROBE_ROUNDS as usize);

    let (handshake, probes) = server_task.await.expect("server task panicked");

    // The handshake frame is a complete outer+inner frame around the magic.
    assert_eq!(
        handshake.len(),
        IPV4_HEADER_LEN + UDP_HEADER_LEN + HANDSHAKE_MAGIC.len()
    );
    assert_eq!(
        &handshake[IPV4_HEADER_LEN + UDP_HEADER_LEN..],
        &HANDSHAKE_MAGIC
    );
    // Port discovery has not happened yet, so the inner destination port is 0.
    assert_eq!(dst_port(&handshake), 0);

    // Payload sizes observed on the wire double from 2 to 4096.
    let sizes: Vec<usize> = probes.iter().map(|f| payload_len(f)).collect();
    assert_eq!(
        sizes,
        vec![2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096]
    );

    // Every probe frame targets the assigned port and both checksums verify.
    for frame in &probes {
        assert_eq!(dst_port(frame), 80);
        assert_eq!(internet_checksum(&frame[..IPV4_HEADER_LEN]), 0);
        assert_eq!(internet_checksum(&frame[IPV4_HEADER_LEN..]), 0);
    }

    // Report samples mirror what the wire saw.
    for (sample, size) in report.samples.iter().zip(sizes) {
        assert_eq!(sample.payload_len, size);
        assert_eq!(sample.response, 0xCAFE_BABE);
    }
}

/// The assigned port is exactly the two bytes read, big-endian.
#[tokio::test]
async fn assigned_port_parses_literal_bytes() {
    let (client, server) = tokio::io::duplex(65536);
    let server_task = tokio::spawn(run_server(server, [0x1F, 0x90], PROBE_ROUNDS as usize));

    let mut session = ProbeSession::new(client, DEST);
    let report = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("session timed out")
        .expect("session failed");

    assert_eq!(report.assigned_port, 8080);
    assert_eq!(session.dest_port(), 8080);

    let (_, probes) = server_task.await.expect("server task panicked");
    assert!(probes.iter().all(|f| dst_port(f) == 8080));
}

/// A transport failure on probe 5 aborts the session: no report, no
/// average, and exactly the four completed rounds left in the accumulator.
#[tokio::test]
async fn abort_on_probe_five_keeps_partial_total() {
    let (client, mut server) = tokio::io::duplex(65536);
    let server_task = tokio::spawn(async move {
        read_frame(&mut server).await.expect("handshake frame");
        server.write_all(&ACK).await.unwrap();
        server.write_all(&[0x00, 0x50]).await.unwrap();
        for _ in 0..4 {
            read_frame(&mut server).await.expect("probe frame");
            server.write_all(&ACK).await.unwrap();
        }
        // Accept the fifth frame, then vanish without answering.
        read_frame(&mut server).await.expect("fifth probe frame");
    });

    let mut session = ProbeSession::new(client, DEST);
    let err = tokio::time::timeout(Duration::from_secs(5), session.run())
        .await
        .expect("session timed out")
        .expect_err("session should have aborted");

    assert!(
        matches!(err, TransportError::ShortResponse { expected: 4 }),
        "expected ShortResponse, got: {err:?}"
    );
    // The fifth round (index 4) never completed.
    assert_eq!(session.state(), ProbeState::Probing(4));
    assert_eq!(session.dest_port(), 80);
    assert_eq!(session.rtt().samples(), 4);
    server_task.await.expect("server task panicked");
}
