//! Entry point for `udp-probe`.
//!
//! Parses CLI arguments, connects to the diagnostic server, and runs one
//! probe session.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, address
//! resolution) and report formatting.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpStream;

use udp_probe::session::{ProbeSession, DEFAULT_TTL};

/// Latency probe speaking hand-assembled IPv4/UDP frames over TCP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server hostname or address.
    #[arg(default_value = "codebank.xyz")]
    host: String,

    /// Server TCP port.
    #[arg(short, long, default_value_t = 38005)]
    port: u16,

    /// Time-to-live written into each outer header.
    #[arg(long, default_value_t = DEFAULT_TTL)]
    ttl: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let stream = TcpStream::connect((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", cli.host, cli.port))?;

    // The session only needs the peer's 4-byte address for the outer header.
    let dest_addr = match stream.peer_addr()? {
        SocketAddr::V4(addr) => *addr.ip(),
        SocketAddr::V6(_) => bail!("{} resolved to an IPv6 address, which is unsupported", cli.host),
    };
    log::info!("connected to {dest_addr}:{}", cli.port);

    let mut session = ProbeSession::new(stream, dest_addr).with_ttl(cli.ttl);
    let report = session.run().await.context("probe session aborted")?;

    println!("Handshake response: 0x{:X}", report.handshake_ack);
    println!("Port number received: {}", report.assigned_port);
    for sample in &report.samples {
        println!(
            "{} bytes of data: RTT {} ms",
            sample.payload_len,
            sample.rtt.as_millis()
        );
    }
    println!("Average RTT: {} ms", report.average_rtt.as_millis());

    Ok(())
}
