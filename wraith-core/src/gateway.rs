//! The Gateway per-connection state machine:
//! `ACCEPT -> GREET -> RECV_FIRST_REQ -> [DIRECT_TRY?] -> DIAL_RELAY ->
//! AUTH_SEND -> AUTH_RECV -> FORWARD_REQ -> RECV_REPLY -> RELAY ->
//! TEARDOWN`.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::auth;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::frame::{self, BUFFER_SIZE};
use crate::pipe;
use crate::socks5;

/// Drive one accepted local-client connection to completion. Never
/// returns an error: every failure is session-local and is logged at
/// debug level, then both sockets are dropped (Rust's ownership already
/// guarantees the close-on-every-exit-path contract).
pub async fn handle_connection(client: TcpStream, config: Arc<GatewayConfig>) {
    let peer = client
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    if let Err(e) = run(client, &config, &peer).await {
        log::debug!("[{peer}] gateway session ended: {e}");
    }
}

async fn run(mut client: TcpStream, config: &GatewayConfig, peer: &str) -> Result<()> {
    let accept = socks5::read_greeting(&mut client).await?;
    socks5::write_greeting_reply(&mut client, accept).await?;
    if !accept {
        return Err(Error::NoAcceptableMethods);
    }

    let mut first_read = vec![0u8; BUFFER_SIZE];
    let n = client.read(&mut first_read).await?;
    if n == 0 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "client closed before sending a request",
        )));
    }
    let raw_request = first_read[..n].to_vec();

    if config.split_horizon {
        if let Some(upstream) = try_direct(&raw_request).await {
            log::debug!("[{peer}] split-horizon direct dial");
            let local = upstream.local_addr()?;
            let mut reply = BytesMut::new();
            socks5::encode_reply(socks5::REP_SUCCEEDED, local, &mut reply);
            client.write_all(&reply).await?;
            client.flush().await?;

            let (client_rd, client_wr) = client.into_split();
            let (up_rd, up_wr) = upstream.into_split();
            tokio::join!(
                pipe::pipe_plain(&format!("[{peer}] client->upstream"), client_rd, up_wr),
                pipe::pipe_plain(&format!("[{peer}] upstream->client"), up_rd, client_wr),
            );
            return Ok(());
        }
        log::debug!("[{peer}] split-horizon miss, falling back to relay");
    }

    let mut relay_conn = TcpStream::connect((config.server_host.as_str(), config.server_port))
        .await
        .map_err(Error::Io)?;

    let mut scratch = BytesMut::new();
    if let Some((user, pass)) = &config.credentials {
        let mut payload = BytesMut::new();
        auth::encode_auth_request(user, pass, &mut payload);
        frame::write_frame(&mut relay_conn, &config.key, &payload, &mut scratch).await?;
        frame::read_frame(&mut relay_conn, &config.key, &mut scratch).await?;
        if !auth::decode_auth_reply(&scratch)? {
            return Err(Error::Unauthorized);
        }
    }

    frame::write_frame(&mut relay_conn, &config.key, &raw_request, &mut scratch).await?;
    frame::read_frame(&mut relay_conn, &config.key, &mut scratch).await?;
    client.write_all(&scratch).await?;
    client.flush().await?;

    let (client_rd, client_wr) = client.into_split();
    let (relay_rd, relay_wr) = relay_conn.into_split();
    tokio::join!(
        pipe::pipe_encrypt(&format!("[{peer}] client->relay"), client_rd, relay_wr, &config.key),
        pipe::pipe_decrypt(&format!("[{peer}] relay->client"), relay_rd, client_wr, &config.key),
    );
    Ok(())
}

/// Best-effort direct dial for split-horizon mode. Any failure along
/// the way (parse, non-CONNECT command, DNS, dial) falls through to the
/// Relay rather than aborting the session.
async fn try_direct(raw_request: &[u8]) -> Option<TcpStream> {
    let req = socks5::parse_request(raw_request).ok()?;
    if !req.is_connect() {
        return None;
    }
    let addr = socks5::resolve(&req.dest, req.port).await.ok()?;
    TcpStream::connect(addr).await.ok()
}
