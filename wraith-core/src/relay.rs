//! The Relay per-connection state machine:
//! `ACCEPT -> [AUTH] -> RECV_REQ -> DIAL_UPSTREAM -> SEND_REPLY -> RELAY
//! -> TEARDOWN`.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;

use crate::auth::{self, CheckOutcome, CredentialStore};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::frame;
use crate::pipe;
use crate::socks5;

/// Drive one accepted Gateway connection to completion. Like the
/// Gateway side, every failure is session-local: logged, never
/// propagated past this connection.
pub async fn handle_connection(
    gateway_conn: TcpStream,
    config: Arc<RelayConfig>,
    store: Arc<dyn CredentialStore>,
) {
    let peer = gateway_conn
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    if let Err(e) = run(gateway_conn, &config, store.as_ref(), &peer).await {
        log::debug!("[{peer}] relay session ended: {e}");
    }
}

async fn run(
    mut gateway_conn: TcpStream,
    config: &RelayConfig,
    store: &dyn CredentialStore,
    peer: &str,
) -> Result<()> {
    let mut scratch = BytesMut::new();

    if config.require_auth {
        frame::read_frame(&mut gateway_conn, &config.key, &mut scratch).await?;
        let (user, pass) = auth::decode_auth_request(&scratch)?;
        let ok = matches!(
            store.check_password(&user, &pass).await,
            CheckOutcome::Matches
        );
        let mut reply = BytesMut::new();
        auth::encode_auth_reply(ok, &mut reply);
        frame::write_frame(&mut gateway_conn, &config.key, &reply, &mut scratch).await?;
        if !ok {
            log::debug!("[{peer}] auth failed for user {user:?}");
            return Err(Error::Unauthorized);
        }
    }

    frame::read_frame(&mut gateway_conn, &config.key, &mut scratch).await?;
    let req = socks5::parse_request(&scratch)?;

    if !req.is_connect() {
        let mut reply = BytesMut::new();
        socks5::encode_error_reply(socks5::REP_COMMAND_NOT_SUPPORTED, &mut reply);
        let _ = frame::write_frame(&mut gateway_conn, &config.key, &reply, &mut scratch).await;
        return Err(Error::UnsupportedCommand(req.cmd));
    }

    let dest_addr = match socks5::resolve(&req.dest, req.port).await {
        Ok(addr) => addr,
        Err(e) => {
            let mut reply = BytesMut::new();
            socks5::encode_error_reply(socks5::REP_HOST_UNREACHABLE, &mut reply);
            let _ = frame::write_frame(&mut gateway_conn, &config.key, &reply, &mut scratch).await;
            return Err(e);
        }
    };

    let upstream = match TcpStream::connect(dest_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let mut reply = BytesMut::new();
            socks5::encode_error_reply(socks5::REP_HOST_UNREACHABLE, &mut reply);
            let _ = frame::write_frame(&mut gateway_conn, &config.key, &reply, &mut scratch).await;
            return Err(Error::Io(e));
        }
    };

    let local = upstream.local_addr()?;
    let mut reply = BytesMut::new();
    socks5::encode_reply(socks5::REP_SUCCEEDED, local, &mut reply);
    frame::write_frame(&mut gateway_conn, &config.key, &reply, &mut scratch).await?;

    let (gateway_rd, gateway_wr) = gateway_conn.into_split();
    let (up_rd, up_wr) = upstream.into_split();
    tokio::join!(
        pipe::pipe_decrypt(
            &format!("[{peer}] gateway->upstream"),
            gateway_rd,
            up_wr,
            &config.key
        ),
        pipe::pipe_encrypt(
            &format!("[{peer}] upstream->gateway"),
            up_rd,
            gateway_wr,
            &config.key
        ),
    );
    Ok(())
}
