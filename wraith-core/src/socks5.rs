//! SOCKS5 (RFC 1928) greeting, CONNECT request, and reply (de)serialization.
//!
//! Only the subset this tunnel needs: NO-AUTH greeting negotiation and the
//! CONNECT command over IPv4/IPv6/domain addresses. BIND and UDP ASSOCIATE
//! parse but are rejected by the caller with a command-not-supported reply.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// The destination carried by a CONNECT request, before DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
    Domain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub cmd: u8,
    pub dest: Destination,
    pub port: u16,
}

impl Request {
    pub fn is_connect(&self) -> bool {
        self.cmd == CMD_CONNECT
    }
}

/// Read the greeting `VER, NMETHODS, METHODS[NMETHODS]` from a live
/// client connection. Returns whether NO-AUTH (`0x00`) was offered.
pub async fn read_greeting<R>(reader: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let ver = reader.read_u8().await?;
    if ver != VERSION {
        return Err(Error::BadVersion(ver));
    }
    let nmethods = reader.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    reader.read_exact(&mut methods).await?;
    Ok(methods.contains(&METHOD_NO_AUTH))
}

/// Write the greeting reply: `05 00` if NO-AUTH was accepted, `05 01`
/// (session-ending) otherwise.
pub async fn write_greeting_reply<W>(writer: &mut W, accept_no_auth: bool) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if accept_no_auth {
        writer.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    } else {
        writer.write_all(&[VERSION, 0x01]).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Parse a CONNECT request out of an already fully-buffered byte slice
/// (the Gateway's single captured read, or a decrypted frame's
/// plaintext at the Relay). Unlike the greeting, this never needs to
/// suspend: by the time it runs the whole message is in memory, so
/// "not enough bytes for the declared address type" is detected by
/// bounds-checking the slice rather than by a separate buffered-bytes
/// guard.
pub fn parse_request(buf: &[u8]) -> Result<Request> {
    if buf.len() < 4 {
        return Err(Error::ShortMessage);
    }
    let ver = buf[0];
    if ver != VERSION {
        return Err(Error::BadVersion(ver));
    }
    let cmd = buf[1];
    if cmd == 0x00 || cmd > CMD_UDP_ASSOCIATE {
        return Err(Error::BadCommand(cmd));
    }
    // buf[2] is RSV, discarded.
    let atyp = buf[3];

    let (dest, port) = match atyp {
        ATYP_IPV4 => {
            if buf.len() < 4 + 4 + 2 {
                return Err(Error::ShortMessage);
            }
            let mut addr = [0u8; 4];
            addr.copy_from_slice(&buf[4..8]);
            let port = u16::from_be_bytes([buf[8], buf[9]]);
            (Destination::Ipv4(addr), port)
        }
        ATYP_IPV6 => {
            if buf.len() < 4 + 16 + 2 {
                return Err(Error::ShortMessage);
            }
            let mut addr = [0u8; 16];
            addr.copy_from_slice(&buf[4..20]);
            let port = u16::from_be_bytes([buf[20], buf[21]]);
            (Destination::Ipv6(addr), port)
        }
        ATYP_DOMAIN => {
            if buf.len() < 5 {
                return Err(Error::ShortMessage);
            }
            let domain_len = buf[4] as usize;
            if buf.len() < 5 + domain_len + 2 {
                return Err(Error::ShortMessage);
            }
            let domain = std::str::from_utf8(&buf[5..5 + domain_len])
                .map_err(|_| Error::ShortMessage)?
                .to_owned();
            let port_off = 5 + domain_len;
            let port = u16::from_be_bytes([buf[port_off], buf[port_off + 1]]);
            (Destination::Domain(domain), port)
        }
        other => return Err(Error::BadAtyp(other)),
    };

    Ok(Request { cmd, dest, port })
}

/// Resolve a parsed destination to a dialable `SocketAddr`, running the
/// platform DNS resolver for domain names.
pub async fn resolve(dest: &Destination, port: u16) -> Result<SocketAddr> {
    match dest {
        Destination::Ipv4(bytes) => Ok(SocketAddr::from((Ipv4Addr::from(*bytes), port))),
        Destination::Ipv6(bytes) => Ok(SocketAddr::from((Ipv6Addr::from(*bytes), port))),
        Destination::Domain(host) => {
            let mut addrs = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| Error::Resolve(host.clone(), e))?;
            addrs.next().ok_or_else(|| {
                Error::Resolve(
                    host.clone(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
                )
            })
        }
    }
}

/// Encode a SOCKS5 reply: `05 REP 00 ATYP BND.ADDR BND.PORT`. `ATYP` and
/// `BND.ADDR`/`BND.PORT` reflect `bound`, the local address of whichever
/// socket was just opened (the direct dial, or the Relay's upstream
/// dial).
pub fn encode_reply(rep: u8, bound: SocketAddr, out: &mut BytesMut) {
    out.put_u8(VERSION);
    out.put_u8(rep);
    out.put_u8(0x00);
    match bound {
        SocketAddr::V4(v4) => {
            out.put_u8(ATYP_IPV4);
            out.put_slice(&v4.ip().octets());
            out.put_u16(v4.port());
        }
        SocketAddr::V6(v6) => {
            out.put_u8(ATYP_IPV6);
            out.put_slice(&v6.ip().octets());
            out.put_u16(v6.port());
        }
    }
}

/// A reply carrying no meaningful bound address, for early failures
/// (e.g. command-not-supported) that precede any dial.
pub fn encode_error_reply(rep: u8, out: &mut BytesMut) {
    encode_reply(rep, SocketAddr::from(([0, 0, 0, 0], 0)), out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_connect() {
        let buf = [0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90];
        let req = parse_request(&buf).unwrap();
        assert_eq!(req.cmd, CMD_CONNECT);
        assert_eq!(req.dest, Destination::Ipv4([127, 0, 0, 1]));
        assert_eq!(req.port, 8080);
    }

    #[test]
    fn parses_domain_connect() {
        let mut buf = vec![0x05, 0x01, 0x00, 0x03, 11];
        buf.extend_from_slice(b"example.com");
        buf.extend_from_slice(&443u16.to_be_bytes());
        let req = parse_request(&buf).unwrap();
        assert_eq!(req.dest, Destination::Domain("example.com".into()));
        assert_eq!(req.port, 443);
    }

    #[test]
    fn parses_ipv6_all_zero() {
        let mut buf = vec![0x05, 0x01, 0x00, 0x04];
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&80u16.to_be_bytes());
        let req = parse_request(&buf).unwrap();
        assert_eq!(req.dest, Destination::Ipv6([0u8; 16]));
    }

    #[test]
    fn rejects_bad_version() {
        let buf = [0x04, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parse_request(&buf), Err(Error::BadVersion(0x04))));
    }

    #[test]
    fn rejects_zero_command() {
        let buf = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parse_request(&buf), Err(Error::BadCommand(0x00))));
    }

    #[test]
    fn accepts_bind_and_udp_associate_commands_for_the_caller_to_reject() {
        let bind = [0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        let udp = [0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(parse_request(&bind).unwrap().cmd == CMD_BIND);
        assert!(parse_request(&udp).unwrap().cmd == CMD_UDP_ASSOCIATE);
    }

    #[test]
    fn rejects_bad_atyp() {
        let buf = [0x05, 0x01, 0x00, 0x02, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parse_request(&buf), Err(Error::BadAtyp(0x02))));
    }

    #[test]
    fn rejects_truncated_ipv4_request() {
        let buf = [0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        assert!(matches!(parse_request(&buf), Err(Error::ShortMessage)));
    }

    #[test]
    fn rejects_truncated_domain_length_byte() {
        let buf = [0x05, 0x01, 0x00, 0x03];
        assert!(matches!(parse_request(&buf), Err(Error::ShortMessage)));
    }

    #[test]
    fn domain_length_is_bounded_by_a_single_byte() {
        // A length-byte field width of one byte caps domains at 255;
        // anything the parser is handed beyond that it reads correctly
        // up to 255 because the length prefix itself cannot say more.
        let mut buf = vec![0x05, 0x01, 0x00, 0x03, 255u8];
        buf.extend(std::iter::repeat(b'a').take(255));
        buf.extend_from_slice(&80u16.to_be_bytes());
        let req = parse_request(&buf).unwrap();
        match req.dest {
            Destination::Domain(d) => assert_eq!(d.len(), 255),
            _ => panic!("expected domain"),
        }
    }

    #[test]
    fn reply_reflects_bound_address_family() {
        let mut out = BytesMut::new();
        encode_reply(REP_SUCCEEDED, "127.0.0.1:9090".parse().unwrap(), &mut out);
        assert_eq!(
            &out[..],
            &[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x23, 0x82][..]
        );
    }

    #[test]
    fn reply_reflects_ipv6_bound_address() {
        let mut out = BytesMut::new();
        encode_reply(REP_SUCCEEDED, "[::1]:9090".parse().unwrap(), &mut out);
        assert_eq!(out[3], ATYP_IPV6);
        assert_eq!(out.len(), 3 + 1 + 16 + 2);
    }

    #[tokio::test]
    async fn greeting_accepts_no_auth() {
        let mut reader = std::io::Cursor::new([0x05, 0x01, 0x00]);
        assert!(read_greeting(&mut reader).await.unwrap());
    }

    #[tokio::test]
    async fn greeting_rejects_without_no_auth() {
        let mut reader = std::io::Cursor::new([0x05, 0x02, 0x01, 0x02]);
        assert!(!read_greeting(&mut reader).await.unwrap());
    }
}
