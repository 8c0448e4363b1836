//! SOCKS5 client handshake (RFC 1928), no-auth method and CONNECT only.

use crate::error::{ReplyError, Result, SocksError};

use log::debug;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NO_AUTH: u8 = 0x00;
const AUTH_NO_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const RESERVED: u8 = 0x00;
const REPLY_SUCCEEDED: u8 = 0x00;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Destination of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Host name resolved by the proxy.
    Domain(String),
    /// Address resolved locally.
    Ip(IpAddr),
}

/// Offer the no-auth method and check the server accepts it.
pub async fn negotiate_auth<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS5_VERSION, 0x01, AUTH_NO_AUTH])
        .await?;
    stream.flush().await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;

    if response[0] != SOCKS5_VERSION {
        return Err(SocksError::InvalidVersion(response[0]).into());
    }
    match response[1] {
        AUTH_NO_AUTH => Ok(()),
        AUTH_NO_ACCEPTABLE => Err(SocksError::NoAcceptableAuth.into()),
        other => Err(SocksError::UnsupportedAuth(other).into()),
    }
}

/// Encode `[VER, CMD, RSV, ATYP, DST.ADDR, DST.PORT]`.
pub fn encode_connect_request(
    target: &TargetAddr,
    port: u16,
) -> std::result::Result<Vec<u8>, SocksError> {
    let mut request = Vec::with_capacity(22);
    request.extend_from_slice(&[SOCKS5_VERSION, CMD_CONNECT, RESERVED]);

    match target {
        TargetAddr::Domain(host) => {
            let host = host.as_bytes();
            if host.len() > 255 {
                return Err(SocksError::DomainTooLong(host.len()));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host);
        }
        TargetAddr::Ip(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        TargetAddr::Ip(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
    }

    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// Send CONNECT and consume the full reply, bound address included.
pub async fn connect<S>(stream: &mut S, target: &TargetAddr, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = encode_connect_request(target, port)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(SocksError::InvalidVersion(header[0]).into());
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(SocksError::Reply(ReplyError::from_code(header[1])).into());
    }

    // BND.ADDR and BND.PORT are unused but must be drained.
    let addr_len = match header[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => return Err(SocksError::InvalidAddressType(other).into()),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    debug!("SOCKS5 CONNECT to {:?}:{} established", target, port);
    Ok(())
}
