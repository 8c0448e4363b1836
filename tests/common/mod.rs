//! Fake SOCKS5 proxy serving canned HTTP responses.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_native_tls::TlsAcceptor;

type Handler = dyn Fn(usize, &str) -> Vec<u8> + Send + Sync;

/// What the fake proxy saw on one connection.
#[derive(Debug, Clone)]
pub struct Seen {
    /// CONNECT destination as `host:port`.
    pub target: String,
    /// Raw request head, empty when CONNECT or the TLS handshake failed.
    pub request: String,
}

pub struct FakeSocks {
    pub port: u16,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl FakeSocks {
    /// Accept CONNECT and answer the n-th request with `handler(n, request)`.
    pub async fn spawn<F>(handler: F) -> Self
    where
        F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::spawn_with_reply(0x00, handler).await
    }

    /// Answer every CONNECT with reply code `rep`.
    pub async fn spawn_with_reply<F>(rep: u8, handler: F) -> Self
    where
        F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::start(rep, None, handler).await
    }

    /// Terminate TLS inside the tunnel with the self-signed `example.com` identity.
    pub async fn spawn_tls<F>(handler: F) -> Self
    where
        F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
    {
        let identity = native_tls::Identity::from_pkcs8(
            include_bytes!("../data/example.com.crt"),
            include_bytes!("../data/example.com.key"),
        )
        .unwrap();
        let acceptor = native_tls::TlsAcceptor::new(identity).unwrap();
        Self::start(0x00, Some(TlsAcceptor::from(acceptor)), handler).await
    }

    async fn start<F>(rep: u8, tls: Option<TlsAcceptor>, handler: F) -> Self
    where
        F: Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((socket, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                let handler = Arc::clone(&handler);
                let tls = tls.clone();
                let n = index;
                index += 1;
                tokio::spawn(async move {
                    let _ = serve(socket, n, rep, tls, log, handler).await;
                });
            }
        });

        Self { port, seen }
    }

    pub fn connections(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    index: usize,
    rep: u8,
    tls: Option<TlsAcceptor>,
    log: Arc<Mutex<Vec<Seen>>>,
    handler: Arc<Handler>,
) -> std::io::Result<()> {
    let mut greeting = [0u8; 3];
    socket.read_exact(&mut greeting).await?;
    socket.write_all(&[5, 0]).await?;

    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await?;
    let host = match header[3] {
        1 => {
            let mut ip = [0u8; 4];
            socket.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        4 => {
            let mut ip = [0u8; 16];
            socket.read_exact(&mut ip).await?;
            format!("[{}]", std::net::Ipv6Addr::from(ip))
        }
        _ => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            socket.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).to_string()
        }
    };
    let mut port = [0u8; 2];
    socket.read_exact(&mut port).await?;
    let target = format!("{}:{}", host, u16::from_be_bytes(port));

    if rep != 0 {
        log.lock().unwrap().push(Seen {
            target,
            request: String::new(),
        });
        socket.write_all(&[5, rep, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        return socket.shutdown().await;
    }
    socket.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0x1f, 0x90]).await?;

    match tls {
        Some(acceptor) => match acceptor.accept(socket).await {
            Ok(stream) => answer(stream, index, target, log, handler).await,
            Err(_) => {
                log.lock().unwrap().push(Seen {
                    target,
                    request: String::new(),
                });
                Ok(())
            }
        },
        None => answer(socket, index, target, log, handler).await,
    }
}

async fn answer<S>(
    mut socket: S,
    index: usize,
    target: String,
    log: Arc<Mutex<Vec<Seen>>>,
    handler: Arc<Handler>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }
    let request = String::from_utf8_lossy(&request).to_string();
    log.lock().unwrap().push(Seen {
        target,
        request: request.clone(),
    });

    socket.write_all(&handler(index, &request)).await?;
    socket.shutdown().await
}

/// A complete response with `Content-Length`.
pub fn http_response(status_line: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("{status_line}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn redirect(location: &str) -> Vec<u8> {
    http_response("HTTP/1.1 302 Found", &[("Location", location)], b"")
}
