//! The requestor: owns one logical request/response exchange with a
//! single remote, across whichever transport the peer's policy selects.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::zonemaintenance::config::TransportStrategy;
use crate::zonemaintenance::wire;

//----------- Error -------------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Timeout,
    ConnectRefused,
    Wire(wire::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Timeout => f.write_str("timed out waiting for a response"),
            Error::ConnectRefused => f.write_str("connection refused"),
            Error::Wire(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => Error::ConnectRefused,
            ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(e),
        }
    }
}

impl From<wire::Error> for Error {
    fn from(e: wire::Error) -> Self {
        Error::Wire(e)
    }
}

//----------- Connection ------------------------------------------------------

/// One established byte-stream or datagram connection to a remote, opened
/// for the duration of a single attempt.
///
/// A requestor instance is used by exactly one attempt; it holds no state
/// shared with any other attempt, so concurrent attempts against different
/// remotes never contend on a single connection.
enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
    #[cfg(feature = "quic")]
    Quic(quinn::Connection),
}

pub struct Requestor {
    remote: SocketAddr,
    io_timeout: Duration,
    connection: Connection,
}

impl Requestor {
    /// Establish (or, for connectionless UDP, prepare) a connection to
    /// `remote` for a single attempt, per the transport strategy `remote`
    /// was configured with.
    ///
    /// `tls_config` supplies the trust anchors (pinned certificate, CA, or
    /// platform roots) a host wants to use for this peer; it is ignored for
    /// non-TLS strategies.
    pub async fn connect(
        remote: SocketAddr,
        strategy: TransportStrategy,
        io_timeout: Duration,
        #[cfg(feature = "tls")] tls_config: Option<std::sync::Arc<rustls::ClientConfig>>,
        #[cfg(feature = "tls")] tls_domain: Option<&str>,
    ) -> Result<Self, Error> {
        let connection = match strategy {
            TransportStrategy::Udp => {
                let local: SocketAddr = if remote.is_ipv4() {
                    "0.0.0.0:0".parse().unwrap()
                } else {
                    "[::]:0".parse().unwrap()
                };
                let socket = timeout(io_timeout, UdpSocket::bind(local))
                    .await
                    .map_err(|_| Error::Timeout)??;
                socket.connect(remote).await?;
                Connection::Udp(socket)
            }
            TransportStrategy::Tcp => {
                let stream = timeout(io_timeout, TcpStream::connect(remote))
                    .await
                    .map_err(|_| Error::Timeout)??;
                stream.set_nodelay(true).ok();
                Connection::Tcp(stream)
            }
            TransportStrategy::Tls => {
                #[cfg(feature = "tls")]
                {
                    let stream = timeout(io_timeout, TcpStream::connect(remote))
                        .await
                        .map_err(|_| Error::Timeout)??;
                    let config = tls_config.ok_or_else(|| {
                        Error::Io(std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "TLS transport requires a client config (trust anchors)",
                        ))
                    })?;
                    let connector = tokio_rustls::TlsConnector::from(config);
                    let domain = tls_domain
                        .and_then(|d| rustls::pki_types::ServerName::try_from(d.to_string()).ok())
                        .unwrap_or_else(|| {
                            rustls::pki_types::ServerName::IpAddress(remote.ip().into())
                        });
                    let stream = timeout(io_timeout, connector.connect(domain, stream))
                        .await
                        .map_err(|_| Error::Timeout)??;
                    Connection::Tls(stream)
                }
                #[cfg(not(feature = "tls"))]
                {
                    let _ = tls_domain;
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "TLS transport requested but the `tls` feature is not enabled",
                    )));
                }
            }
            #[cfg(feature = "quic")]
            TransportStrategy::Quic => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "QUIC session establishment is owned by the QUIC endpoint pool, not Requestor::connect",
                )));
            }
        };

        Ok(Self {
            remote,
            io_timeout,
            connection,
        })
    }

    /// Send one framed query and read one framed response, within the
    /// overall I/O timeout. For TCP/TLS/QUIC, frames are length-prefixed
    /// per RFC 1035 §4.2.2; UDP frames are unprefixed datagrams.
    pub async fn exchange(&mut self, query: &[u8]) -> Result<Vec<u8>, Error> {
        timeout(self.io_timeout, self.exchange_inner(query))
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn exchange_inner(&mut self, query: &[u8]) -> Result<Vec<u8>, Error> {
        match &mut self.connection {
            Connection::Udp(socket) => {
                socket.send(query).await?;
                let mut buf = vec![0u8; 4096];
                let n = socket.recv(&mut buf).await?;
                buf.truncate(n);
                Ok(buf)
            }
            Connection::Tcp(stream) => exchange_stream(stream, query).await,
            #[cfg(feature = "tls")]
            Connection::Tls(stream) => exchange_stream(stream, query).await,
            #[cfg(feature = "quic")]
            Connection::Quic(conn) => {
                let (mut send, mut recv) = conn
                    .open_bi()
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
                send.write_u16(query.len() as u16).await?;
                send.write_all(query).await?;
                send.finish().ok();
                let len = recv.read_u16().await?;
                let mut buf = vec![0u8; len as usize];
                recv.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    /// Read the next message of a multi-message streamed reply (AXFR/IXFR
    /// over TCP/TLS/QUIC); returns `None` once the peer closes cleanly.
    pub async fn read_next(&mut self) -> Result<Option<Vec<u8>>, Error> {
        timeout(self.io_timeout, self.read_next_inner())
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn read_next_inner(&mut self) -> Result<Option<Vec<u8>>, Error> {
        match &mut self.connection {
            Connection::Tcp(stream) => read_next_stream(stream).await,
            #[cfg(feature = "tls")]
            Connection::Tls(stream) => read_next_stream(stream).await,
            #[cfg(feature = "quic")]
            Connection::Quic(_) => Ok(None),
            Connection::Udp(_) => {
                debug!("AXFR/IXFR over UDP is not meaningful; treat as a single-message reply");
                Ok(None)
            }
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Wrap an already-established QUIC connection (handed out by the
    /// endpoint pool that owns session-ticket resumption) for one attempt.
    #[cfg(feature = "quic")]
    pub fn from_quic_connection(conn: quinn::Connection, io_timeout: Duration) -> Self {
        let remote = conn.remote_address();
        Self {
            remote,
            io_timeout,
            connection: Connection::Quic(conn),
        }
    }
}

async fn exchange_stream<S>(stream: &mut S, query: &[u8]) -> Result<Vec<u8>, Error>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.write_u16(query.len() as u16).await?;
    stream.write_all(query).await?;
    read_next_stream(stream)
        .await?
        .ok_or_else(|| Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before a response was received",
        )))
}

async fn read_next_stream<S>(stream: &mut S) -> Result<Option<Vec<u8>>, Error>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

#[allow(dead_code)]
fn log_fallback_reason(remote: SocketAddr, err: &Error) {
    warn!(%remote, %err, "attempt failed, considering fallback");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket as TokioUdpSocket};

    fn io_timeout() -> Duration {
        Duration::from_secs(2)
    }

    #[cfg(feature = "tls")]
    async fn connect_plain(remote: SocketAddr, strategy: TransportStrategy) -> Result<Requestor, Error> {
        Requestor::connect(remote, strategy, io_timeout(), None, None).await
    }

    #[cfg(not(feature = "tls"))]
    async fn connect_plain(remote: SocketAddr, strategy: TransportStrategy) -> Result<Requestor, Error> {
        Requestor::connect(remote, strategy, io_timeout()).await
    }

    #[tokio::test]
    async fn tcp_exchange_round_trips_one_length_prefixed_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let query = read_next_stream(&mut stream).await.unwrap().unwrap();
            assert_eq!(query, b"query");
            stream.write_u16(8).await.unwrap();
            stream.write_all(b"response").await.unwrap();
        });

        let mut conn = connect_plain(addr, TransportStrategy::Tcp).await.unwrap();
        let response = conn.exchange(b"query").await.unwrap();
        assert_eq!(response, b"response");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_read_next_returns_none_on_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
        });

        let mut conn = connect_plain(addr, TransportStrategy::Tcp).await.unwrap();
        assert_eq!(conn.read_next().await.unwrap(), None);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_read_next_streams_further_transfer_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_next_stream(&mut stream).await.unwrap().unwrap();
            stream.write_u16(5).await.unwrap();
            stream.write_all(b"first").await.unwrap();
            stream.write_u16(6).await.unwrap();
            stream.write_all(b"second").await.unwrap();
        });

        let mut conn = connect_plain(addr, TransportStrategy::Tcp).await.unwrap();
        let _ = conn.exchange(b"ixfr").await.unwrap();
        assert_eq!(conn.read_next().await.unwrap(), Some(b"second".to_vec()));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn udp_exchange_round_trips_one_datagram() {
        let server = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..n], peer).await.unwrap();
        });

        let mut conn = connect_plain(addr, TransportStrategy::Udp).await.unwrap();
        let response = conn.exchange(b"soa query").await.unwrap();
        assert_eq!(response, b"soa query");

        task.await.unwrap();
    }

    #[tokio::test]
    async fn udp_read_next_is_always_none() {
        let server = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let mut conn = connect_plain(addr, TransportStrategy::Udp).await.unwrap();
        assert_eq!(conn.read_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn connect_refused_maps_to_connect_refused_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_plain(addr, TransportStrategy::Tcp).await.unwrap_err();
        assert!(matches!(err, Error::ConnectRefused));
    }
}
