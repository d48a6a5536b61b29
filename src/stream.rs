//! Plain TCP and TLS sockets unified behind one `Stream` type so the
//! Connection Manager's read/write loop is written once (SPEC_FULL.md
//! §4.2). Grounded in `libtiny_client::stream`, updated to current
//! `tokio-rustls`/`rustls-native-certs` APIs.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use once_cell::sync::OnceCell;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use tokio_rustls::client::TlsStream;
#[cfg(feature = "tls-rustls")]
use tokio_rustls::rustls::pki_types::ServerName;

/// Boxed to keep the enum's size small and uniform across variants: a
/// bare `TlsStream` is much larger than a bare `TcpStream`, and an
/// unboxed enum pays the larger variant's size for both.
pub(crate) enum Stream {
    Tcp(Box<TcpStream>),
    #[cfg(feature = "tls-rustls")]
    Tls(Box<TlsStream<TcpStream>>),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum StreamError {
    #[cfg(feature = "tls-rustls")]
    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "tls-rustls")]
    #[error("invalid server name: {0:?}")]
    InvalidServerName(String),
}

#[cfg(feature = "tls-rustls")]
fn tls_connector() -> &'static tokio_rustls::TlsConnector {
    static CONNECTOR: OnceCell<tokio_rustls::TlsConnector> = OnceCell::new();
    CONNECTOR.get_or_init(|| {
        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().expect("failed to load native certs") {
            let _ = roots.add(cert);
        }
        let config = tokio_rustls::rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tokio_rustls::TlsConnector::from(Arc::new(config))
    })
}

impl Stream {
    pub(crate) async fn new_tcp(addr: SocketAddr) -> Result<Stream, StreamError> {
        Ok(Stream::Tcp(Box::new(TcpStream::connect(addr).await?)))
    }

    #[cfg(feature = "tls-rustls")]
    pub(crate) async fn new_tls(addr: SocketAddr, host_name: &str) -> Result<Stream, StreamError> {
        let tcp_stream = TcpStream::connect(addr).await?;
        let name = ServerName::try_from(host_name.to_owned())
            .map_err(|_| StreamError::InvalidServerName(host_name.to_owned()))?;
        let tls_stream = tls_connector().connect(name, tcp_stream).await?;
        Ok(Stream::Tls(Box::new(tls_stream)))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<std::io::Result<()>> {
        match *self {
            Stream::Tcp(ref mut s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls-rustls")]
            Stream::Tls(ref mut s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match *self {
            Stream::Tcp(ref mut s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls-rustls")]
            Stream::Tls(ref mut s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<std::io::Result<()>> {
        match *self {
            Stream::Tcp(ref mut s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls-rustls")]
            Stream::Tls(ref mut s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<std::io::Result<()>> {
        match *self {
            Stream::Tcp(ref mut s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls-rustls")]
            Stream::Tls(ref mut s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
