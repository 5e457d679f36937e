use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::endpoint::ServiceEndpoint;
use crate::message::StatusMessage;

enum ReporterConn {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ReporterConn {
    fn uri(&self) -> String {
        match self {
            ReporterConn::Tcp(stream) => stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            #[cfg(unix)]
            ReporterConn::Unix(_) => "unix".to_string(),
        }
    }

    async fn write_all(&mut self, frame: &[u8]) -> std::io::Result<()> {
        match self {
            ReporterConn::Tcp(stream) => stream.write_all(frame).await,
            #[cfg(unix)]
            ReporterConn::Unix(stream) => stream.write_all(frame).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            ReporterConn::Tcp(stream) => stream.shutdown().await,
            #[cfg(unix)]
            ReporterConn::Unix(stream) => stream.shutdown().await,
        }
    }
}

/// Client side of the status wire protocol.
///
/// Holds one connection per configured status service and writes every
/// record to all of them. An endpoint that cannot be reached, or that fails
/// mid-run, is logged and dropped; reporting to the remaining endpoints
/// continues.
pub struct StatusReporter {
    conns: Vec<ReporterConn>,
}

impl StatusReporter {
    /// Connects to every endpoint in `status_services`.
    pub async fn connect(status_services: &[String]) -> Self {
        let mut conns = Vec::with_capacity(status_services.len());
        for uri in status_services {
            match Self::connect_one(uri).await {
                Ok(conn) => conns.push(conn),
                Err(err) => {
                    tracing::warn!("could not reach status service {uri}: {err}");
                }
            }
        }
        Self { conns }
    }

    async fn connect_one(uri: &str) -> std::io::Result<ReporterConn> {
        match ServiceEndpoint::parse(uri) {
            ServiceEndpoint::Tcp(addr) => Ok(ReporterConn::Tcp(TcpStream::connect(addr).await?)),
            #[cfg(unix)]
            ServiceEndpoint::Unix(path) => {
                Ok(ReporterConn::Unix(UnixStream::connect(path).await?))
            }
            #[cfg(not(unix))]
            ServiceEndpoint::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "filesystem sockets are not available on this platform",
            )),
        }
    }

    /// True when no endpoint is left to report to.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Writes one record, as a single newline-terminated frame, to every
    /// live endpoint.
    pub async fn send(&mut self, msg: &StatusMessage) -> anyhow::Result<()> {
        let frame = msg.encode()?;
        let mut live = Vec::with_capacity(self.conns.len());
        for mut conn in self.conns.drain(..) {
            match conn.write_all(frame.as_bytes()).await {
                Ok(()) => live.push(conn),
                Err(err) => {
                    tracing::warn!("dropping status service {}: {err}", conn.uri());
                }
            }
        }
        self.conns = live;
        Ok(())
    }

    /// Flushes and closes every connection.
    pub async fn close(mut self) {
        for conn in &mut self.conns {
            let _ = conn.shutdown().await;
        }
    }
}
