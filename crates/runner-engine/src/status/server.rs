use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use taskforge_core::endpoint::ServiceEndpoint;
use taskforge_core::message::StatusMessage;

use crate::status::repo::StatusRepo;

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Accepts status-reporting connections and feeds decoded records into the
/// repository.
///
/// Frames are newline-delimited JSON. A malformed or rejected frame is
/// logged and skipped; the connection stays open. A partial frame at EOF is
/// discarded. The server never acknowledges.
pub(crate) struct StatusServer {
    listener: Listener,
    uri: String,
    repo: Arc<StatusRepo>,
}

impl StatusServer {
    /// Binds the endpoint described by `uri`: `HOST:PORT` for TCP, a
    /// filesystem path otherwise. The bound URI is re-derived from the
    /// socket, so a TCP port of 0 yields the actual port.
    pub(crate) async fn bind(uri: &str, repo: Arc<StatusRepo>) -> anyhow::Result<Self> {
        match ServiceEndpoint::parse(uri) {
            ServiceEndpoint::Tcp(addr) => {
                let listener = TcpListener::bind(&addr).await?;
                let uri = listener.local_addr()?.to_string();
                Ok(Self {
                    listener: Listener::Tcp(listener),
                    uri,
                    repo,
                })
            }
            #[cfg(unix)]
            ServiceEndpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                let listener = UnixListener::bind(&path)?;
                Ok(Self {
                    listener: Listener::Unix(listener),
                    uri: path.to_string_lossy().into_owned(),
                    repo,
                })
            }
            #[cfg(not(unix))]
            ServiceEndpoint::Unix(_) => {
                anyhow::bail!("filesystem sockets are not available on this platform")
            }
        }
    }

    /// The URI tasks should report to.
    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    /// Moves the server onto the runtime.
    pub(crate) fn start(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(serve(self.listener, self.repo, shutdown_rx));
        ServerHandle { shutdown_tx, join }
    }
}

/// Handle to a running status server.
pub(crate) struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting and drains in-flight connections, so records already
    /// on the wire land in the repository before collation reads it.
    pub(crate) async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(grace, self.join).await.is_err() {
            tracing::debug!("status server did not drain within {grace:?}");
        }
    }
}

async fn serve(listener: Listener, repo: Arc<StatusRepo>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = accept(&listener) => match accepted {
                Ok(stream) => {
                    let repo = repo.clone();
                    match stream {
                        Stream::Tcp(stream) => {
                            connections.spawn(handle_connection(stream, repo));
                        }
                        #[cfg(unix)]
                        Stream::Unix(stream) => {
                            connections.spawn(handle_connection(stream, repo));
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("status server accept failed: {err}");
                }
            },
        }
    }
    while connections.join_next().await.is_some() {}
}

enum Stream {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

async fn accept(listener: &Listener) -> std::io::Result<Stream> {
    match listener {
        Listener::Tcp(listener) => listener.accept().await.map(|(s, _)| Stream::Tcp(s)),
        #[cfg(unix)]
        Listener::Unix(listener) => listener.accept().await.map(|(s, _)| Stream::Unix(s)),
    }
}

async fn handle_connection<S: AsyncRead + Unpin>(stream: S, repo: Arc<StatusRepo>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if !line.ends_with('\n') {
                    // Partial frame at EOF.
                    break;
                }
                let frame = line.trim();
                if frame.is_empty() {
                    continue;
                }
                match StatusMessage::decode(frame) {
                    Ok(msg) => {
                        if let Err(err) = repo.process_message(msg) {
                            tracing::warn!("dropping status message: {err}");
                        }
                    }
                    Err(err) => {
                        tracing::warn!("skipping malformed status frame: {err}");
                    }
                }
            }
            Err(err) => {
                tracing::debug!("status connection error: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncWriteExt;
    use tokio::sync::broadcast;

    use taskforge_core::message::TestResult;

    fn repo() -> Arc<StatusRepo> {
        let (tx, _rx) = broadcast::channel(64);
        Arc::new(StatusRepo::new(tx))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ingests_over_a_filesystem_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.sock");
        let repo = repo();
        let server = StatusServer::bind(&path.to_string_lossy(), repo.clone())
            .await
            .unwrap();
        let uri = server.uri().to_string();
        let handle = server.start();

        let mut client = tokio::net::UnixStream::connect(&uri).await.unwrap();
        client
            .write_all(b"{\"id\": \"1-foo\", \"status\": \"finished\", \"result\": \"pass\", \"time\": 1.0}\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        settle().await;

        assert_eq!(
            repo.get_latest_task_data("1-foo")
                .unwrap()
                .parsed_result(),
            Some(TestResult::Pass)
        );
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn bad_frames_do_not_poison_the_connection() {
        let repo = repo();
        let server = StatusServer::bind("127.0.0.1:0", repo.clone()).await.unwrap();
        let uri = server.uri().to_string();
        let handle = server.start();

        let mut client = tokio::net::TcpStream::connect(&uri).await.unwrap();
        // Malformed JSON, then a record the repository rejects, then a good
        // one, then a partial frame cut off by EOF.
        client.write_all(b"this is not json\n").await.unwrap();
        client
            .write_all(b"{\"status\": \"running\", \"time\": 1.0}\n")
            .await
            .unwrap();
        client
            .write_all(b"{\"id\": \"1-x\", \"status\": \"running\", \"time\": 2.0}\n")
            .await
            .unwrap();
        client
            .write_all(b"{\"id\": \"1-x\", \"status\": \"finis")
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        settle().await;

        let records = repo.get_task_data("1-x").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(repo.get_task_status("1-x").as_deref(), Some("running"));
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn concurrent_clients_are_all_ingested() {
        let repo = repo();
        let server = StatusServer::bind("127.0.0.1:0", repo.clone()).await.unwrap();
        let uri = server.uri().to_string();
        let handle = server.start();

        let mut clients = JoinSet::new();
        for i in 0..10 {
            let uri = uri.clone();
            clients.spawn(async move {
                let mut client = tokio::net::TcpStream::connect(&uri).await.unwrap();
                let frame = format!(
                    "{{\"id\": \"task-{i}\", \"status\": \"finished\", \"result\": \"pass\", \"time\": 1.0}}\n"
                );
                client.write_all(frame.as_bytes()).await.unwrap();
                client.shutdown().await.unwrap();
            });
        }
        while clients.join_next().await.is_some() {}
        settle().await;

        assert_eq!(repo.result_stats()[&TestResult::Pass], 10);
        handle.shutdown(Duration::from_secs(1)).await;
    }
}
