//! Websocket transport with keepalive and an idle deadline.
//!
//! A `WsConnection` is used for the subscribe phase, then handed to
//! `run_reader`, which moves the socket into a dedicated task. The task
//! forwards text frames over a bounded channel, pings the server on a fixed
//! cadence and fails once nothing at all has arrived for `idle_timeout`.

use connector_core::ConnectorError;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Frames buffered between the reader task and the session.
const FRAME_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket connections to one endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a connection. The TCP, TLS and websocket handshakes together are
    /// bounded by the connect timeout.
    pub async fn connect(&self) -> Result<WsConnection, ConnectorError> {
        match tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _response))) => {
                debug!(url = %self.url, "WebSocket handshake complete");
                Ok(WsConnection { stream })
            }
            Ok(Err(e)) => Err(ConnectorError::Connect(e.to_string())),
            Err(_) => Err(ConnectorError::Connect(format!(
                "connection timeout after {:?}",
                self.connect_timeout
            ))),
        }
    }
}

/// An open connection that has not started reading yet.
pub struct WsConnection {
    stream: WsStream,
}

impl WsConnection {
    /// Send one text frame.
    pub async fn send(&mut self, text: String) -> Result<(), ConnectorError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ConnectorError::WebSocket(e.to_string()))
    }

    /// Close the connection without reading further.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }

    /// Start the reader task.
    pub fn run_reader(self, idle_timeout: Duration, ping_interval: Duration) -> FrameReader {
        let (frames_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(read_loop(
            self.stream,
            frames_tx,
            stop_rx,
            idle_timeout,
            ping_interval,
        ));

        FrameReader {
            frames,
            stop_tx: Some(stop_tx),
            handle,
        }
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection").finish_non_exhaustive()
    }
}

/// Receiving end of a running reader task.
///
/// `recv` yields frames until the task ends. After `stop`, frames already
/// buffered are still yielded, then `recv` returns `None`.
pub struct FrameReader {
    frames: mpsc::Receiver<String>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ConnectorError>>,
}

impl FrameReader {
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Ask the reader task to close the socket. Does not wait.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the task and wait for it to exit.
    ///
    /// Returns why the reader ended: `Ok` after a requested stop, the
    /// transport error otherwise.
    pub async fn finish(mut self) -> Result<(), ConnectorError> {
        self.stop();
        // Unblock a task waiting on a full buffer
        self.frames.close();
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(ConnectorError::WebSocket(format!("reader task failed: {}", e))),
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_loop(
    stream: WsStream,
    frames_tx: mpsc::Sender<String>,
    mut stop_rx: oneshot::Receiver<()>,
    idle_timeout: Duration,
    ping_interval: Duration,
) -> Result<(), ConnectorError> {
    let (mut write, mut read) = stream.split();

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            // A dropped sender counts as a stop request too
            _ = &mut stop_rx => {
                debug!("Reader stop requested, closing connection");
                let _ = write.close().await;
                return Ok(());
            }

            _ = &mut idle => {
                warn!(idle_secs = idle_timeout.as_secs_f64(), "No traffic within idle timeout");
                let _ = write.close().await;
                return Err(ConnectorError::WebSocket(format!(
                    "no traffic for {:?}",
                    idle_timeout
                )));
            }

            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return Err(ConnectorError::WebSocket(e.to_string()));
                }
            }

            msg_opt = read.next() => {
                let msg = match msg_opt {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Err(ConnectorError::WebSocket(e.to_string())),
                    None => {
                        return Err(ConnectorError::WebSocket("stream ended".to_string()));
                    }
                };

                // Any inbound frame, pongs included, proves liveness
                idle.as_mut().reset(Instant::now() + idle_timeout);

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Message::Ping(data) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return Err(ConnectorError::WebSocket(e.to_string()));
                        }
                        continue;
                    }
                    Message::Close(frame) => {
                        info!(frame = ?frame, "WebSocket closed by server");
                        return Err(ConnectorError::WebSocket("closed by server".to_string()));
                    }
                    Message::Pong(_) | Message::Frame(_) => continue,
                };

                if frames_tx.send(text).await.is_err() {
                    // Receiver gone, nobody to deliver to
                    let _ = write.close().await;
                    return Ok(());
                }

                // Time spent blocked on a full queue is not silence on the socket
                idle.as_mut().reset(Instant::now() + idle_timeout);
            }
        }
    }
}
