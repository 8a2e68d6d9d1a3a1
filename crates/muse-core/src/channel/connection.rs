use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::frames::{parse_frame, Handshake, InboundEvent};
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening, or waiting out the reconnect delay
    Connecting,
    /// Handshake sent; frames are flowing
    Ready,
    /// Not started, or shut down
    Closed,
}

/// Receives every recognized inbound frame, in arrival order.
pub type EventHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub url: String,
    pub listen_as: String,
    pub reconnect: ReconnectPolicy,
    pub ready_poll_interval: Duration,
}

impl ChannelOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            url: config.channel_url.clone(),
            listen_as: config.listen_as.clone(),
            reconnect: config.reconnect,
            ready_poll_interval: config.ready_poll_interval(),
        }
    }
}

enum SessionEnd {
    Closed,
    Shutdown,
}

/// Owns the session's single live channel and its reconnect loop.
///
/// The channel task holds the socket; it drops the socket before sleeping,
/// so at most one connection exists at a time.
pub struct ConnectionManager {
    options: ChannelOptions,
    handler: Option<EventHandler>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(options: ChannelOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            options,
            handler: None,
            state_tx,
            shutdown_tx,
            task: None,
        }
    }

    /// Register the frame dispatcher. Takes effect on the next `connect`.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
    }

    /// Start the channel task. Returns false if it is already running.
    pub fn connect(&mut self) -> bool {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }
        let handler = match &self.handler {
            Some(handler) => handler.clone(),
            None => {
                let noop: EventHandler = Arc::new(|_event| {});
                noop
            }
        };
        self.shutdown_tx.send_replace(false);
        self.state_tx.send_replace(ConnectionState::Connecting);

        let options = self.options.clone();
        let state_tx = self.state_tx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.task = Some(tokio::spawn(run_channel(options, handler, state_tx, shutdown_rx)));
        true
    }

    /// Resolve once the channel is open and registered.
    pub async fn wait_ready(&self) -> SyncResult<()> {
        let mut ticker = tokio::time::interval(self.options.ready_poll_interval);
        loop {
            ticker.tick().await;
            match self.state() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Closed => return Err(SyncError::ChannelDisconnected),
                ConnectionState::Connecting => {}
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// Close the channel and cancel any pending reconnect.
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "channel task ended abnormally");
            }
        }
        self.state_tx.send_replace(ConnectionState::Closed);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_channel(
    options: ChannelOptions,
    handler: EventHandler,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }
        state_tx.send_replace(ConnectionState::Connecting);

        let mut handshaken = false;
        let outcome = run_session(&options, &handler, &state_tx, &mut shutdown_rx, &mut handshaken).await;
        if handshaken {
            attempt = 0;
        }
        match outcome {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Closed) => info!(url = %options.url, "channel closed"),
            Err(e) => warn!(url = %options.url, error = %e, "channel failed"),
        }

        state_tx.send_replace(ConnectionState::Connecting);
        let delay = options.reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, attempt, "scheduling reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
    state_tx.send_replace(ConnectionState::Closed);
    info!("channel task stopped");
}

async fn run_session(
    options: &ChannelOptions,
    handler: &EventHandler,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &mut watch::Receiver<bool>,
    handshaken: &mut bool,
) -> SyncResult<SessionEnd> {
    let (mut ws, _) = tokio::select! {
        result = connect_async(options.url.as_str()) => result?,
        _ = shutdown_rx.changed() => return Ok(SessionEnd::Shutdown),
    };

    let handshake = Handshake::new(options.listen_as.clone()).to_json()?;
    ws.send(WsMessage::text(handshake)).await?;
    *handshaken = true;
    state_tx.send_replace(ConnectionState::Ready);
    info!(url = %options.url, listen_as = %options.listen_as, "channel ready");

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => dispatch(handler, text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    // Force the close so the reconnect path takes over.
                    let _ = ws.close(None).await;
                    return Err(e.into());
                }
            },
            _ = shutdown_rx.changed() => {
                let _ = ws.close(None).await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

fn dispatch(handler: &EventHandler, text: &str) {
    match parse_frame(text) {
        Ok(Some(event)) => handler(event),
        Ok(None) => debug!("ignoring unrecognized frame"),
        Err(e) => warn!(error = %e, "dropping malformed frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    const WAIT: Duration = Duration::from_secs(5);

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn read_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }

    fn options(url: String, delay: Duration) -> ChannelOptions {
        ChannelOptions {
            url,
            listen_as: "frontend".to_string(),
            reconnect: ReconnectPolicy::fixed(delay),
            ready_poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_handshake_sent_before_ready() {
        let (listener, url) = bind().await;
        let mut manager = ConnectionManager::new(options(url, Duration::from_millis(50)));
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.connect());
        assert!(!manager.connect());

        let mut server = accept(&listener).await;
        assert_eq!(read_text(&mut server).await, r#"{"listen_as":"frontend"}"#);
        timeout(WAIT, manager.wait_ready()).await.unwrap().unwrap();
        assert!(!manager.is_connecting());

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_frames_dispatched_in_order_skipping_unknown_and_malformed() {
        let (listener, url) = bind().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = ConnectionManager::new(options(url, Duration::from_millis(50)));
        manager.on_event(move |event| {
            let _ = tx.send(event);
        });
        manager.connect();

        let mut server = accept(&listener).await;
        read_text(&mut server).await;
        for frame in [
            r#"{"type":"typing"}"#,
            "{broken",
            r#"{"type":"motd_update","message":"hello all"}"#,
            r#"{"type":"muse_message","message_id":"m-1","message":"hi","role":"assistant"}"#,
        ] {
            server.send(WsMessage::text(frame)).await.unwrap();
        }

        let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, InboundEvent::Motd("hello all".to_string()));
        let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, InboundEvent::Message(ref f) if f.message_id == "m-1"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_close_and_resends_handshake() {
        let (listener, url) = bind().await;
        let mut manager = ConnectionManager::new(options(url, Duration::from_millis(50)));
        let mut state = manager.subscribe();
        manager.connect();

        let mut first = accept(&listener).await;
        read_text(&mut first).await;
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .unwrap()
            .unwrap();

        first.close(None).await.unwrap();
        drop(first);
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connecting))
            .await
            .unwrap()
            .unwrap();
        assert!(manager.is_connecting());

        let mut second = accept(&listener).await;
        assert_eq!(read_text(&mut second).await, r#"{"listen_as":"frontend"}"#);
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .unwrap()
            .unwrap();

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_transport_error_closes_and_reconnects() {
        use tokio::io::AsyncWriteExt;

        let (listener, url) = bind().await;
        let mut manager = ConnectionManager::new(options(url, Duration::from_millis(50)));
        let mut state = manager.subscribe();
        manager.connect();

        let mut first = accept(&listener).await;
        read_text(&mut first).await;
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .unwrap()
            .unwrap();

        // Reserved header bits set: a protocol violation, not a close frame
        first.get_mut().write_all(&[0xFF, 0x00]).await.unwrap();
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connecting))
            .await
            .unwrap()
            .unwrap();
        drop(first);

        let mut second = accept(&listener).await;
        assert_eq!(read_text(&mut second).await, r#"{"listen_as":"frontend"}"#);
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .unwrap()
            .unwrap();

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_reconnect() {
        let (listener, url) = bind().await;
        let mut manager = ConnectionManager::new(options(url, Duration::from_secs(30)));
        let mut state = manager.subscribe();
        manager.connect();

        let mut server = accept(&listener).await;
        read_text(&mut server).await;
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .unwrap()
            .unwrap();
        server.close(None).await.unwrap();
        drop(server);
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connecting))
            .await
            .unwrap()
            .unwrap();

        timeout(Duration::from_secs(1), manager.shutdown()).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_wait_ready_fails_when_never_started() {
        let manager = ConnectionManager::new(options("ws://127.0.0.1:9".to_string(), Duration::from_millis(10)));
        assert!(matches!(
            manager.wait_ready().await,
            Err(SyncError::ChannelDisconnected)
        ));
    }
}
