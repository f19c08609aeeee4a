use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use sync_core::{
    ConnectionSignal, ConnectionState, ConnectionStateMachine, EventKind, OutboundEnvelope,
    ReconnectPolicy, SyncError, SyncErrorCategory, router::decode_frame,
};
use sync_platform::TokenSource;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{engine::EngineInput, intents::now_ms};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub(crate) struct TransportConfig {
    pub(crate) url: Url,
    pub(crate) user_id: String,
    pub(crate) tokens: Arc<dyn TokenSource>,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) handshake_timeout: Duration,
}

/// Configured socket URL with `userId=<id>` appended to the query.
pub(crate) fn socket_url(ws_url: &str, user_id: &str) -> Result<Url, SyncError> {
    let mut url = Url::parse(ws_url).map_err(|err| {
        SyncError::new(
            SyncErrorCategory::Config,
            "invalid_ws_url",
            format!("invalid websocket url '{ws_url}': {err}"),
        )
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SyncError::new(
            SyncErrorCategory::Config,
            "invalid_ws_url",
            format!("websocket url must use ws:// or wss://, got '{ws_url}'"),
        ));
    }
    url.query_pairs_mut().append_pair("userId", user_id);
    Ok(url)
}

/// Why a connected session ended.
enum SessionEnd {
    Cancelled,
    Lost(String),
    /// The engine dropped the intent queue.
    EngineGone,
}

/// One duplex push-channel connection with bounded fixed-interval reconnect.
pub(crate) struct Transport {
    config: TransportConfig,
    machine: ConnectionStateMachine,
    input_tx: mpsc::Sender<EngineInput>,
    intent_rx: mpsc::Receiver<OutboundEnvelope>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Transport {
    pub(crate) fn new(
        config: TransportConfig,
        input_tx: mpsc::Sender<EngineInput>,
        intent_rx: mpsc::Receiver<OutboundEnvelope>,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            machine: ConnectionStateMachine::default(),
            input_tx,
            intent_rx,
            state_tx,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.signal(ConnectionSignal::Dial).await.is_err() {
                break;
            }

            let end = match self.connect().await {
                Ok(socket) => {
                    let _ = self.signal(ConnectionSignal::SocketOpened).await;
                    match self.authenticate(socket).await {
                        Ok(socket) => {
                            attempt = 0;
                            let _ = self.signal(ConnectionSignal::HandshakeAccepted).await;
                            info!(url = %redacted(&self.config.url), "push channel connected");
                            self.session(socket).await
                        }
                        Err(end) => end,
                    }
                }
                Err(end) => end,
            };

            match end {
                SessionEnd::Cancelled | SessionEnd::EngineGone => break,
                SessionEnd::Lost(reason) => {
                    warn!(%reason, attempt, "push channel lost");
                    self.drop_queued_intents().await;
                    let _ = self.signal(ConnectionSignal::ConnectionLost).await;
                }
            }

            let Some(delay) = self.config.reconnect.delay_for_attempt(attempt) else {
                warn!(
                    attempts = self.config.reconnect.max_attempts(),
                    "reconnect attempts exhausted"
                );
                let _ = self.signal(ConnectionSignal::RetriesExhausted).await;
                return;
            };
            attempt = attempt.saturating_add(1);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = self.signal(ConnectionSignal::Teardown).await;
        debug!("push channel closed");
    }

    async fn connect(&self) -> Result<Socket, SessionEnd> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionEnd::Cancelled),
            result = connect_async(self.config.url.as_str()) => result
                .map(|(socket, _)| socket)
                .map_err(|err| SessionEnd::Lost(format!("connect failed: {err}"))),
        }
    }

    /// Send the auth frame and wait for the server's `connect` event.
    async fn authenticate(&self, mut socket: Socket) -> Result<Socket, SessionEnd> {
        let token = self
            .config
            .tokens
            .token()
            .map_err(|err| SessionEnd::Lost(format!("no token for handshake: {err}")))?;
        let auth = OutboundEnvelope {
            event: EventKind::Auth,
            payload: serde_json::json!({ "userId": self.config.user_id, "token": token }),
            timestamp: now_ms(),
        };
        let frame = serde_json::to_string(&auth)
            .map_err(|err| SessionEnd::Lost(format!("auth frame encode failed: {err}")))?;
        socket
            .send(Message::Text(frame))
            .await
            .map_err(|err| SessionEnd::Lost(format!("auth frame send failed: {err}")))?;

        let wait_for_connect = async {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if is_event(&text, EventKind::Connect) {
                            return Ok(());
                        }
                        // Events that race the ack are still delivered in order.
                        self.forward(text).await?;
                    }
                    Ok(Message::Close(_)) => {
                        return Err(SessionEnd::Lost("closed during handshake".to_owned()));
                    }
                    Ok(_) => {}
                    Err(err) => return Err(SessionEnd::Lost(format!("handshake read failed: {err}"))),
                }
            }
            Err(SessionEnd::Lost("stream ended during handshake".to_owned()))
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionEnd::Cancelled),
            result = tokio::time::timeout(self.config.handshake_timeout, wait_for_connect) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SessionEnd::Lost("handshake timed out".to_owned())),
                }
            }
        };
        outcome.map(|()| socket)
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let disconnect = is_event(&text, EventKind::Disconnect);
                        if let Err(end) = self.forward(text).await {
                            return end;
                        }
                        // The server is done with this session; reconnect so
                        // the intent gate and the store agree.
                        if disconnect {
                            let _ = sink.send(Message::Close(None)).await;
                            return SessionEnd::Lost("server sent disconnect".to_owned());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Lost(format!("server closed connection: {frame:?}"));
                    }
                    Some(Ok(other)) => trace!(?other, "ignoring non-text frame"),
                    Some(Err(err)) => return SessionEnd::Lost(format!("read failed: {err}")),
                    None => return SessionEnd::Lost("stream ended".to_owned()),
                },
                outbound = self.intent_rx.recv() => {
                    let Some(envelope) = outbound else {
                        return SessionEnd::EngineGone;
                    };
                    let frame = match serde_json::to_string(&envelope) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(event = %envelope.event, error = %err, "dropping unencodable intent");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        self.report_dropped(vec![envelope]).await;
                        return SessionEnd::Lost(format!("write failed: {err}"));
                    }
                }
            }
        }
    }

    async fn forward(&self, text: String) -> Result<(), SessionEnd> {
        self.input_tx
            .send(EngineInput::Frame(text))
            .await
            .map_err(|_| SessionEnd::EngineGone)
    }

    /// Intents queued for a connection that is gone are not replayed.
    async fn drop_queued_intents(&mut self) {
        let mut dropped = Vec::new();
        while let Ok(envelope) = self.intent_rx.try_recv() {
            dropped.push(envelope);
        }
        if !dropped.is_empty() {
            self.report_dropped(dropped).await;
        }
    }

    async fn report_dropped(&self, envelopes: Vec<OutboundEnvelope>) {
        warn!(count = envelopes.len(), "outbound intents dropped with the connection");
        let client_txn_ids: Vec<String> = envelopes
            .iter()
            .filter(|envelope| envelope.event == EventKind::Message)
            .filter_map(|envelope| envelope.payload.get("clientTxnId")?.as_str().map(str::to_owned))
            .collect();
        let _ = self
            .input_tx
            .send(EngineInput::SendsDropped { client_txn_ids })
            .await;
    }

    async fn signal(&mut self, signal: ConnectionSignal) -> Result<ConnectionState, SyncError> {
        let state = self.machine.apply(signal).inspect_err(|err| {
            warn!(?signal, code = %err.code, "rejected connection transition");
        })?;
        self.state_tx.send_replace(state);
        let _ = self.input_tx.send(EngineInput::Connection(state)).await;
        Ok(state)
    }
}

fn is_event(text: &str, kind: EventKind) -> bool {
    decode_frame(text).is_ok_and(|envelope| envelope.event == kind.as_str())
}

/// URL for logs, without the query string.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_user_id_to_socket_url() {
        let url = socket_url("ws://localhost:8080/ws", "u 1").expect("valid url");
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?userId=u+1");

        let with_query = socket_url("wss://chat.example/ws?v=2", "u1").expect("valid url");
        assert_eq!(with_query.as_str(), "wss://chat.example/ws?v=2&userId=u1");
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let err = socket_url("https://chat.example/ws", "u1").expect_err("https is not a socket url");
        assert_eq!(err.code, "invalid_ws_url");
        assert_eq!(err.category, SyncErrorCategory::Config);

        assert!(socket_url("not a url", "u1").is_err());
    }

    #[test]
    fn recognizes_control_frames() {
        let disconnect = r#"{"event":"disconnect","payload":{},"timestamp":1}"#;
        assert!(is_event(disconnect, EventKind::Disconnect));
        assert!(!is_event(disconnect, EventKind::Connect));
        assert!(!is_event("not json", EventKind::Disconnect));
    }

    #[test]
    fn redacts_query_for_logs() {
        let url = socket_url("ws://localhost:8080/ws", "secret-user").expect("valid url");
        assert_eq!(redacted(&url), "ws://localhost:8080/ws");
    }
}
