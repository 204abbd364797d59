//! One open socket: outbound queue, heartbeat and inbound decoding.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vigil_core::Envelope;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a session loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Cancelled by the manager (manual disconnect or forced reconnect).
    Cancelled,
    /// The peer closed the socket or the stream ended.
    Closed {
        /// Close-frame reason, if any.
        reason: Option<String>,
    },
    /// A read or write failed.
    Failed {
        /// Transport message.
        reason: String,
    },
}

impl SessionEnd {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Cancelled => "cancelled".to_string(),
            Self::Closed { reason: Some(r) } if !r.is_empty() => format!("closed by server: {r}"),
            Self::Closed { .. } => "closed by server".to_string(),
            Self::Failed { reason } => reason.clone(),
        }
    }
}

/// Drive one socket until it closes, fails or `cancel` fires.
///
/// - Queued outbound text frames are written in order.
/// - A `ping` envelope goes out every `heartbeat`; the first one a full
///   interval after open. No reply is awaited.
/// - Inbound text frames are decoded and handed to `on_envelope`; frames that
///   fail to decode are logged and dropped.
#[tracing::instrument(skip_all, name = "ws_session", fields(generation = generation))]
pub(crate) async fn run_session(
    ws: WsStream,
    mut outbound: mpsc::Receiver<String>,
    heartbeat: Duration,
    cancel: CancellationToken,
    generation: u64,
    on_envelope: impl Fn(Envelope),
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ticker = time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break SessionEnd::Cancelled;
            }
            out = outbound.recv() => {
                // The manager holds the sender for the session's lifetime.
                let Some(text) = out else { break SessionEnd::Cancelled };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    break SessionEnd::Failed { reason: e.to_string() };
                }
            }
            _ = ticker.tick() => {
                let ping = match Envelope::ping().encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode heartbeat");
                        continue;
                    }
                };
                trace!("heartbeat ping");
                if let Err(e) = ws_tx.send(Message::Text(ping.into())).await {
                    break SessionEnd::Failed { reason: e.to_string() };
                }
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => match Envelope::decode(&text) {
                    Ok(envelope) => {
                        trace!(event_type = %envelope.event_type, "inbound envelope");
                        on_envelope(envelope);
                    }
                    Err(e) => {
                        warn!(error = %e, frame_len = text.len(), "dropping malformed frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    break SessionEnd::Closed {
                        reason: frame.map(|f| f.reason.as_str().to_owned()),
                    };
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break SessionEnd::Failed { reason: e.to_string() },
                None => break SessionEnd::Closed { reason: None },
            },
        }
    };

    info!(generation, end = %end.describe(), "socket session ended");
    end
}
