use super::broadcaster::{Subscription, SubscriptionFilter};
use super::dto::ProgressQuery;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

/// Live conversion progress
/// Pushes `{"jobId", "progress"}` frames; `progress` is a percentage or the
/// final "Complete" / "Error". Messages sent by the client are ignored.
#[utoipa::path(
    get,
    path = "/api/v1/ws/progress",
    params(ProgressQuery),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 400, description = "Malformed jobId")
    ),
    tag = "Progress"
)]
pub async fn progress_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<ProgressQuery>,
    State(state): State<AppState>,
) -> Response {
    let filter = query
        .job_id
        .map_or(SubscriptionFilter::AllJobs, SubscriptionFilter::Job);

    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: SubscriptionFilter) {
    let broadcaster = state.orchestrator.broadcaster().clone();
    let subscription = broadcaster.subscribe(filter);
    let id = subscription.id();
    info!("🔌 Progress socket {} connected ({:?})", id, filter);

    let (ws_tx, ws_rx) = socket.split();
    relay_progress(subscription, filter, ws_tx, ws_rx).await;

    broadcaster.unsubscribe(id);
    info!("🔌 Progress socket {} closed", id);
}

/// Forwards events to `sink` until the client leaves, the broadcaster drops
/// the subscription, or the watched job reaches a terminal event.
async fn relay_progress<S, R, E>(
    mut subscription: Subscription,
    filter: SubscriptionFilter,
    mut sink: S,
    mut incoming: R,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    debug!("Progress subscription {} dropped by broadcaster", subscription.id());
                    break;
                };
                let payload = match serde_json::to_string(&event.frame()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to encode progress frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(payload.into())).await {
                    debug!("Progress socket send failed: {}", e);
                    break;
                }
                if event.is_terminal() && filter == SubscriptionFilter::Job(event.job_id) {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}
