use crate::error::LocationError;
use crate::tracker::{LiveDistanceTracker, Position, PositionUpdate, PositionWatch, TrackerStatus, WatchOptions};
use crate::types::GeoPoint;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::Sender;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

/// What the browser sends: either a position or a geolocation error.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientMessage {
    Failure {
        error: LocationError,
    },
    Position {
        latitude: f64,
        longitude: f64,
        /// Milliseconds since the epoch; browsers may send fractions.
        timestamp: Option<f64>,
    },
}

pub fn route(options: WatchOptions) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("track")
        .and(warp::query::<GeoPoint>())
        .and(warp::ws())
        .map(move |reference: GeoPoint, ws: Ws| {
            if !reference.is_valid() {
                return warp::reply::with_status("invalid reference point", StatusCode::BAD_REQUEST)
                    .into_response();
            }
            ws.on_upgrade(move |socket| track(socket, reference, options))
                .into_response()
        })
}

async fn track(socket: WebSocket, reference: GeoPoint, options: WatchOptions) {
    info!("Tracking session started at {:?}", reference);
    let (mut ws_write, ws_read) = socket.split();
    if let Err(e) = ws_write.send(Message::text(watch_message(&options).to_string())).await {
        error!("Error sending watch options: {}", e);
        return;
    }

    let watch = PositionWatch::spawn(16, move |tx| forward_positions(ws_read, tx));
    let (tracker, mut statuses) = LiveDistanceTracker::new(reference, &options);
    let tracker_future = tracker.run(watch, futures::future::pending());
    // Drains whatever the tracker queued, even after it has finished.
    let status_future = async move {
        while let Some(status) = statuses.recv().await {
            if let Err(e) = ws_write.send(Message::text(status_message(&status).to_string())).await {
                error!("Error sending tracker status: {}", e);
                return;
            }
        }
        info!("Tracking session ended");
    };
    futures::join!(tracker_future, status_future);
}

/// Producer side of the position watch: turns socket messages into updates.
async fn forward_positions(mut ws_read: SplitStream<WebSocket>, tx: Sender<PositionUpdate>) {
    while let Some(message_result) = ws_read.next().await {
        let message = match message_result {
            Ok(message) => message,
            Err(e) => {
                error!("Websocket error: {}", e);
                break;
            }
        };
        if message.is_close() {
            debug!("Websocket close message");
            break;
        }
        let text = match message.to_str() {
            Ok(text) => text,
            Err(()) => {
                debug!("Ignoring websocket message: {:?}", message);
                continue;
            }
        };
        match parse_update(text) {
            Ok(update) => {
                if tx.send(update).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring malformed position message {:?}: {}", text, e),
        }
    }
}

fn parse_update(text: &str) -> Result<PositionUpdate, serde_json::Error> {
    Ok(match serde_json::from_str(text)? {
        ClientMessage::Failure { error } => Err(error),
        ClientMessage::Position {
            latitude,
            longitude,
            timestamp,
        } => Ok(Position {
            point: GeoPoint {
                latitude,
                longitude,
            },
            timestamp_ms: timestamp.map(|t| t.max(0.0) as u64).unwrap_or_else(now_ms),
        }),
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn watch_message(options: &WatchOptions) -> Value {
    json!({
        "type": "watch",
        "enable_high_accuracy": options.enable_high_accuracy,
        "maximum_age_ms": options.maximum_age.as_millis() as u64,
        "timeout_ms": options.timeout.as_millis() as u64,
    })
}

fn status_message(status: &TrackerStatus) -> Value {
    let mut value = match serde_json::to_value(status) {
        Ok(value) => value,
        Err(e) => {
            error!("Unable to serialize tracker status {:?}: {}", status, e);
            return json!({ "status": "unavailable" });
        }
    };
    if let TrackerStatus::Unavailable { reason } = status {
        value["message"] = json!(reason.user_message());
    }
    value
}
