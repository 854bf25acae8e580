use crate::distance::haversine;
use crate::error::LocationError;
use crate::types::GeoPoint;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// Statuses queued for the client before the tracker waits on it.
const STATUS_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub point: GeoPoint,
    /// Milliseconds since the epoch, as reported by the device.
    pub timestamp_ms: u64,
}

pub type PositionUpdate = Result<Position, LocationError>;

/// Hints passed to whatever produces positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub enable_high_accuracy: bool,
    /// Oldest cached position the device may hand out.
    pub maximum_age: Duration,
    /// How long to wait for a position before reporting a timeout.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            enable_high_accuracy: true,
            maximum_age: Duration::from_millis(1000),
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Receiving side of a position watch. Dropping it runs the release hook,
/// which is how the underlying watch is stopped.
pub struct PositionWatch {
    updates: mpsc::Receiver<PositionUpdate>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PositionWatch {
    pub fn new<F>(updates: mpsc::Receiver<PositionUpdate>, release: F) -> PositionWatch
    where
        F: FnOnce() + Send + 'static,
    {
        PositionWatch {
            updates,
            release: Some(Box::new(release)),
        }
    }

    /// Runs `producer` as its own task feeding the watch; releasing the
    /// watch aborts the task.
    pub fn spawn<F, Fut>(buffer: usize, producer: F) -> PositionWatch
    where
        F: FnOnce(mpsc::Sender<PositionUpdate>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer);
        let task = tokio::spawn(producer(tx));
        PositionWatch::new(rx, move || task.abort())
    }

    pub async fn next(&mut self) -> Option<PositionUpdate> {
        self.updates.recv().await
    }
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        self.updates.close();
        if let Some(release) = self.release.take() {
            debug!("Releasing position watch");
            release();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackerStatus {
    /// No position received yet.
    Waiting,
    Tracking {
        current: GeoPoint,
        distance_m: f64,
        timestamp_ms: u64,
    },
    Unavailable {
        reason: LocationError,
    },
}

/// The fixed point a photo was taken at and the latest known position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSession {
    reference: GeoPoint,
    current: Option<Position>,
}

impl TrackingSession {
    pub fn new(reference: GeoPoint) -> TrackingSession {
        TrackingSession {
            reference,
            current: None,
        }
    }

    pub fn reference(&self) -> GeoPoint {
        self.reference
    }

    pub fn current(&self) -> Option<Position> {
        self.current
    }
}

/// Recomputes the distance to a reference point for each position update.
/// Every status change is queued on the channel returned by `new`, starting
/// with `Waiting`, and the channel closes once `run` returns.
pub struct LiveDistanceTracker {
    session: TrackingSession,
    timeout: Duration,
    last: Option<TrackerStatus>,
    status: mpsc::Sender<TrackerStatus>,
}

impl LiveDistanceTracker {
    pub fn new(
        reference: GeoPoint,
        options: &WatchOptions,
    ) -> (LiveDistanceTracker, mpsc::Receiver<TrackerStatus>) {
        let (status, rx) = mpsc::channel(STATUS_BUFFER);
        let tracker = LiveDistanceTracker {
            session: TrackingSession::new(reference),
            timeout: options.timeout,
            last: None,
            status,
        };
        (tracker, rx)
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    /// Folds one update into the session. Returns `None` when the update is
    /// older than the current position and was ignored.
    pub fn apply(&mut self, update: PositionUpdate) -> Option<TrackerStatus> {
        let position = match update {
            Ok(position) => position,
            Err(reason) => {
                warn!("Location unavailable: {}", reason);
                return Some(TrackerStatus::Unavailable { reason });
            }
        };
        if !position.point.is_valid() {
            warn!("Ignoring invalid position {:?}", position.point);
            return Some(TrackerStatus::Unavailable {
                reason: LocationError::PositionUnavailable,
            });
        }
        if let Some(current) = self.session.current {
            if position.timestamp_ms < current.timestamp_ms {
                debug!(
                    "Ignoring stale position from {} (have {})",
                    position.timestamp_ms, current.timestamp_ms
                );
                return None;
            }
        }

        self.session.current = Some(position);
        let distance_m = haversine(self.session.reference, position.point);
        debug!("Distance from reference: {:.2} m", distance_m);
        Some(TrackerStatus::Tracking {
            current: position.point,
            distance_m,
            timestamp_ms: position.timestamp_ms,
        })
    }

    /// Queues `next` unless it repeats the last status. Returns `false` once
    /// nobody is listening.
    async fn publish(&mut self, next: TrackerStatus) -> bool {
        if self.last == Some(next) {
            return true;
        }
        self.last = Some(next);
        self.status.send(next).await.is_ok()
    }

    /// Consumes `watch` until it ends, `shutdown` resolves or the status
    /// receiver is dropped. The watch is released on return, and also if this
    /// future is dropped early.
    pub async fn run<S>(mut self, mut watch: PositionWatch, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!("Tracking distance from {:?}", self.session.reference);
        tokio::pin!(shutdown);
        let mut listening = self.publish(TrackerStatus::Waiting).await;
        while listening {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Tracking session shut down");
                    break;
                }
                next = tokio::time::timeout(self.timeout, watch.next()) => match next {
                    Ok(Some(update)) => {
                        if let Some(status) = self.apply(update) {
                            listening = self.publish(status).await;
                        }
                    }
                    Ok(None) => {
                        info!("Position stream ended");
                        break;
                    }
                    Err(_) => {
                        warn!("No position within {:?}", self.timeout);
                        listening = self
                            .publish(TrackerStatus::Unavailable {
                                reason: LocationError::Timeout,
                            })
                            .await;
                    }
                }
            }
        }
        if !listening {
            info!("Status listener went away");
        }
        let session = self.session();
        info!(
            "Stopped tracking from {:?}, last position {:?}",
            session.reference(),
            session.current().map(|p| p.point)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    const REFERENCE: GeoPoint = GeoPoint {
        latitude: 55.7558,
        longitude: 37.6173,
    };

    fn at(latitude: f64, longitude: f64, timestamp_ms: u64) -> PositionUpdate {
        Ok(Position {
            point: GeoPoint {
                latitude,
                longitude,
            },
            timestamp_ms,
        })
    }

    fn counting_watch(buffer: usize) -> (mpsc::Sender<PositionUpdate>, PositionWatch, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(buffer);
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let watch = PositionWatch::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (tx, watch, released)
    }

    fn distance(status: Option<TrackerStatus>) -> f64 {
        match status {
            Some(TrackerStatus::Tracking { distance_m, .. }) => distance_m,
            other => panic!("expected tracking, got {:?}", other),
        }
    }

    #[test]
    fn recomputes_distance_on_each_update() {
        let (mut tracker, _rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        assert_eq!(distance(tracker.apply(at(55.7558, 37.6173, 1))), 0.0);

        // 0.001 degrees of latitude is about 111 m.
        let d = distance(tracker.apply(at(55.7568, 37.6173, 2)));
        assert!((d - 111.19).abs() < 0.5, "got {}", d);
        assert_eq!(tracker.session().current().unwrap().timestamp_ms, 2);
        assert_eq!(tracker.session().reference(), REFERENCE);
    }

    #[test]
    fn stale_updates_are_ignored() {
        let (mut tracker, _rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        tracker.apply(at(55.76, 37.62, 100));
        assert_eq!(tracker.apply(at(10.0, 10.0, 50)), None);
        assert_eq!(tracker.session().current().unwrap().timestamp_ms, 100);
        // Same timestamp is not stale.
        assert!(tracker.apply(at(55.77, 37.62, 100)).is_some());
    }

    #[test]
    fn errors_surface_as_unavailable_and_recover() {
        let (mut tracker, _rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        assert_eq!(
            tracker.apply(Err(LocationError::PermissionDenied)),
            Some(TrackerStatus::Unavailable {
                reason: LocationError::PermissionDenied
            })
        );
        assert_eq!(
            tracker.apply(at(123.0, 0.0, 1)),
            Some(TrackerStatus::Unavailable {
                reason: LocationError::PositionUnavailable
            })
        );
        assert!(distance(tracker.apply(at(55.76, 37.62, 2))) > 0.0);
    }

    #[tokio::test]
    async fn run_delivers_every_transition_and_releases_watch() {
        let (tracker, mut rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        let (tx, watch, released) = counting_watch(8);
        tx.send(at(55.7568, 37.6173, 1)).await.unwrap();
        // Unavailable followed straight away by a fix must not be collapsed.
        tx.send(Err(LocationError::PositionUnavailable)).await.unwrap();
        tx.send(at(55.7558, 37.6173, 2)).await.unwrap();
        drop(tx);

        // The tracker finishes before anything is read; nothing is lost.
        tracker.run(watch, futures::future::pending()).await;
        assert_eq!(rx.recv().await, Some(TrackerStatus::Waiting));
        assert!(distance(rx.recv().await) > 100.0);
        assert_eq!(
            rx.recv().await,
            Some(TrackerStatus::Unavailable {
                reason: LocationError::PositionUnavailable
            })
        );
        match rx.recv().await {
            Some(TrackerStatus::Tracking { distance_m, timestamp_ms, .. }) => {
                assert_eq!(distance_m, 0.0);
                assert_eq!(timestamp_ms, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.recv().await, None);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_statuses_are_sent_once() {
        let (tracker, mut rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        let (tx, watch, _released) = counting_watch(8);
        tx.send(Err(LocationError::PermissionDenied)).await.unwrap();
        tx.send(Err(LocationError::PermissionDenied)).await.unwrap();
        drop(tx);

        tracker.run(watch, futures::future::pending()).await;
        assert_eq!(rx.recv().await, Some(TrackerStatus::Waiting));
        assert_eq!(
            rx.recv().await,
            Some(TrackerStatus::Unavailable {
                reason: LocationError::PermissionDenied
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_the_status_receiver_stops_the_tracker() {
        let (tracker, rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        let (_tx, watch, released) = counting_watch(1);
        drop(rx);

        tracker.run(watch, futures::future::pending()).await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_consuming_and_releases() {
        let (tracker, _rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        let (tx, watch, released) = counting_watch(8);
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(tracker.run(watch, async {
            let _ = stopped.await;
        }));

        stop.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.send(at(0.0, 0.0, 1)).await.is_err());
    }

    #[tokio::test]
    async fn silence_reports_timeout() {
        let options = WatchOptions {
            timeout: Duration::from_millis(30),
            ..WatchOptions::default()
        };
        let (tracker, mut rx) = LiveDistanceTracker::new(REFERENCE, &options);
        let (_tx, watch, _released) = counting_watch(1);
        let task = tokio::spawn(tracker.run(watch, futures::future::pending()));

        assert_eq!(rx.recv().await, Some(TrackerStatus::Waiting));
        assert_eq!(
            rx.recv().await,
            Some(TrackerStatus::Unavailable {
                reason: LocationError::Timeout
            })
        );
        task.abort();
    }

    #[tokio::test]
    async fn aborting_the_tracker_task_releases_the_watch() {
        let (tracker, _rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        let (_tx, watch, released) = counting_watch(1);
        let task = tokio::spawn(tracker.run(watch, futures::future::pending()));
        tokio::task::yield_now().await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawned_producer_is_aborted_on_release() {
        let (tracker, mut rx) = LiveDistanceTracker::new(REFERENCE, &WatchOptions::default());
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let watch = PositionWatch::spawn(4, |tx| async move {
            let _guard = done_tx;
            let _ = tx.send(at(55.7568, 37.6173, 1)).await;
            futures::future::pending::<()>().await;
        });
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(tracker.run(watch, async {
            let _ = stopped.await;
        }));

        assert_eq!(rx.recv().await, Some(TrackerStatus::Waiting));
        assert!(matches!(rx.recv().await, Some(TrackerStatus::Tracking { .. })));
        stop.send(()).unwrap();
        task.await.unwrap();
        // The producer held `done_tx`; aborting it drops the sender.
        assert!(done_rx.await.is_err());
    }
}
