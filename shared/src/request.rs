//! Request correlation over a fire-and-forget packet transport
//!
//! A [`Requester`] turns one-way packet sends into awaitable calls:
//! - A request id unique among live requests is reserved before the packet
//!   leaves, so an early response can never miss its slot
//! - Responses are matched by id and delivered exactly once
//! - A periodic sweep cancels requests that outlived their timeout; the
//!   waiting caller observes [`RequestError::Cancelled`]
//!
//! Sweep and delivery both remove entries through atomic map removal, so
//! whichever runs first wins and the other becomes a no-op.

use crate::error::{RequestError, TransportError};
use crate::packet::{Packet, Payload, Request, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Anything that can push packets toward a named destination
///
/// Implementations only enqueue; they must not block on the network.
pub trait PacketSink: Send + Sync {
    /// Whether `destination` is currently connected.
    fn is_reachable(&self, destination: &str) -> bool;

    fn send(&self, destination: &str, packet: Packet) -> Result<(), TransportError>;
}

struct PendingRequest {
    created_at: Instant,
    timeout: Duration,
    sender: oneshot::Sender<Response>,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.timeout
    }
}

/// Live set of outstanding requests
pub struct RequestTracker {
    pending: DashMap<u64, PendingRequest>,
    default_timeout: Duration,
}

impl RequestTracker {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Reserves a fresh request id and returns the receiving half of its
    /// completion channel.
    pub fn reserve(&self, timeout: Option<Duration>) -> (u64, oneshot::Receiver<Response>) {
        let (sender, receiver) = oneshot::channel();
        let pending = PendingRequest {
            created_at: Instant::now(),
            timeout: timeout.unwrap_or(self.default_timeout),
            sender,
        };

        loop {
            let request_id = rand::random::<u64>();
            if let Entry::Vacant(slot) = self.pending.entry(request_id) {
                slot.insert(pending);
                return (request_id, receiver);
            }
        }
    }

    /// Completes the matching request. Returns false for orphan responses.
    pub fn deliver(&self, request_id: u64, response: Response) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, pending)) => {
                // The caller may have stopped waiting; that is not an orphan
                let _ = pending.sender.send(response);
                true
            }
            None => false,
        }
    }

    /// Drops a pending request; the waiting caller sees a cancellation.
    pub fn cancel(&self, request_id: u64) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    pub fn cancel_all(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Cancels every request older than its timeout and returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            .filter(|request_id| {
                self.pending
                    .remove_if(request_id, |_, pending| pending.is_expired(now))
                    .is_some()
            })
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: u64) -> bool {
        self.pending.contains_key(&request_id)
    }
}

/// Issues correlated requests through a [`PacketSink`]
pub struct Requester {
    tracker: RequestTracker,
    sink: Arc<dyn PacketSink>,
}

impl Requester {
    pub fn new(sink: Arc<dyn PacketSink>, default_timeout: Duration) -> Self {
        Self {
            tracker: RequestTracker::new(default_timeout),
            sink,
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn sink(&self) -> &Arc<dyn PacketSink> {
        &self.sink
    }

    /// Sends `request` to `destination` and waits for the matching response.
    ///
    /// Fails immediately, without registering anything, if the destination
    /// is not reachable. A timeout surfaces as [`RequestError::Cancelled`].
    pub async fn request(
        &self,
        destination: &str,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Payload, RequestError> {
        if !self.sink.is_reachable(destination) {
            return Err(TransportError::UnknownDestination(destination.to_string()).into());
        }

        let kind = request.kind();
        let (request_id, receiver) = self.tracker.reserve(timeout);
        if let Err(e) = self.sink.send(destination, Packet::Request { request_id, request }) {
            self.tracker.cancel(request_id);
            return Err(e.into());
        }
        debug!("{} request {} sent to {}", kind, request_id, destination);

        match receiver.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(code)) => Err(RequestError::Rejected(code)),
            Err(_) => {
                debug!("{} request {} to {} cancelled", kind, request_id, destination);
                Err(RequestError::Cancelled)
            }
        }
    }

    /// Routes an incoming response to its waiting caller.
    pub fn deliver(&self, request_id: u64, response: Response) -> bool {
        let matched = self.tracker.deliver(request_id, response);
        if !matched {
            warn!("Ignoring response for unknown request {}", request_id);
        }
        matched
    }

    /// Spawns the periodic timeout sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, tick: Duration) -> JoinHandle<()> {
        let requester = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);

            loop {
                interval.tick().await;
                let removed = requester.tracker.sweep();
                if removed > 0 {
                    debug!("Cancelled {} timed out requests", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResponseCode;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Records sent packets; optionally answers requests inline.
    struct RecordingSink {
        reachable: bool,
        sent: Mutex<Vec<(String, Packet)>>,
    }

    impl RecordingSink {
        fn new(reachable: bool) -> Self {
            Self {
                reachable,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn last_request_id(&self) -> Option<u64> {
            let sent = self.sent.lock().unwrap();
            sent.iter().rev().find_map(|(_, packet)| match packet {
                Packet::Request { request_id, .. } => Some(*request_id),
                _ => None,
            })
        }
    }

    impl PacketSink for RecordingSink {
        fn is_reachable(&self, destination: &str) -> bool {
            self.reachable && destination == "lobby-1"
        }

        fn send(&self, destination: &str, packet: Packet) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((destination.to_string(), packet));
            Ok(())
        }
    }

    struct ClosedSink;

    impl PacketSink for ClosedSink {
        fn is_reachable(&self, _destination: &str) -> bool {
            true
        }

        fn send(&self, _destination: &str, _packet: Packet) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn request() -> Request {
        Request::GameShutdown { game_id: 1 }
    }

    #[test]
    fn test_reserve_generates_unique_ids() {
        let tracker = RequestTracker::new(Duration::from_secs(3));
        let mut ids = std::collections::HashSet::new();

        for _ in 0..1000 {
            let (id, _receiver) = tracker.reserve(None);
            assert!(ids.insert(id));
        }
        assert_eq!(tracker.pending_count(), 1000);
    }

    #[test]
    fn test_deliver_exactly_once() {
        let tracker = RequestTracker::new(Duration::from_secs(3));
        let (id, mut receiver) = tracker.reserve(None);

        assert!(tracker.deliver(id, Ok(Payload::Empty)));
        assert!(!tracker.deliver(id, Ok(Payload::Flag(true))));
        assert_eq!(receiver.try_recv().unwrap(), Ok(Payload::Empty));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_orphan_response_is_ignored() {
        let tracker = RequestTracker::new(Duration::from_secs(3));
        assert!(!tracker.deliver(12345, Ok(Payload::Empty)));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let tracker = RequestTracker::new(Duration::from_secs(3));
        let (expired, mut expired_rx) = tracker.reserve(Some(Duration::from_millis(0)));
        let (live, _live_rx) = tracker.reserve(None);

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(tracker.sweep(), 1);
        assert!(!tracker.is_pending(expired));
        assert!(tracker.is_pending(live));
        // Sender dropped: the caller sees a cancellation
        assert!(expired_rx.try_recv().is_err());
        // A late response after the sweep finds nothing
        assert!(!tracker.deliver(expired, Ok(Payload::Empty)));
    }

    #[tokio::test]
    async fn test_unreachable_destination_fails_immediately() {
        let requester = Requester::new(Arc::new(RecordingSink::new(true)), Duration::from_secs(3));

        let result = requester.request("unknown", request(), None).await;
        assert_eq!(
            result,
            Err(RequestError::Transport(TransportError::UnknownDestination(
                "unknown".into()
            )))
        );
        assert_eq!(requester.tracker().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_transport_releases_reservation() {
        let requester = Requester::new(Arc::new(ClosedSink), Duration::from_secs(3));

        let result = requester.request("lobby-1", request(), None).await;
        assert_eq!(result, Err(RequestError::Transport(TransportError::Closed)));
        assert_eq!(requester.tracker().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_resolves_on_delivery() {
        let sink = Arc::new(RecordingSink::new(true));
        let requester = Arc::new(Requester::new(sink.clone(), Duration::from_secs(3)));

        let caller = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.request("lobby-1", request(), None).await })
        };

        let request_id = loop {
            if let Some(id) = sink.last_request_id() {
                break id;
            }
            tokio::task::yield_now().await;
        };

        assert!(requester.deliver(request_id, Err(ResponseCode::NoFreeSlots)));
        let result = caller.await.unwrap();
        assert_eq!(result, Err(RequestError::Rejected(ResponseCode::NoFreeSlots)));
    }

    #[tokio::test]
    async fn test_timeout_cancels_request() {
        let sink = Arc::new(RecordingSink::new(true));
        let requester = Arc::new(Requester::new(sink, Duration::from_millis(20)));
        let sweeper = requester.spawn_sweeper(Duration::from_millis(5));

        let result = requester.request("lobby-1", request(), None).await;
        assert_err!(&result);
        assert_eq!(result, Err(RequestError::Cancelled));
        assert_eq!(requester.tracker().pending_count(), 0);

        sweeper.abort();
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let tracker = RequestTracker::new(Duration::from_secs(3));
        let (_, first) = tracker.reserve(None);
        let (_, second) = tracker.reserve(None);

        assert_eq!(tracker.cancel_all(), 2);
        assert_err!(first.await);
        assert_err!(second.await);

        let (id, receiver) = tracker.reserve(None);
        assert!(tracker.deliver(id, Ok(Payload::Id(3))));
        assert_ok!(receiver.await);
    }
}
