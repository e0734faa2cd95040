//! Latest-frame store with push notifications.

use crate::dsp::scale::FrequencyScale;
use async_channel::{Receiver as AsyncReceiver, Sender as AsyncSender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, trace};

/// One published spectrum. An empty magnitude array marks a reset.
#[derive(Debug, Clone)]
pub struct SpectralData {
    magnitudes: Arc<[f32]>,
    timestamp: Instant,
    scale: FrequencyScale,
    sequence: u64,
}

impl SpectralData {
    /// Normalized magnitudes, `N / 2 + 1` values in `[0, 1]`.
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// When the underlying window finished filling (or when the reset happened).
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn scale(&self) -> FrequencyScale {
        self.scale
    }

    /// Publication order, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Runs notification jobs on a caller-chosen execution context (e.g. a UI thread).
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Box<dyn FnOnce() + Send>);
}

type Callback = Arc<dyn Fn(Arc<SpectralData>) + Send + Sync>;

enum Target {
    Inline(Callback),
    Dispatched {
        dispatcher: Arc<dyn Dispatcher>,
        callback: Callback,
    },
    Stream(AsyncSender<Arc<SpectralData>>),
}

impl Target {
    /// Returns `false` once the receiving end is gone.
    fn deliver(&self, data: Arc<SpectralData>) -> bool {
        match self {
            Self::Inline(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                    error!("[publisher] subscriber callback panicked");
                }
                true
            }
            Self::Dispatched {
                dispatcher,
                callback,
            } => {
                let callback = Arc::clone(callback);
                dispatcher.dispatch(Box::new(move || callback(data)));
                true
            }
            Self::Stream(sender) => sender.force_send(data).is_ok(),
        }
    }

    fn close(&self) {
        if let Self::Stream(sender) = self {
            sender.close();
        }
    }
}

#[derive(Default)]
struct Mailbox {
    pending: Option<Arc<SpectralData>>,
    delivered: u64,
    delivering: bool,
}

/// One subscriber plus its delivery state. Frames reach the target in
/// sequence order and a frame older than one already delivered is dropped.
struct Subscription {
    id: SubscriptionId,
    target: Target,
    mailbox: Mutex<Mailbox>,
}

impl Subscription {
    /// Hands `data` to the target, or parks it for the thread already
    /// delivering so re-entrant publishes never wait on a callback.
    fn offer(&self, data: &Arc<SpectralData>, closed: &AtomicBool) -> bool {
        let mut mailbox = self.mailbox.lock();
        let newest = mailbox
            .pending
            .as_ref()
            .map_or(mailbox.delivered, |pending| pending.sequence);
        if data.sequence <= newest {
            trace!(
                "[publisher] subscriber {:?} already has sequence {newest}",
                self.id
            );
            return true;
        }
        mailbox.pending = Some(Arc::clone(data));
        if mailbox.delivering {
            return true;
        }

        mailbox.delivering = true;
        let mut connected = true;
        while let Some(next) = mailbox.pending.take() {
            if closed.load(Ordering::Acquire) {
                break;
            }
            mailbox.delivered = next.sequence;
            connected = MutexGuard::unlocked(&mut mailbox, || self.target.deliver(next));
            if !connected {
                mailbox.pending = None;
                break;
            }
        }
        mailbox.delivering = false;
        connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct SpectralPublisher {
    current: RwLock<Option<Arc<SpectralData>>>,
    subscribers: Mutex<Vec<Arc<Subscription>>>,
    next_subscription: AtomicU64,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl Default for SpectralPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralPublisher {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> Option<Arc<SpectralData>> {
        self.current.read().clone()
    }

    /// Publishes a computed frame unless a newer one (or a reset) is already held.
    pub fn publish(
        &self,
        magnitudes: Vec<f32>,
        captured_at: Instant,
        scale: FrequencyScale,
    ) -> Option<Arc<SpectralData>> {
        self.swap_in(magnitudes, captured_at, scale)
    }

    /// Publishes an empty frame so consumers drop stale visuals immediately.
    pub fn reset(&self, scale: FrequencyScale) -> Option<Arc<SpectralData>> {
        self.reset_at(scale, Instant::now())
    }

    /// Like [`reset`](Self::reset), invalidating every frame captured before `at`.
    pub fn reset_at(&self, scale: FrequencyScale, at: Instant) -> Option<Arc<SpectralData>> {
        self.swap_in(Vec::new(), at, scale)
    }

    fn swap_in(
        &self,
        magnitudes: Vec<f32>,
        timestamp: Instant,
        scale: FrequencyScale,
    ) -> Option<Arc<SpectralData>> {
        let data = {
            let mut current = self.current.write();
            if self.is_closed() {
                return None;
            }
            if let Some(held) = current.as_ref()
                && timestamp < held.timestamp
            {
                trace!("[publisher] skipping frame older than sequence {}", held.sequence);
                return None;
            }
            let data = Arc::new(SpectralData {
                magnitudes: Arc::from(magnitudes),
                timestamp,
                scale,
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            });
            *current = Some(Arc::clone(&data));
            data
        };

        self.notify(&data);
        Some(data)
    }

    fn notify(&self, data: &Arc<SpectralData>) {
        let subscribers: Vec<_> = self.subscribers.lock().clone();
        let mut disconnected = Vec::new();

        for subscription in subscribers {
            if !subscription.offer(data, &self.closed) {
                disconnected.push(subscription.id);
            }
        }

        if !disconnected.is_empty() {
            debug!("[publisher] pruning {} closed streams", disconnected.len());
            self.subscribers
                .lock()
                .retain(|subscription| !disconnected.contains(&subscription.id));
        }
    }

    fn add(&self, target: Target) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.lock();
        if self.is_closed() {
            target.close();
            return id;
        }
        subscribers.push(Arc::new(Subscription {
            id,
            target,
            mailbox: Mutex::new(Mailbox::default()),
        }));
        id
    }

    /// Calls `callback` on the publishing thread for every new frame.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<SpectralData>) + Send + Sync + 'static,
    {
        self.add(Target::Inline(Arc::new(callback)))
    }

    /// Calls `callback` through `dispatcher` for every new frame.
    pub fn subscribe_dispatched<F>(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(Arc<SpectralData>) + Send + Sync + 'static,
    {
        self.add(Target::Dispatched {
            dispatcher,
            callback: Arc::new(callback),
        })
    }

    /// Async stream of frames; a lagging reader loses the oldest queued frames.
    pub fn stream(&self, capacity: usize) -> AsyncReceiver<Arc<SpectralData>> {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        self.add(Target::Stream(sender));
        receiver
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|subscription| subscription.id != id);
        subscribers.len() != before
    }

    /// Stops publishing and ends all streams. The last frame stays readable.
    /// Nothing is swapped in once this returns, and undelivered frames are dropped.
    pub fn close(&self) {
        {
            let _current = self.current.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        for subscription in self.subscribers.lock().drain(..) {
            subscription.target.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl fmt::Debug for SpectralPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralPublisher")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
