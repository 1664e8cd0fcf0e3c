//! The realtime bus.
//!
//! One background task owns the connection. It reads frames, turns them
//! into [`RealtimeEvent`]s and hands them to [`RealtimeBus::dispatch`], and
//! it reconnects with backoff whenever the connection drops or the channel
//! set grows. Application code only talks to the bus through `subscribe`,
//! the returned [`SubscriptionHandle`], and the state watch.

use crate::backoff::BackoffPolicy;
use crate::error::{RealtimeError, RealtimeResult};
use crate::message::RawRealtimeMessage;
use crate::transport::{RealtimeConnection, RealtimeTransport};
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tablekit_cache::CacheStore;
use tablekit_types::{
    DocumentEvent, DocumentId, EventKind, RealtimeEvent, SubscriptionId, TableId,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection lifecycle, observable through [`RealtimeBus::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Not connected yet.
    Idle,
    Connecting,
    Connected,
    /// Waiting to retry after a drop or a failed attempt.
    Reconnecting { attempt: u32 },
    /// Backoff attempts ran out. `connect`, `subscribe` or `track_table`
    /// starts over.
    Unavailable,
    Closed,
}

type Callback = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

thread_local! {
    /// Subscription whose callback is running on this thread.
    static DISPATCHING: Cell<Option<SubscriptionId>> = const { Cell::new(None) };
}

struct Subscription {
    id: SubscriptionId,
    table: TableId,
    document: Option<DocumentId>,
    /// Empty means every kind.
    kinds: BTreeSet<EventKind>,
    callback: Callback,
    active: AtomicBool,
    /// Held while the callback runs, so `cancel` from another thread waits
    /// for an in-progress invocation to finish.
    gate: Mutex<()>,
}

impl Subscription {
    fn matches(&self, event: &DocumentEvent) -> bool {
        self.table == event.table_id
            && self
                .document
                .as_ref()
                .is_none_or(|id| *id == event.document_id)
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind()))
    }

    fn deliver(&self, event: &DocumentEvent) {
        let _gate = self.gate.lock().unwrap_or_else(|p| p.into_inner());
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let previous = DISPATCHING.with(|d| d.replace(Some(self.id)));
        (self.callback)(event);
        DISPATCHING.with(|d| d.set(previous));
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: HashMap<SubscriptionId, Arc<Subscription>>,
}

enum Control {
    /// The channel set changed; reconnect with the new set.
    Resubscribe,
    Shutdown,
}

struct Connection {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

struct BusInner {
    transport: Arc<dyn RealtimeTransport>,
    cache: Arc<CacheStore>,
    database_id: String,
    backoff: BackoffPolicy,
    registry: Mutex<Registry>,
    channels: Mutex<BTreeSet<String>>,
    connection: Mutex<Option<Connection>>,
    state: watch::Sender<BusState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cheap to clone; clones share one connection and one registry.
#[derive(Clone)]
pub struct RealtimeBus {
    inner: Arc<BusInner>,
}

impl RealtimeBus {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        cache: Arc<CacheStore>,
        database_id: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        let (state, _) = watch::channel(BusState::Idle);
        Self {
            inner: Arc::new(BusInner {
                transport,
                cache,
                database_id: database_id.into(),
                backoff,
                registry: Mutex::new(Registry::default()),
                channels: Mutex::new(BTreeSet::new()),
                connection: Mutex::new(None),
                state,
            }),
        }
    }

    /// Channel name carrying document events for `table`.
    pub fn channel_for(&self, table: &TableId) -> String {
        format!(
            "databases.{}.collections.{}.documents",
            self.inner.database_id, table
        )
    }

    /// Makes sure the connection carries events for `table`, even with no
    /// listener on it, so cached reads of that table get invalidated.
    ///
    /// A bus that gave up reconnecting is restarted in the background.
    pub fn track_table(&self, table: &TableId) {
        let channel = self.channel_for(table);
        let added = lock(&self.inner.channels).insert(channel);
        if *self.inner.state.borrow() == BusState::Unavailable {
            self.restart();
        } else if added {
            self.inner.request_resubscribe();
        }
    }

    fn restart(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("[REALTIME] no runtime to restart the connection on");
            return;
        }
        let mut connection = lock(&self.inner.connection);
        if *self.inner.state.borrow() != BusState::Unavailable {
            return;
        }
        info!("[REALTIME] restarting after giving up");
        self.start(&mut connection);
    }

    /// Spawns a connection task. The caller holds the connection lock.
    fn start(&self, connection: &mut Option<Connection>) {
        let (control, rx) = mpsc::unbounded_channel();
        self.inner.state.send_replace(BusState::Connecting);
        let task = tokio::spawn(run(self.inner.clone(), rx));
        *connection = Some(Connection { control, task });
    }

    pub fn channels(&self) -> Vec<String> {
        lock(&self.inner.channels).iter().cloned().collect()
    }

    /// Starts the connection task if it is not running and waits until it
    /// is connected or gives up. Calling it while connected is a no-op.
    pub async fn connect(&self) -> RealtimeResult<()> {
        {
            let mut connection = lock(&self.inner.connection);
            let current = *self.inner.state.borrow();
            if current == BusState::Closed {
                return Err(RealtimeError::Closed);
            }
            // A task that reported `Unavailable` is on its way out.
            let running = current != BusState::Unavailable
                && connection.as_ref().is_some_and(|c| !c.task.is_finished());
            if !running {
                self.start(&mut connection);
            }
        }

        let mut state = self.inner.state.subscribe();
        let settled = state
            .wait_for(|s| {
                matches!(
                    s,
                    BusState::Connected | BusState::Unavailable | BusState::Closed
                )
            })
            .await
            .map(|s| *s)
            .unwrap_or(BusState::Closed);
        match settled {
            BusState::Connected => Ok(()),
            BusState::Unavailable => Err(RealtimeError::RealtimeUnavailable {
                attempts: self.inner.backoff.max_attempts,
            }),
            _ => Err(RealtimeError::Closed),
        }
    }

    /// Registers a listener for changes to `table`, or to one document of
    /// it. An empty `kinds` slice receives every kind.
    ///
    /// The callback runs on the bus task and must not block. It may cancel
    /// its own subscription.
    pub fn subscribe<F>(
        &self,
        table: &TableId,
        document: Option<&DocumentId>,
        kinds: &[EventKind],
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&DocumentEvent) + Send + Sync + 'static,
    {
        let subscription = {
            let mut registry = lock(&self.inner.registry);
            registry.next_id += 1;
            let subscription = Arc::new(Subscription {
                id: SubscriptionId(registry.next_id),
                table: table.clone(),
                document: document.cloned(),
                kinds: kinds.iter().copied().collect(),
                callback: Arc::new(callback),
                active: AtomicBool::new(true),
                gate: Mutex::new(()),
            });
            registry
                .subscriptions
                .insert(subscription.id, subscription.clone());
            subscription
        };
        debug!(
            subscription = %subscription.id,
            table = %table,
            document = ?document.map(DocumentId::as_str),
            "listener registered"
        );
        self.track_table(table);

        SubscriptionHandle {
            subscription,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.registry).subscriptions.len()
    }

    /// Routes one event: cache invalidation first, then every matching
    /// listener once per event kind present.
    pub fn dispatch(&self, event: &RealtimeEvent) {
        self.inner.dispatch(event);
    }

    pub fn state(&self) -> BusState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<BusState> {
        self.inner.state.subscribe()
    }

    /// Stops the connection task and drops every subscription. The bus
    /// cannot be reconnected afterwards.
    pub async fn shutdown(&self) {
        let connection = lock(&self.inner.connection).take();
        if let Some(connection) = connection {
            let _ = connection.control.send(Control::Shutdown);
            if let Err(e) = connection.task.await {
                warn!("[REALTIME] connection task ended abnormally: {e}");
            }
        }

        let dropped: Vec<Arc<Subscription>> = lock(&self.inner.registry)
            .subscriptions
            .drain()
            .map(|(_, s)| s)
            .collect();
        for subscription in &dropped {
            subscription.active.store(false, Ordering::SeqCst);
        }
        self.inner.state.send_replace(BusState::Closed);
        info!(
            "[REALTIME] bus shut down ({} subscriptions dropped)",
            dropped.len()
        );
    }
}

impl BusInner {
    fn channel_list(&self) -> Vec<String> {
        lock(&self.channels).iter().cloned().collect()
    }

    fn request_resubscribe(&self) {
        if let Some(connection) = lock(&self.connection).as_ref() {
            let _ = connection.control.send(Control::Resubscribe);
        }
    }

    fn set_state(&self, state: BusState) {
        self.state.send_if_modified(|current| {
            if *current == BusState::Closed || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn handle_frame(&self, text: &str) {
        match RawRealtimeMessage::parse_frame(text) {
            Ok(RawRealtimeMessage::Connected { channels }) => {
                debug!("[REALTIME] server confirmed {} channels", channels.len());
            }
            Ok(RawRealtimeMessage::Error { code, message }) => {
                warn!("[REALTIME] server error {code:?}: {message}");
            }
            Ok(RawRealtimeMessage::Other(kind)) => {
                debug!("[REALTIME] ignoring {kind} frame");
            }
            Ok(RawRealtimeMessage::Response(_)) => {}
            Ok(message) => match message.into_event() {
                Some(Ok(event)) => self.dispatch(&event),
                Some(Err(e)) => warn!("[REALTIME] dropping event: {e}"),
                None => {}
            },
            Err(e) => warn!("[REALTIME] dropping frame: {e}"),
        }
    }

    fn dispatch(&self, event: &RealtimeEvent) {
        if event.has_kind(EventKind::Create) || event.has_kind(EventKind::Update) {
            self.cache.invalidate_table(&event.table_id);
        } else if event.has_kind(EventKind::Delete) {
            self.cache
                .invalidate_document(&event.table_id, &event.document_id);
        }

        let listeners: Vec<Arc<Subscription>> = lock(&self.registry)
            .subscriptions
            .values()
            .filter(|s| s.table == event.table_id)
            .cloned()
            .collect();
        if listeners.is_empty() {
            return;
        }

        for change in event.changes() {
            for subscription in listeners.iter().filter(|s| s.matches(&change)) {
                subscription.deliver(&change);
            }
        }
    }
}

enum Outcome {
    Dropped,
    Resubscribe,
    Shutdown,
}

async fn run(inner: Arc<BusInner>, mut control: mpsc::UnboundedReceiver<Control>) {
    let mut attempt: u32 = 0;
    loop {
        let channels = inner.channel_list();
        match inner.transport.connect(&channels).await {
            Ok(connection) => {
                attempt = 0;
                inner.set_state(BusState::Connected);
                info!("[REALTIME] connected to {} channels", channels.len());
                match pump(&inner, connection, &mut control).await {
                    Outcome::Shutdown => break,
                    Outcome::Resubscribe => {
                        debug!("[REALTIME] channel set changed, reconnecting");
                        continue;
                    }
                    Outcome::Dropped => {
                        warn!("[REALTIME] {}", RealtimeError::TransportDisconnected);
                    }
                }
            }
            Err(e) => warn!("[REALTIME] connect attempt failed: {e}"),
        }

        attempt += 1;
        if inner.backoff.is_exhausted(attempt) {
            error!(
                "[REALTIME] giving up after {} attempts",
                inner.backoff.max_attempts
            );
            inner.set_state(BusState::Unavailable);
            return;
        }
        let delay = inner.backoff.delay_for(attempt);
        inner.set_state(BusState::Reconnecting { attempt });
        info!("[REALTIME] reconnecting in {delay:?} (attempt {attempt})");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = control.recv() => match cmd {
                Some(Control::Resubscribe) => {}
                Some(Control::Shutdown) | None => break,
            }
        }
    }
    inner.set_state(BusState::Closed);
}

async fn pump(
    inner: &BusInner,
    mut connection: Box<dyn RealtimeConnection>,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> Outcome {
    loop {
        tokio::select! {
            frame = connection.next_frame() => match frame {
                Some(Ok(text)) => inner.handle_frame(&text),
                Some(Err(e)) => {
                    warn!("[REALTIME] receive failed: {e}");
                    return Outcome::Dropped;
                }
                None => return Outcome::Dropped,
            },
            cmd = control.recv() => match cmd {
                Some(Control::Resubscribe) => return Outcome::Resubscribe,
                Some(Control::Shutdown) | None => return Outcome::Shutdown,
            }
        }
    }
}

/// Returned by [`RealtimeBus::subscribe`]. Dropping the handle does not
/// cancel the subscription.
pub struct SubscriptionHandle {
    subscription: Arc<Subscription>,
    bus: Weak<BusInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id
    }

    pub fn is_active(&self) -> bool {
        self.subscription.active.load(Ordering::SeqCst)
    }

    /// Removes the subscription. Once this returns the callback will not be
    /// invoked again. Safe to call repeatedly and from inside the
    /// subscription's own callback. Returns `true` for the call that
    /// actually cancelled.
    pub fn cancel(&self) -> bool {
        let subscription = &self.subscription;
        let was_active = subscription.active.swap(false, Ordering::SeqCst);

        let reentrant = DISPATCHING.with(|d| d.get() == Some(subscription.id));
        if !reentrant {
            drop(subscription.gate.lock().unwrap_or_else(|p| p.into_inner()));
        }

        if let Some(bus) = self.bus.upgrade() {
            lock(&bus.registry).subscriptions.remove(&subscription.id);
        }
        if was_active {
            debug!(subscription = %subscription.id, "listener cancelled");
        }
        was_active
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.subscription.id)
            .field("table", &self.subscription.table)
            .field("active", &self.is_active())
            .finish()
    }
}
