//! Live update listener.
//!
//! A [`LiveView`] owns one [`SyncedView`], the subscriptions that invalidate
//! it and an optional polling timer. A single driver task turns both kinds of
//! trigger into full refetches, so the listener never has two fetches of the
//! same view in flight. Events that arrive during a refetch are coalesced
//! into one follow-up refetch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{SelectAll, select_all};
use futures::{FutureExt, StreamExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::{SyncError, SyncResult};
use crate::notice::Notifier;
use crate::row::{Filter, Table};
use crate::source::ViewSource;
use crate::store::{ChannelHandle, StoreHandle, Subscription};
use crate::view::{Delta, Keyed, MutationId, SyncedView};

/// Lifecycle of a mounted view's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No channel held; before mount or after teardown.
    Unsubscribed,
    /// Channels are being opened.
    Subscribing,
    /// Idle and listening.
    Subscribed,
    /// A trigger fired and a refetch is in flight.
    RefetchPending,
}

/// What invalidates a live view.
#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    /// Insert channels that trigger a refetch.
    pub subscriptions: Vec<(Table, Filter)>,
    /// Fixed refetch interval, if any.
    pub poll_interval: Option<Duration>,
}

impl LiveOptions {
    /// Refetch on inserts into `table` matching `filter`.
    #[must_use]
    pub fn subscribe(mut self, table: Table, filter: Filter) -> Self {
        self.subscriptions.push((table, filter));
        self
    }

    /// Also refetch every `interval`.
    #[must_use]
    pub const fn poll(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

struct ViewCore<T> {
    label: String,
    view: Mutex<SyncedView<T>>,
    source: Arc<dyn ViewSource<T>>,
    state: watch::Sender<ListenerState>,
    renders: watch::Sender<u64>,
}

impl<T> ViewCore<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, SyncedView<T>> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_replace(state);
    }

    fn rendered(&self) {
        self.renders.send_modify(|version| *version += 1);
    }

    /// Refetch and apply unless a newer fetch got there first.
    async fn refresh(&self) -> SyncResult<bool> {
        let ticket = self.lock().begin_fetch();
        let items = self.source.load().await?;
        let applied = self.lock().apply_fetch(ticket, items);
        if applied {
            tracing::debug!(view = %self.label, seq = ticket.seq(), "View refreshed");
            self.rendered();
        }
        Ok(applied)
    }
}

/// A mounted, self-refreshing view.
///
/// Dropping it without [`LiveView::unmount`] still stops the driver, which
/// then releases its channels in the background.
pub struct LiveView<T> {
    core: Arc<ViewCore<T>>,
    notifier: Notifier,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl<T> LiveView<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    /// Subscribe, load the first page and start the driver.
    ///
    /// A failed subscription releases the channels already opened and is
    /// returned as an error. A failed first load is reported as a notice and
    /// leaves the view mounted but empty.
    pub async fn mount(
        label: impl Into<String>,
        store: StoreHandle,
        source: Arc<dyn ViewSource<T>>,
        options: LiveOptions,
        notifier: Notifier,
    ) -> SyncResult<Self> {
        let (state, _) = watch::channel(ListenerState::Unsubscribed);
        let (renders, _) = watch::channel(0);
        let core = Arc::new(ViewCore {
            label: label.into(),
            view: Mutex::new(SyncedView::new()),
            source,
            state,
            renders,
        });

        core.set_state(ListenerState::Subscribing);
        let subscriptions = match subscribe_all(&store, options.subscriptions).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                core.set_state(ListenerState::Unsubscribed);
                return Err(e);
            }
        };
        let handles: Vec<ChannelHandle> = subscriptions.iter().map(Subscription::handle).collect();
        core.set_state(ListenerState::Subscribed);
        tracing::debug!(view = %core.label, channels = handles.len(), "View mounted");

        if let Err(e) = core.refresh().await {
            tracing::warn!(view = %core.label, error = %e, "Initial load failed");
            notifier.notify_error(&e);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            Arc::clone(&core),
            store,
            select_all(subscriptions),
            handles,
            options.poll_interval,
            shutdown_rx,
        ));

        Ok(Self {
            core,
            notifier,
            shutdown: Some(shutdown_tx),
            driver: Some(driver),
        })
    }

    /// Stop the driver and wait until its channels are released.
    pub async fn unmount(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::error!(view = %self.core.label, error = %e, "View driver failed");
            }
        }
    }

    /// User-initiated refetch. Failures are returned and reported as a notice.
    pub async fn refresh(&self) -> SyncResult<()> {
        match self.core.refresh().await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.notifier.notify_error(&e);
                Err(e)
            }
        }
    }

    /// Current items: the fetched base with pending deltas applied.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.core.lock().snapshot()
    }

    /// The item with `key`, as currently displayed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.snapshot().into_iter().find(|item| item.key() == key)
    }

    /// Whether a fetch has been applied yet.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.core.lock().is_loaded()
    }

    /// Current listener state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.core.state.borrow()
    }

    /// Watch listener state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.core.state.subscribe()
    }

    /// Watch a counter bumped on every visible change.
    #[must_use]
    pub fn watch_renders(&self) -> watch::Receiver<u64> {
        self.core.renders.subscribe()
    }

    /// Show an optimistic change until it is committed or rolled back.
    pub fn apply_delta(&self, delta: Arc<dyn Delta<T>>) -> MutationId {
        let id = self.core.lock().apply_delta(delta);
        self.core.rendered();
        id
    }

    /// Keep a delta whose write the store confirmed.
    pub fn commit(&self, id: MutationId) {
        if self.core.lock().commit(id) {
            self.core.rendered();
        }
    }

    /// Commit with the confirmed value instead of the optimistic one.
    pub fn commit_with(&self, id: MutationId, confirmed: Arc<dyn Delta<T>>) {
        if self.core.lock().commit_with(id, confirmed) {
            self.core.rendered();
        }
    }

    /// Drop a delta whose write failed.
    pub fn rollback(&self, id: MutationId) {
        if self.core.lock().rollback(id) {
            self.core.rendered();
        }
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn subscribe_all(
    store: &StoreHandle,
    requests: Vec<(Table, Filter)>,
) -> SyncResult<Vec<Subscription>> {
    let mut subscriptions = Vec::with_capacity(requests.len());
    for (table, filter) in requests {
        match store.subscribe(table, filter).await {
            Ok(subscription) => subscriptions.push(subscription),
            Err(e) => {
                release(store, subscriptions.iter().map(Subscription::handle)).await;
                return Err(SyncError::from(e));
            }
        }
    }
    Ok(subscriptions)
}

async fn release(store: &StoreHandle, handles: impl IntoIterator<Item = ChannelHandle>) {
    for handle in handles {
        if let Err(e) = store.unsubscribe(handle).await {
            tracing::warn!(?handle, error = %e, "Failed to release channel");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn drive<T>(
    core: Arc<ViewCore<T>>,
    store: StoreHandle,
    mut events: SelectAll<Subscription>,
    handles: Vec<ChannelHandle>,
    poll_interval: Option<Duration>,
    mut shutdown: oneshot::Receiver<()>,
) where
    T: Keyed + Clone + Send + Sync + 'static,
{
    let mut ticker = poll_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut streaming = !handles.is_empty();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.next(), if streaming => {
                let Some(event) = event else {
                    tracing::warn!(view = %core.label, "Subscription stream closed");
                    streaming = false;
                    continue;
                };
                let mut coalesced = 0_usize;
                while let Some(Some(_)) = events.next().now_or_never() {
                    coalesced += 1;
                }
                tracing::debug!(
                    view = %core.label,
                    table = %event.table,
                    coalesced,
                    "Insert event, refetching"
                );
            }
            () = tick(&mut ticker), if ticker.is_some() => {
                tracing::trace!(view = %core.label, "Poll tick");
            }
        }

        core.set_state(ListenerState::RefetchPending);
        tokio::select! {
            _ = &mut shutdown => break,
            result = core.refresh() => {
                if let Err(e) = result {
                    tracing::warn!(view = %core.label, error = %e, "Background refresh failed");
                }
            }
        }
        core.set_state(ListenerState::Subscribed);
    }

    release(&store, handles).await;
    core.set_state(ListenerState::Unsubscribed);
    tracing::debug!(view = %core.label, "View unmounted");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, Operation};
    use crate::row::Row;
    use crate::store::{RemoteStore, StoreError};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Item(String);

    impl Keyed for Item {
        fn key(&self) -> &str {
            &self.0
        }
    }

    /// Lists team ids and counts how often it was asked to.
    struct TeamIds {
        store: Arc<MemoryStore>,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ViewSource<Item> for TeamIds {
        async fn load(&self) -> SyncResult<Vec<Item>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let rows = self.store.query(Table::Team, &Filter::All, None, None).await?;
            Ok(rows
                .iter()
                .filter_map(|row| row.get("id").and_then(Value::as_str))
                .map(|id| Item(id.to_string()))
                .collect())
        }
    }

    fn team(id: &str) -> Row {
        match json!({"id": id, "name": id}) {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn fixture() -> (Arc<MemoryStore>, Arc<TeamIds>) {
        let store = Arc::new(MemoryStore::new());
        store.seed(Table::Team, [team("t1")]);
        let source = Arc::new(TeamIds {
            store: store.clone(),
            loads: AtomicUsize::new(0),
        });
        (store, source)
    }

    async fn wait_for_render(renders: &mut watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(5), renders.changed())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_event_triggers_refetch() {
        let (store, source) = fixture();
        let view: LiveView<Item> = LiveView::mount(
            "teams",
            store.clone(),
            source.clone(),
            LiveOptions::default().subscribe(Table::Team, Filter::All),
            Notifier::default(),
        )
        .await
        .unwrap();
        assert_eq!(view.state(), ListenerState::Subscribed);
        assert_eq!(view.snapshot(), vec![Item("t1".into())]);

        let mut renders = view.watch_renders();
        store.insert(Table::Team, team("t2")).await.unwrap();
        wait_for_render(&mut renders).await;

        assert_eq!(view.snapshot().len(), 2);
        view.unmount().await;
        assert_eq!(store.active_channels(), 0);
    }

    #[tokio::test]
    async fn test_failed_subscription_releases_opened_channels() {
        let (store, source) = fixture();
        store.fail_next_on(
            Operation::Subscribe,
            Table::TeamMember,
            StoreError::Network("refused".into()),
        );

        let result: SyncResult<LiveView<Item>> = LiveView::mount(
            "teams",
            store.clone(),
            source,
            LiveOptions::default()
                .subscribe(Table::Team, Filter::All)
                .subscribe(Table::TeamMember, Filter::All),
            Notifier::default(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(store.active_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_only_view_refetches_on_interval() {
        let (store, source) = fixture();
        let view: LiveView<Item> = LiveView::mount(
            "impact",
            store.clone(),
            source.clone(),
            LiveOptions::default().poll(Duration::from_secs(600)),
            Notifier::default(),
        )
        .await
        .unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(store.active_channels(), 0);

        let mut renders = view.watch_renders();
        store.seed(Table::Team, [team("t2")]);
        tokio::time::sleep(Duration::from_secs(601)).await;
        wait_for_render(&mut renders).await;

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(view.snapshot().len(), 2);
        view.unmount().await;
    }

    #[tokio::test]
    async fn test_dropped_view_releases_channel() {
        let (store, source) = fixture();
        let view: LiveView<Item> = LiveView::mount(
            "teams",
            store.clone(),
            source,
            LiveOptions::default().subscribe(Table::Team, Filter::All),
            Notifier::default(),
        )
        .await
        .unwrap();
        let mut state = view.watch_state();
        drop(view);

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == ListenerState::Unsubscribed),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(store.active_channels(), 0);
    }

    #[tokio::test]
    async fn test_user_refresh_failure_keeps_items_and_notifies() {
        let (store, source) = fixture();
        let notifier = Notifier::default();
        let mut notices = notifier.subscribe();
        let view: LiveView<Item> = LiveView::mount(
            "teams",
            store.clone(),
            source,
            LiveOptions::default(),
            notifier,
        )
        .await
        .unwrap();

        store.fail_next(Operation::Query, StoreError::Network("reset".into()));
        let err = view.refresh().await.unwrap_err();

        assert!(matches!(err, SyncError::Transient(_)));
        assert_eq!(view.snapshot(), vec![Item("t1".into())]);
        assert_eq!(notices.recv().await.unwrap().code, "network");
        view.unmount().await;
    }
}
