use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bus::{ListenerId, MessageBus};

use super::{parse_frame, subscribe_command, PushConnector, PushFrame};

/// How long teardown waits for the connection to close cleanly.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// What happens to an already-pending refresh when another notice arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Every notice gets its own timer; earlier timers still fire.
    #[default]
    Accumulate,
    /// A new notice cancels any pending timer before scheduling its own.
    ReplacePending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// The (user, discussion) pair a live connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerKey {
    pub user: String,
    pub discussion_id: String,
}

pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    state: ConnectionState,
    timers: Vec<JoinHandle<()>>,
}

struct Active {
    key: SchedulerKey,
    shared: Arc<Mutex<Shared>>,
    listener: ListenerId,
    stop: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
}

/// Owns the push connection for one discussion and turns update notices into
/// deferred refresh calls.
pub struct UpdateScheduler {
    connector: Arc<dyn PushConnector>,
    policy: RefreshPolicy,
    refresh: RefreshHook,
    frames: MessageBus<PushFrame>,
    active: Option<Active>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UpdateScheduler {
    pub fn new(connector: Arc<dyn PushConnector>, policy: RefreshPolicy, refresh: RefreshHook) -> Self {
        Self {
            connector,
            policy,
            refresh,
            frames: MessageBus::new(),
            active: None,
        }
    }

    /// Bus carrying every well-formed inbound frame.
    pub fn frames(&self) -> &MessageBus<PushFrame> {
        &self.frames
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn key(&self) -> Option<&SchedulerKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    pub fn state(&self) -> ConnectionState {
        match &self.active {
            Some(active) => lock(&active.shared).state,
            None => ConnectionState::Disconnected,
        }
    }

    /// Timers scheduled and not yet fired.
    pub fn pending_refreshes(&self) -> usize {
        match &self.active {
            Some(active) => lock(&active.shared)
                .timers
                .iter()
                .filter(|t| !t.is_finished())
                .count(),
            None => 0,
        }
    }

    /// Bring the connection in line with the current (user, discussion) pair.
    ///
    /// Same key: nothing happens. Different or missing key: the current
    /// connection is torn down first, then a new one is opened if both the key
    /// and a push endpoint are present.
    pub async fn sync(&mut self, key: Option<SchedulerKey>, url: Option<&str>) {
        if key.is_some() && self.key() == key.as_ref() {
            return;
        }

        self.stop().await;

        if let (Some(key), Some(url)) = (key, url) {
            self.start(key, url);
        }
    }

    fn start(&mut self, key: SchedulerKey, url: &str) {
        let shared = Arc::new(Mutex::new(Shared {
            state: ConnectionState::Connecting,
            timers: Vec::new(),
        }));

        let listener = {
            let shared = Arc::clone(&shared);
            let refresh = Arc::clone(&self.refresh);
            let policy = self.policy;
            self.frames.subscribe(PushFrame::is_discussion_update, move |frame| {
                if let Some(notice) = frame.update_notice() {
                    tracing::info!(
                        discussion = %notice.discussion_id,
                        wait_ms = notice.wait.as_millis() as u64,
                        policy = ?policy,
                        "Discussion updated, scheduling refresh"
                    );
                    schedule_refresh(&shared, policy, notice.wait, Arc::clone(&refresh));
                }
            })
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let reader = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            url.to_string(),
            key.discussion_id.clone(),
            self.frames.clone(),
            Arc::clone(&shared),
            stop_rx,
        ));

        tracing::info!(
            user = %key.user,
            discussion = %key.discussion_id,
            "Update scheduler activated"
        );

        self.active = Some(Active {
            key,
            shared,
            listener,
            stop: Some(stop_tx),
            reader,
        });
    }

    /// Remove the frame listener, close the connection and cancel pending
    /// refreshes. Safe to call when inactive.
    pub async fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        self.frames.unsubscribe(active.listener);

        if let Some(stop) = active.stop.take() {
            let _ = stop.send(());
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut active.reader).await.is_err() {
            tracing::warn!("Push connection did not close in time, aborting");
            active.reader.abort();
        }

        let cancelled = {
            let mut shared = lock(&active.shared);
            shared.state = ConnectionState::Closed;
            let timers: Vec<_> = shared.timers.drain(..).collect();
            timers.iter().filter(|t| !t.is_finished()).for_each(|t| t.abort());
            timers.len()
        };

        tracing::info!(
            discussion = %active.key.discussion_id,
            timers = cancelled,
            "Update scheduler torn down"
        );
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.frames.unsubscribe(active.listener);
            active.reader.abort();
            for timer in lock(&active.shared).timers.drain(..) {
                timer.abort();
            }
        }
    }
}

fn schedule_refresh(
    shared: &Mutex<Shared>,
    policy: RefreshPolicy,
    wait: Duration,
    refresh: RefreshHook,
) {
    let mut shared = lock(shared);
    shared.timers.retain(|t| !t.is_finished());

    if policy == RefreshPolicy::ReplacePending {
        for timer in shared.timers.drain(..) {
            timer.abort();
        }
    }

    shared.timers.push(tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        refresh();
    }));
}

fn set_state(shared: &Mutex<Shared>, state: ConnectionState) {
    lock(shared).state = state;
}

async fn run_connection(
    connector: Arc<dyn PushConnector>,
    url: String,
    discussion_id: String,
    frames: MessageBus<PushFrame>,
    shared: Arc<Mutex<Shared>>,
    mut stop: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        _ = &mut stop => None,
        result = connector.connect(&url) => Some(result),
    };

    let mut connection = match connected {
        Some(Ok(connection)) => connection,
        Some(Err(e)) => {
            tracing::error!(url = %url, error = %e, "Failed to open push connection");
            set_state(&shared, ConnectionState::Closed);
            return;
        }
        None => {
            set_state(&shared, ConnectionState::Closed);
            return;
        }
    };

    set_state(&shared, ConnectionState::Open);

    if let Err(e) = connection.send_text(&subscribe_command(&discussion_id)).await {
        tracing::warn!(discussion = %discussion_id, error = %e, "Failed to send subscribe command");
    }

    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = connection.next_text() => match next {
                Some(Ok(text)) => match parse_frame(&text) {
                    Ok(frame) => {
                        frames.publish(&frame);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed push frame");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Push connection failed");
                    break;
                }
                None => break,
            },
        }
    }

    if let Err(e) = connection.close().await {
        tracing::debug!(error = %e, "Error while closing push connection");
    }
    set_state(&shared, ConnectionState::Closed);
}


#[cfg(test)]
mod tests {
    use super::testing::FakeConnector;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(user: &str, id: &str) -> SchedulerKey {
        SchedulerKey {
            user: user.to_string(),
            discussion_id: id.to_string(),
        }
    }

    fn scheduler(policy: RefreshPolicy) -> (UpdateScheduler, FakeConnector, Arc<AtomicUsize>) {
        let connector = FakeConnector::default();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshes);
        let hook: RefreshHook = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let scheduler = UpdateScheduler::new(Arc::new(connector.clone()), policy, hook);
        (scheduler, connector, refreshes)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sends_single_subscribe() {
        let (mut scheduler, connector, _) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "42")), Some("wss://push")).await;
        settle().await;

        assert_eq!(scheduler.state(), ConnectionState::Open);
        assert_eq!(connector.sent(), vec!["subscribe:pull_request:42".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_schedules_refresh_after_wait() {
        let (mut scheduler, connector, refreshes) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "42")), Some("wss://push")).await;
        settle().await;

        connector.push(r#"["pull_request:42",{"wait":1000}]"#);
        settle().await;
        assert_eq!(scheduler.pending_refreshes(), 1);
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_foreign_frames_are_ignored() {
        let (mut scheduler, connector, refreshes) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "42")), Some("wss://push")).await;
        settle().await;

        connector.push("{not json");
        connector.push(r#"["issue:42",{"wait":0}]"#);
        settle().await;
        assert_eq!(scheduler.state(), ConnectionState::Open);
        assert_eq!(scheduler.pending_refreshes(), 0);

        connector.push(r#"["pull_request:42",{"wait":0}]"#);
        settle().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accumulate_policy_fires_every_timer() {
        let (mut scheduler, connector, refreshes) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "42")), Some("wss://push")).await;
        settle().await;

        connector.push(r#"["pull_request:42",{"wait":1000}]"#);
        connector.push(r#"["pull_request:42",{"wait":1000}]"#);
        settle().await;
        assert_eq!(scheduler.pending_refreshes(), 2);

        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_pending_policy_keeps_latest_only() {
        let (mut scheduler, connector, refreshes) = scheduler(RefreshPolicy::ReplacePending);
        scheduler.sync(Some(key("me", "42")), Some("wss://push")).await;
        settle().await;

        connector.push(r#"["pull_request:42",{"wait":1000}]"#);
        connector.push(r#"["pull_request:42",{"wait":1000}]"#);
        settle().await;
        assert_eq!(scheduler.pending_refreshes(), 1);

        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_everything_down() {
        let (mut scheduler, connector, refreshes) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "42")), Some("wss://push")).await;
        settle().await;

        connector.push(r#"["pull_request:42",{"wait":1000}]"#);
        settle().await;
        assert_eq!(scheduler.frames().listener_count(), 1);

        scheduler.sync(None, Some("wss://push")).await;
        assert!(connector.closed());
        assert_eq!(scheduler.frames().listener_count(), 0);
        assert_eq!(scheduler.state(), ConnectionState::Disconnected);
        assert_eq!(scheduler.pending_refreshes(), 0);

        tokio::time::advance(Duration::from_millis(2000)).await;
        settle().await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_reconnects() {
        let (mut scheduler, connector, _) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "1")), Some("wss://push")).await;
        settle().await;
        scheduler.sync(Some(key("me", "1")), Some("wss://push")).await;
        settle().await;
        assert_eq!(connector.connects(), 1);

        scheduler.sync(Some(key("me", "2")), Some("wss://push")).await;
        settle().await;
        assert_eq!(connector.connects(), 2);
        assert_eq!(scheduler.key(), Some(&key("me", "2")));
        assert_eq!(
            connector.sent(),
            vec![
                "subscribe:pull_request:1".to_string(),
                "subscribe:pull_request:2".to_string()
            ]
        );
        assert_eq!(scheduler.frames().listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_endpoint_stays_disconnected() {
        let (mut scheduler, connector, _) = scheduler(RefreshPolicy::Accumulate);
        scheduler.sync(Some(key("me", "1")), None).await;
        settle().await;
        assert_eq!(scheduler.state(), ConnectionState::Disconnected);
        assert_eq!(connector.connects(), 0);
    }
}
