//! Sequences sign-in, the current-user fetch, discussion fetches and live
//! updates, and exposes the commands the UI layer calls.

pub mod state;

use std::sync::{Arc, Weak};

use tokio::sync::{watch, Mutex};

use crate::auth::AuthHandshake;
use crate::error::{AppError, Result};
use crate::platform::github::DiscussionLocation;
use crate::platform::types::{ChannelTarget, PullRequestDiscussion};
use crate::platform::ReviewPlatform;
use crate::push::scheduler::{RefreshHook, RefreshPolicy, SchedulerKey, UpdateScheduler};
use crate::push::PushConnector;

pub use state::{reduce, Event, ViewPhase, ViewState};

struct LiveUpdates {
    scheduler: UpdateScheduler,
    url: Option<String>,
}

struct Inner {
    platform: Arc<dyn ReviewPlatform>,
    location: Option<DiscussionLocation>,
    auth: Option<AuthHandshake>,
    state: watch::Sender<Arc<ViewState>>,
    live: Mutex<Option<LiveUpdates>>,
}

/// Cheap to clone; clones drive the same state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<dyn ReviewPlatform>,
        location: Option<DiscussionLocation>,
        auth: Option<AuthHandshake>,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(ViewState::default()));
        Self {
            inner: Arc::new(Inner {
                platform,
                location,
                auth,
                state,
                live: Mutex::new(None),
            }),
        }
    }

    pub fn location(&self) -> Option<&DiscussionLocation> {
        self.inner.location.as_ref()
    }

    pub fn state(&self) -> Arc<ViewState> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewState>> {
        self.inner.state.subscribe()
    }

    /// Run an event through the reducer. Returns false when the state was
    /// left untouched.
    pub fn dispatch(&self, event: Event) -> bool {
        self.inner.state.send_if_modified(|current| {
            let next = reduce(current, event);
            if Arc::ptr_eq(&next, &*current) {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Attach a push connection. Scheduled refreshes call back into this
    /// orchestrator; the connection opens on the next [`sync_live_updates`].
    ///
    /// [`sync_live_updates`]: Self::sync_live_updates
    pub async fn enable_live_updates(
        &self,
        connector: Arc<dyn PushConnector>,
        policy: RefreshPolicy,
        url: Option<String>,
    ) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let hook: RefreshHook = Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let orchestrator = Orchestrator { inner };
            tokio::spawn(async move {
                // Failures are already logged inside refresh.
                let _ = orchestrator.refresh().await;
            });
        });

        let previous = self.inner.live.lock().await.replace(LiveUpdates {
            scheduler: UpdateScheduler::new(connector, policy, hook),
            url,
        });
        if let Some(mut previous) = previous {
            previous.scheduler.stop().await;
        }
    }

    /// Fetch the current user, then the discussion, then bring the push
    /// connection in line with both.
    pub async fn start(&self) -> Result<()> {
        match self.inner.platform.current_user().await {
            Ok(user) => {
                tracing::debug!(login = %user.login, "User received");
                self.dispatch(Event::UserReceived(user));
            }
            Err(e) => {
                self.report(&e).await;
                if !e.is_authorization() {
                    self.dispatch(Event::UnknownErrorReceived);
                }
                self.sync_live_updates().await;
                return Err(e);
            }
        }

        let result = self.refresh().await;
        self.sync_live_updates().await;
        result
    }

    /// Run the popup sign-in, then restart with the new credential.
    ///
    /// Unreadable results are shown and the attempt keeps waiting; any other
    /// failure ends it.
    pub async fn sign_in(&self) -> Result<()> {
        let auth = self
            .inner
            .auth
            .as_ref()
            .ok_or_else(|| AppError::Config("sign-in is not configured".to_string()))?;

        let mut pending = match auth.begin() {
            Ok(pending) => pending,
            Err(e) => {
                self.dispatch(Event::SignInFailed(e.to_string()));
                return Err(e);
            }
        };

        loop {
            match pending.wait().await {
                Ok(_) => break,
                Err(e @ AppError::Parse(_)) => {
                    self.dispatch(Event::SignInFailed(e.to_string()));
                }
                Err(e) => {
                    self.dispatch(Event::SignInFailed(e.to_string()));
                    return Err(e);
                }
            }
        }
        drop(pending);

        self.start().await
    }

    /// Re-fetch the discussion. A silent no-op off a discussion page.
    ///
    /// Concurrent refreshes are not ordered: whichever finishes last
    /// determines the state. The push connection follows the resulting
    /// (user, discussion) pair, so a rejected credential tears it down.
    pub async fn refresh(&self) -> Result<()> {
        let Some(location) = &self.inner.location else {
            return Ok(());
        };

        match self.inner.platform.get_discussion(location).await {
            Ok(discussion) => {
                tracing::debug!(
                    discussion = %location,
                    channels = discussion.channels.len(),
                    "Discussion received"
                );
                self.dispatch(Event::DiscussionReceived(Arc::new(discussion)));
                self.sync_live_updates().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(discussion = %location, error = %e, "Refresh failed");
                if e.is_authorization() {
                    self.dispatch(Event::AuthErrorReceived);
                    self.sync_live_updates().await;
                }
                Err(e)
            }
        }
    }

    /// Post `text` to the selected channel, then refresh.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let Some((location, target)) = self.selected_target() else {
            tracing::debug!("No selected channel, message not sent");
            return Ok(());
        };

        if let Err(e) = self.inner.platform.create_comment(&location, &target, text).await {
            self.report(&e).await;
            return Err(e);
        }
        tracing::info!(discussion = %location, channel = %target.key, "Message sent");

        self.refresh().await
    }

    /// Delete a comment from the selected channel and drop it from the
    /// current snapshot.
    pub async fn delete_message(&self, comment_id: &str) -> Result<()> {
        let Some((location, target)) = self.selected_target() else {
            tracing::debug!("No selected channel, nothing deleted");
            return Ok(());
        };

        if let Err(e) = self
            .inner
            .platform
            .delete_comment(&location, target.is_review, comment_id)
            .await
        {
            self.report(&e).await;
            return Err(e);
        }
        tracing::info!(discussion = %location, comment = comment_id, "Message deleted");

        let current: Option<Arc<PullRequestDiscussion>> = self.state().discussion.clone();
        if let Some(discussion) = current {
            self.dispatch(Event::DiscussionReceived(Arc::new(
                discussion.without_comment(&target.key, comment_id),
            )));
        }
        Ok(())
    }

    pub fn select_channel(&self, key: &str) {
        self.dispatch(Event::ChannelSelected(key.to_string()));
    }

    pub fn toggle_menu(&self, collapsed: bool) {
        self.dispatch(Event::MenuToggled(collapsed));
    }

    /// Activate, switch or tear down the push connection for the current
    /// (user, discussion) pair.
    pub async fn sync_live_updates(&self) {
        let key = {
            let state = self.state();
            match (&state.user, &state.discussion) {
                (Some(user), Some(discussion)) => Some(SchedulerKey {
                    user: user.login.clone(),
                    discussion_id: discussion.id.clone(),
                }),
                _ => None,
            }
        };

        let mut live = self.inner.live.lock().await;
        if let Some(live) = live.as_mut() {
            live.scheduler.sync(key, live.url.as_deref()).await;
        }
    }

    /// Tear down the push connection and any pending refreshes.
    pub async fn shutdown(&self) {
        if let Some(live) = self.inner.live.lock().await.as_mut() {
            live.scheduler.stop().await;
        }
    }

    fn selected_target(&self) -> Option<(DiscussionLocation, ChannelTarget)> {
        let location = self.inner.location.clone()?;
        let state = self.state();
        let channel = state.selected()?;
        Some((location, ChannelTarget::from(channel)))
    }

    /// Log a failed request; a rejected credential also signs the user out
    /// and drops the push connection.
    async fn report(&self, error: &AppError) {
        if error.is_authorization() {
            tracing::warn!(error = %error, "Not authorized");
            self.dispatch(Event::AuthErrorReceived);
            self.sync_live_updates().await;
        } else {
            tracing::error!(error = %error, "Request failed");
        }
    }
}
