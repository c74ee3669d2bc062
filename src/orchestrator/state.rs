//! View state and its reducer.
//!
//! `reduce` is a pure function. When an event changes nothing it hands back
//! the very same `Arc`, so consumers can compare snapshots with
//! [`Arc::ptr_eq`].

use std::sync::Arc;

use crate::platform::types::{Channel, PullRequestDiscussion, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub loading: bool,
    pub user: Option<User>,
    pub discussion: Option<Arc<PullRequestDiscussion>>,
    pub selected_channel: Option<String>,
    pub collapsed: bool,
    /// Last sign-in failure, shown until the next successful user fetch.
    pub sign_in_error: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            loading: true,
            user: None,
            discussion: None,
            selected_channel: None,
            collapsed: false,
            sign_in_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    UserReceived(User),
    AuthErrorReceived,
    UnknownErrorReceived,
    MenuToggled(bool),
    DiscussionReceived(Arc<PullRequestDiscussion>),
    ChannelSelected(String),
    SignInFailed(String),
    /// An event kind this reducer does not know about.
    Unrecognized(String),
}

/// What the UI layer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase<'a> {
    Loading,
    Unauthenticated,
    AuthenticatedWithoutDiscussion,
    Ready {
        discussion: &'a PullRequestDiscussion,
        selected_channel: Option<&'a str>,
        collapsed: bool,
    },
}

impl ViewState {
    pub fn phase(&self) -> ViewPhase<'_> {
        if self.loading {
            return ViewPhase::Loading;
        }
        if self.user.is_none() {
            return ViewPhase::Unauthenticated;
        }
        match &self.discussion {
            None => ViewPhase::AuthenticatedWithoutDiscussion,
            Some(discussion) => ViewPhase::Ready {
                discussion,
                selected_channel: self.selected_channel.as_deref(),
                collapsed: self.collapsed,
            },
        }
    }

    pub fn selected(&self) -> Option<&Channel> {
        let discussion = self.discussion.as_ref()?;
        discussion.channel(self.selected_channel.as_deref()?)
    }
}

pub fn reduce(state: &Arc<ViewState>, event: Event) -> Arc<ViewState> {
    match event {
        Event::UserReceived(user) => Arc::new(ViewState {
            loading: false,
            user: Some(user),
            sign_in_error: None,
            ..ViewState::clone(state)
        }),
        Event::AuthErrorReceived | Event::UnknownErrorReceived => {
            if !state.loading && state.user.is_none() {
                return Arc::clone(state);
            }
            Arc::new(ViewState {
                loading: false,
                user: None,
                ..ViewState::clone(state)
            })
        }
        Event::MenuToggled(collapsed) => {
            if state.collapsed == collapsed {
                return Arc::clone(state);
            }
            Arc::new(ViewState {
                collapsed,
                ..ViewState::clone(state)
            })
        }
        Event::DiscussionReceived(discussion) => {
            let keep = state
                .selected_channel
                .as_deref()
                .is_some_and(|key| discussion.channel(key).is_some());
            let selected_channel = if keep {
                state.selected_channel.clone()
            } else {
                discussion.first_channel_key().map(str::to_string)
            };
            Arc::new(ViewState {
                discussion: Some(discussion),
                selected_channel,
                ..ViewState::clone(state)
            })
        }
        // No existence check: a stale key is repaired by the next discussion.
        Event::ChannelSelected(key) => Arc::new(ViewState {
            selected_channel: Some(key),
            ..ViewState::clone(state)
        }),
        Event::SignInFailed(message) => Arc::new(ViewState {
            sign_in_error: Some(message),
            ..ViewState::clone(state)
        }),
        Event::Unrecognized(kind) => {
            tracing::trace!(kind = %kind, "Ignoring unrecognized event");
            Arc::clone(state)
        }
    }
}
