//! Per-user verification state machine.
//!
//! An event starts in `Verifying` and moves to `Succeeded` or `Failed` either
//! from a challenge result or from its deadline timer. Every transition runs
//! under the event's mutex in the order stop deadline, write state, persist,
//! signal. The completion signal is a watch flag that only ever flips once, so
//! any number of waiters wake on the same transition and then read the state
//! written before the flip.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::types::{EventSnapshot, TransitionPolicy, UserId, VerificationState};
use crate::state::SharedStore;

/// How long an event stays in the registry, resolved or not
pub const EVENT_EXPIRY: Duration = Duration::from_secs(12 * 60 * 60);

/// Deadline used when the caller gives a zero timeout
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(6 * 60);

struct EventInner {
    username: String,
    state: VerificationState,
    deadline_timer: Option<AbortHandle>,
    expiry_timer: Option<AbortHandle>,
}

pub struct VerificationEvent {
    user_id: UserId,
    requested_at: DateTime<Utc>,
    policy: TransitionPolicy,
    store: Option<SharedStore>,
    inner: Mutex<EventInner>,
    done: watch::Sender<bool>,
}

impl VerificationEvent {
    /// Create an event in `Verifying`, arm both timers and persist the initial record.
    ///
    /// `on_expire` runs when the expiry timer fires, before waiters are released;
    /// the registry uses it to drop its entry.
    pub(super) fn start<F>(
        user_id: UserId,
        username: &str,
        timeout: Duration,
        store: Option<SharedStore>,
        policy: TransitionPolicy,
        on_expire: F,
    ) -> Arc<Self>
    where
        F: FnOnce(&Arc<VerificationEvent>) + Send + 'static,
    {
        let (done, _) = watch::channel(false);
        let event = Arc::new(Self {
            user_id,
            requested_at: Utc::now(),
            policy,
            store,
            inner: Mutex::new(EventInner {
                username: username.to_string(),
                state: VerificationState::Verifying,
                deadline_timer: None,
                expiry_timer: None,
            }),
            done,
        });

        let timeout = if timeout.is_zero() {
            DEFAULT_VERIFICATION_TIMEOUT
        } else {
            timeout
        };

        {
            let mut inner = event.inner.lock();
            inner.expiry_timer = Some(spawn_expiry_timer(Arc::downgrade(&event), on_expire));
            inner.deadline_timer = Some(spawn_deadline_timer(Arc::downgrade(&event), timeout));
            event.persist_locked(&inner);
        }

        debug!(
            "Started verification for user {} with a {}s deadline",
            user_id,
            timeout.as_secs()
        );
        event
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> VerificationState {
        self.inner.lock().state
    }

    pub fn username(&self) -> String {
        self.inner.lock().username.clone()
    }

    /// Move to `new_state`. Returns whether the transition was applied.
    pub fn set_state(&self, new_state: VerificationState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == new_state {
            return false;
        }
        if inner.state.is_terminal() && self.policy == TransitionPolicy::TerminalIsFinal {
            debug!(
                "Ignoring transition {} -> {} for user {}: already terminal",
                inner.state, new_state, self.user_id
            );
            return false;
        }
        if inner.state.is_terminal() {
            warn!(
                "Overwriting terminal state {} with {} for user {}",
                inner.state, new_state, self.user_id
            );
        }

        if let Some(timer) = inner.deadline_timer.take() {
            timer.abort();
        }
        inner.state = new_state;
        self.persist_locked(&inner);

        if new_state.is_terminal() {
            if let Some(store) = &self.store {
                if let Err(e) = store.delete_pending_groups_by_user(self.user_id) {
                    warn!("Failed to clear pending groups for user {}: {}", self.user_id, e);
                }
            }
            self.fire_completion();
        }

        info!("User {} verification is now {}", self.user_id, new_state);
        true
    }

    /// Replace the cached username, ignoring empty input
    pub fn update_username(&self, username: &str) {
        if username.is_empty() {
            return;
        }
        self.inner.lock().username = username.to_string();
    }

    /// Write the current username and status to the store
    pub fn persist(&self) {
        let inner = self.inner.lock();
        self.persist_locked(&inner);
    }

    /// Wait until the event resolves (or expires) and return the state it ended in
    pub async fn wait_for_terminal(&self) -> VerificationState {
        let mut rx = self.done.subscribe();
        // the sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|fired| *fired).await;
        self.state()
    }

    pub fn is_completed(&self) -> bool {
        *self.done.borrow()
    }

    pub fn snapshot(&self) -> EventSnapshot {
        let inner = self.inner.lock();
        EventSnapshot {
            user_id: self.user_id,
            username: inner.username.clone(),
            requested_at: self.requested_at,
            state: inner.state,
        }
    }

    fn persist_locked(&self, inner: &EventInner) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.upsert_user_verification(self.user_id, &inner.username, inner.state.status())
        {
            warn!("Failed to persist verification for user {}: {}", self.user_id, e);
        }
    }

    fn fire_completion(&self) -> bool {
        self.done.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    fn expire(&self) {
        let mut inner = self.inner.lock();
        inner.expiry_timer = None;
        if let Some(timer) = inner.deadline_timer.take() {
            timer.abort();
        }
        if inner.state == VerificationState::Verifying {
            warn!("Verification for user {} expired before resolving", self.user_id);
        }
        self.fire_completion();
    }
}

impl Drop for VerificationEvent {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for timer in [inner.deadline_timer.take(), inner.expiry_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}

fn spawn_deadline_timer(event: Weak<VerificationEvent>, timeout: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(event) = event.upgrade() {
            if event.set_state(VerificationState::Failed) {
                info!("User {} did not verify in time", event.user_id);
            }
        }
    })
    .abort_handle()
}

fn spawn_expiry_timer<F>(event: Weak<VerificationEvent>, on_expire: F) -> AbortHandle
where
    F: FnOnce(&Arc<VerificationEvent>) + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(EVENT_EXPIRY).await;
        if let Some(event) = event.upgrade() {
            on_expire(&event);
            event.expire();
        }
    })
    .abort_handle()
}
