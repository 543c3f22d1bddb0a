use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::event::VerificationEvent;
use super::types::{EventSnapshot, TransitionPolicy, UserId};
use crate::state::SharedStore;

type EventMap = DashMap<UserId, Arc<VerificationEvent>>;

/// Live verification events, at most one per user
pub struct VerificationRegistry {
    events: EventMap,
    store: Option<SharedStore>,
    policy: TransitionPolicy,
}

impl VerificationRegistry {
    pub fn new(store: Option<SharedStore>, policy: TransitionPolicy) -> Self {
        Self {
            events: DashMap::new(),
            store,
            policy,
        }
    }

    /// Return the user's live event, creating and starting one if there is none.
    ///
    /// The boolean is true when the event already existed; the caller should then
    /// refresh its username and re-persist it.
    pub fn get_or_create(
        self: &Arc<Self>,
        user_id: UserId,
        username: &str,
        timeout: Duration,
    ) -> (Arc<VerificationEvent>, bool) {
        match self.events.entry(user_id) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                let registry = Arc::downgrade(self);
                let event = VerificationEvent::start(
                    user_id,
                    username,
                    timeout,
                    self.store.clone(),
                    self.policy,
                    move |expired| {
                        if let Some(registry) = registry.upgrade() {
                            if registry.delete(expired) {
                                info!("Verification record for user {} expired", expired.user_id());
                            }
                        }
                    },
                );
                entry.insert(event.clone());
                debug!("Created verification event for user {}", user_id);
                (event, false)
            }
        }
    }

    pub fn get(&self, user_id: UserId) -> Option<Arc<VerificationEvent>> {
        self.events.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Remove `event` if it is still the user's live event.
    ///
    /// A newer event registered for the same user is left in place.
    pub fn delete(&self, event: &Arc<VerificationEvent>) -> bool {
        self.events
            .remove_if(&event.user_id(), |_, live| Arc::ptr_eq(live, event))
            .is_some()
    }

    /// Copy of every live event; entries may change while this iterates
    pub fn snapshot(&self) -> Vec<EventSnapshot> {
        self.events
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Shared registry type
pub type SharedVerificationRegistry = Arc<VerificationRegistry>;

pub fn create_shared_verification_registry(
    store: Option<SharedStore>,
    policy: TransitionPolicy,
) -> SharedVerificationRegistry {
    Arc::new(VerificationRegistry::new(store, policy))
}
