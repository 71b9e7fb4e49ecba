//! Typed publish/subscribe channels with synchronous, ordered delivery.

use std::fmt;

use crate::models::{CoverageReport, TestRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Box<dyn FnMut(&T)>;

/// Delivers each published value to every current subscriber, in the order
/// they subscribed, before `publish` returns.
pub struct Channel<T> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<T>)>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            handlers: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}

impl<T> Channel<T> {
    pub fn subscribe(&mut self, handler: impl FnMut(&T) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sid, _)| *sid != id);
        self.handlers.len() != before
    }

    pub fn publish(&mut self, value: &T) {
        for (_, handler) in &mut self.handlers {
            handler(value);
        }
    }
}

/// Notifications raised by the engine after it has applied a service event.
#[derive(Debug, Default)]
pub struct EventBus {
    pub test_started: Channel<TestRecord>,
    pub test_completed: Channel<TestRecord>,
    pub coverage_updated: Channel<CoverageReport>,
}
