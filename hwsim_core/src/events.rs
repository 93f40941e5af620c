//! Event pipeline.
//!
//! Objects emit events into a FIFO queue of cache-allocated nodes. The
//! event worker drains the queue and fans each event out to the
//! subscriptions registered for its kind:
//!
//! ```text
//!   emit ──► [node][node][node] ──dispatch──► bucket[kind] snapshot ──► handlers
//! ```
//!
//! Subscriptions live in one bucket per [`EventKind`], each with its own
//! mutex. Handlers run with no queue or bucket lock held, so a handler may
//! emit, subscribe or unsubscribe.

use crate::cache::{CacheBox, ObjectCache};
use crate::error::{CoreError, CoreResult};
use hwsim_common::object::{EventData, EventKind, ObjectId, ObjectKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw identifier.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Event as seen by a handler.
#[derive(Debug, Clone, Copy)]
pub struct EventNotice<'a> {
    /// Emitting object kind.
    pub source_kind: ObjectKind,
    /// Emitting object.
    pub source_id: ObjectId,
    /// Emitting object name.
    pub source_name: &'a str,
    /// Event kind.
    pub kind: EventKind,
    /// Payload.
    pub data: &'a EventData,
}

/// External event callback.
pub type EventCallback = Arc<dyn Fn(&EventNotice<'_>) + Send + Sync>;

/// Who receives a matching event.
#[derive(Clone)]
pub enum EventHandler {
    /// Delivered to the object's `on_event`.
    Object(ObjectId),
    /// Delivered to a callback owned by the caller.
    External(EventCallback),
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventHandler::Object(id) => f.debug_tuple("Object").field(id).finish(),
            EventHandler::External(_) => f.write_str("External(..)"),
        }
    }
}

/// Payload ownership.
#[derive(Debug)]
pub enum EventPayload {
    /// Stored inline in the node.
    Owned(EventData),
    /// Owned by the submitter; the queue's reference is dropped after
    /// dispatch.
    Shared(Arc<EventData>),
}

impl EventPayload {
    fn data(&self) -> &EventData {
        match self {
            EventPayload::Owned(data) => data,
            EventPayload::Shared(data) => data,
        }
    }
}

/// Queued event.
#[derive(Debug)]
pub struct EventNode {
    source_kind: ObjectKind,
    source_id: ObjectId,
    source_name: Arc<str>,
    payload: EventPayload,
}

impl EventNode {
    fn notice(&self) -> EventNotice<'_> {
        let data = self.payload.data();
        EventNotice {
            source_kind: self.source_kind,
            source_id: self.source_id,
            source_name: &self.source_name,
            kind: data.kind(),
            data,
        }
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    source_kind: ObjectKind,
    source: Option<ObjectId>,
    handler: EventHandler,
}

impl Subscription {
    fn matches(&self, kind: ObjectKind, id: ObjectId) -> bool {
        self.source_kind == kind && self.source.is_none_or(|s| s == id)
    }
}

/// Event queue plus per-kind subscription buckets.
pub struct EventQueue {
    cache: ObjectCache<EventNode>,
    queue: Mutex<VecDeque<CacheBox<EventNode>>>,
    buckets: [Mutex<Vec<Subscription>>; EventKind::COUNT],
    next_subscription: AtomicU64,
}

impl EventQueue {
    /// Queue allocating nodes from `cache`.
    pub fn new(cache: ObjectCache<EventNode>) -> Self {
        Self {
            cache,
            queue: Mutex::new(VecDeque::new()),
            buckets: std::array::from_fn(|_| Mutex::new(Vec::new())),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn enqueue(
        &self,
        source_kind: ObjectKind,
        source_id: ObjectId,
        source_name: &Arc<str>,
        payload: EventPayload,
    ) -> CoreResult<()> {
        let node = self.cache.alloc(EventNode {
            source_kind,
            source_id,
            source_name: Arc::clone(source_name),
            payload,
        })?;
        self.queue.lock().push_back(node);
        Ok(())
    }

    /// Queue an event with an inline payload.
    pub fn submit(
        &self,
        source_kind: ObjectKind,
        source_id: ObjectId,
        source_name: &Arc<str>,
        data: EventData,
    ) -> CoreResult<()> {
        self.enqueue(source_kind, source_id, source_name, EventPayload::Owned(data))
    }

    /// Queue an event whose payload is owned by the caller.
    pub fn submit_shared(
        &self,
        source_kind: ObjectKind,
        source_id: ObjectId,
        source_name: &Arc<str>,
        data: Arc<EventData>,
    ) -> CoreResult<()> {
        self.enqueue(source_kind, source_id, source_name, EventPayload::Shared(data))
    }

    /// Register a handler for `event` emitted by objects of `source_kind`,
    /// optionally restricted to one object.
    pub fn subscribe(
        &self,
        event: EventKind,
        source_kind: ObjectKind,
        source: Option<ObjectId>,
        handler: EventHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.buckets[event.index()].lock().push(Subscription {
            id,
            source_kind,
            source,
            handler,
        });
        id
    }

    /// Remove a subscription.
    ///
    /// # Errors
    /// `CoreError::NotSubscribed` if `id` is not registered for `event`.
    pub fn unsubscribe(&self, event: EventKind, id: SubscriptionId) -> CoreResult<()> {
        let mut bucket = self.buckets[event.index()].lock();
        let pos = bucket
            .iter()
            .position(|s| s.id == id)
            .ok_or(CoreError::NotSubscribed(id))?;
        bucket.remove(pos);
        Ok(())
    }

    /// Drop every subscription that delivers to or filters on `object`,
    /// and every queued event it emitted.
    pub fn remove_object(&self, object: ObjectId) -> usize {
        let mut removed = 0;
        for bucket in &self.buckets {
            let mut bucket = bucket.lock();
            let before = bucket.len();
            bucket.retain(|s| {
                s.source != Some(object)
                    && !matches!(s.handler, EventHandler::Object(h) if h == object)
            });
            removed += before - bucket.len();
        }
        self.queue.lock().retain(|node| node.source_id != object);
        removed
    }

    /// Drain the queue in order and deliver every event.
    ///
    /// `External` handlers are called directly; `Object` handlers go
    /// through `deliver`. Returns the number of events dispatched.
    pub fn dispatch(&self, mut deliver: impl FnMut(ObjectId, &EventNotice<'_>)) -> usize {
        let nodes: Vec<CacheBox<EventNode>> = self.queue.lock().drain(..).collect();
        let count = nodes.len();

        for node in nodes {
            let notice = node.notice();
            let handlers: Vec<EventHandler> = self.buckets[notice.kind.index()]
                .lock()
                .iter()
                .filter(|s| s.matches(notice.source_kind, notice.source_id))
                .map(|s| s.handler.clone())
                .collect();

            for handler in &handlers {
                match handler {
                    EventHandler::Object(id) => deliver(*id, &notice),
                    EventHandler::External(callback) => callback(&notice),
                }
            }
        }
        count
    }

    /// Queued events.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Registered subscriptions for `event`.
    pub fn subscriptions(&self, event: EventKind) -> usize {
        self.buckets[event.index()].lock().len()
    }

    /// Discard every queued event.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> EventQueue {
        EventQueue::new(ObjectCache::new("events"))
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, EventHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let handler = EventHandler::External(Arc::new(move |n: &EventNotice<'_>| {
            sink.lock().push(format!("{}:{}", n.source_name, n.kind));
        }));
        (log, handler)
    }

    #[test]
    fn dispatches_in_order_to_matching_subscribers() {
        let events = queue();
        let (log, handler) = recorder();
        let x: Arc<str> = Arc::from("x_motor");
        let y: Arc<str> = Arc::from("y_motor");
        let x_id = ObjectId::from_raw(1);
        let y_id = ObjectId::from_raw(2);

        events.subscribe(
            EventKind::StepperMoveComplete,
            ObjectKind::Stepper,
            None,
            handler,
        );

        events
            .submit(ObjectKind::Stepper, x_id, &x, EventData::StepperMoveComplete { steps: 1 })
            .unwrap();
        events
            .submit_shared(
                ObjectKind::Stepper,
                y_id,
                &y,
                Arc::new(EventData::StepperMoveComplete { steps: 2 }),
            )
            .unwrap();
        events
            .submit(ObjectKind::Endstop, x_id, &x, EventData::EndstopTriggered { triggered: true })
            .unwrap();

        assert_eq!(events.dispatch(|_, _| {}), 3);
        assert_eq!(
            *log.lock(),
            vec!["x_motor:StepperMoveComplete", "y_motor:StepperMoveComplete"]
        );
        assert_eq!(events.pending(), 0);
    }

    #[test]
    fn source_filter_restricts_delivery() {
        let events = queue();
        let name: Arc<str> = Arc::from("z");
        let watched = ObjectId::from_raw(7);
        let subscriber = ObjectId::from_raw(9);

        events.subscribe(
            EventKind::AxisHomed,
            ObjectKind::Axis,
            Some(watched),
            EventHandler::Object(subscriber),
        );
        for id in [watched, ObjectId::from_raw(8)] {
            events
                .submit(ObjectKind::Axis, id, &name, EventData::AxisHomed { position: 0.0 })
                .unwrap();
        }

        let mut delivered = Vec::new();
        events.dispatch(|to, notice| delivered.push((to, notice.source_id)));
        assert_eq!(delivered, vec![(subscriber, watched)]);
    }

    #[test]
    fn double_unsubscribe_reports_not_subscribed() {
        let events = queue();
        let (_, handler) = recorder();
        let id = events.subscribe(EventKind::ProbeTriggered, ObjectKind::Probe, None, handler);
        assert!(events.unsubscribe(EventKind::ProbeTriggered, id).is_ok());
        assert!(matches!(
            events.unsubscribe(EventKind::ProbeTriggered, id),
            Err(CoreError::NotSubscribed(s)) if s == id
        ));
    }

    #[test]
    fn shared_payload_released_after_dispatch() {
        let events = queue();
        let name: Arc<str> = Arc::from("bed");
        let payload = Arc::new(EventData::HeaterTempReached { temperature: 60.0 });
        events
            .submit_shared(ObjectKind::Heater, ObjectId::from_raw(1), &name, Arc::clone(&payload))
            .unwrap();
        assert_eq!(Arc::strong_count(&payload), 2);
        events.dispatch(|_, _| {});
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn remove_object_purges_subscriptions_and_queue() {
        let events = queue();
        let gone = ObjectId::from_raw(3);
        let name: Arc<str> = Arc::from("x");
        events.subscribe(EventKind::AxisHomed, ObjectKind::Axis, None, EventHandler::Object(gone));
        events.subscribe(EventKind::AxisHomed, ObjectKind::Axis, Some(gone), recorder().1);
        events.subscribe(EventKind::AxisHomed, ObjectKind::Axis, None, recorder().1);
        events
            .submit(ObjectKind::Axis, gone, &name, EventData::AxisHomed { position: 0.0 })
            .unwrap();

        assert_eq!(events.remove_object(gone), 2);
        assert_eq!(events.subscriptions(EventKind::AxisHomed), 1);
        assert_eq!(events.pending(), 0);
    }
}
