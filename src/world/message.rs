//! The World's message bus.
//!
//! Three immediate queue types, named by their observable delivery
//! order rather than by implementation detail:
//!
//! - `Deferred` — the common case. Anything posted during this frame's
//!   simulation is delivered at the start of next frame.
//! - `Urgent` — delivered before the next phase boundary within the
//!   *same* frame, used for recursive delivery to descendants that were
//!   just spawned this frame.
//! - `PostInit` — delivered exactly once, right after the owning
//!   component init batch finishes `OnSimulationStarted`; only the init
//!   batch machinery writes to this queue.
//!
//! Each also has a timed counterpart: a message posted with a `due` time
//! sits in the timed queue until `now >= due`, then moves into its base
//! queue for delivery on the next flush.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use crate::reflection::Variant;

use super::component::ComponentId;
use super::object::GameObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageQueueType {
    Deferred,
    PostInit,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Object(GameObjectId),
    Component(ComponentId),
}

#[derive(Debug, Clone)]
pub struct Message {
    pub type_id: u16,
    pub target: MessageTarget,
    /// When set, delivery also recurses into every descendant of the
    /// target object.
    pub recursive: bool,
    pub payload: Variant,
}

struct TimedEntry {
    due: f64,
    seq: u64,
    queue_type: MessageQueueType,
    message: Message,
}

impl PartialEq for TimedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for TimedEntry {}

impl PartialOrd for TimedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest `due` (and
        // for ties, the earliest insertion) pops first.
        other
            .due
            .partial_cmp(&self.due)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Owns every queue the World dispatches through.
#[derive(Default)]
pub struct MessageBus {
    deferred: Vec<Message>,
    post_init: Vec<Message>,
    urgent: Vec<Message>,
    timed: BinaryHeap<TimedEntry>,
    next_seq: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, queue_type: MessageQueueType, message: Message) {
        match queue_type {
            MessageQueueType::Deferred => self.deferred.push(message),
            MessageQueueType::PostInit => self.post_init.push(message),
            MessageQueueType::Urgent => self.urgent.push(message),
        }
    }

    pub fn post_timed(&mut self, queue_type: MessageQueueType, message: Message, due: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timed.push(TimedEntry { due, seq, queue_type, message });
    }

    /// Moves every timed message whose `due` has passed into its base
    /// queue. A message with `due == now` is delivered this flush.
    pub fn advance_timed(&mut self, now: f64) {
        while let Some(entry) = self.timed.peek() {
            if entry.due > now {
                break;
            }
            let entry = self.timed.pop().unwrap();
            self.post(entry.queue_type, entry.message);
        }
    }

    /// Drains one queue's current contents for delivery, leaving it
    /// empty for messages posted during this flush.
    pub fn drain(&mut self, queue_type: MessageQueueType) -> Vec<Message> {
        match queue_type {
            MessageQueueType::Deferred => std::mem::take(&mut self.deferred),
            MessageQueueType::PostInit => std::mem::take(&mut self.post_init),
            MessageQueueType::Urgent => std::mem::take(&mut self.urgent),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty() && self.post_init.is_empty() && self.urgent.is_empty() && self.timed.is_empty()
    }

    pub fn pending_timed(&self) -> usize {
        self.timed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(type_id: u16, target: GameObjectId) -> Message {
        Message {
            type_id,
            target: MessageTarget::Object(target),
            recursive: false,
            payload: Variant::Invalid,
        }
    }

    #[test]
    fn urgent_and_deferred_drain_independently() {
        let mut bus = MessageBus::new();
        let obj = GameObjectId::new(0, 0);
        bus.post(MessageQueueType::Deferred, msg(1, obj));
        bus.post(MessageQueueType::Urgent, msg(2, obj));

        let urgent = bus.drain(MessageQueueType::Urgent);
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].type_id, 2);

        let deferred = bus.drain(MessageQueueType::Deferred);
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].type_id, 1);
    }

    #[test]
    fn timed_message_delivers_exactly_on_due() {
        let mut bus = MessageBus::new();
        let obj = GameObjectId::new(0, 0);
        bus.post_timed(MessageQueueType::Deferred, msg(9, obj), 5.0);

        bus.advance_timed(4.9);
        assert!(bus.drain(MessageQueueType::Deferred).is_empty());

        bus.advance_timed(5.0);
        let drained = bus.drain(MessageQueueType::Deferred);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].type_id, 9);
    }

    #[test]
    fn timed_messages_pop_in_due_order() {
        let mut bus = MessageBus::new();
        let obj = GameObjectId::new(0, 0);
        bus.post_timed(MessageQueueType::Deferred, msg(2, obj), 2.0);
        bus.post_timed(MessageQueueType::Deferred, msg(1, obj), 1.0);
        bus.advance_timed(10.0);
        let drained = bus.drain(MessageQueueType::Deferred);
        assert_eq!(drained.iter().map(|m| m.type_id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
