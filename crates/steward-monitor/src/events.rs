//! The event bus.
//!
//! An append-only, totally ordered log of every decision the monitor
//! takes, plus LISTEN-style notification channels for observers that
//! would rather push than poll.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use tracing::debug;

use steward_types::{FormationId, GroupId, NodeId, NodeName, NodeState, Timestamp};

// ============================================================================
// Event
// ============================================================================

/// Monotonic identifier of an event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventId(u64);

impl EventId {
    /// Creates an event ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the ID as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    fn next(&self) -> Self {
        EventId(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: Timestamp,
    pub formation_id: FormationId,
    pub group_id: GroupId,
    pub node_id: NodeId,
    pub node_name: NodeName,
    /// The node's reported state at the time of the event.
    pub reported_state: NodeState,
    /// The node's goal state after the event.
    pub goal_state: NodeState,
    pub description: String,
}

// ============================================================================
// Notifications
// ============================================================================

/// The channel a notification is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyChannel {
    /// Goal-state changes, payload `<formation>/<group>/<node_id>/<goal>`.
    State,
    /// Informational messages, free form.
    Log,
}

/// One published notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: NotifyChannel,
    pub payload: String,
}

impl Notification {
    /// Builds the `state` channel payload for a goal change.
    pub fn state_change(
        formation: &FormationId,
        group: GroupId,
        node: NodeId,
        goal: NodeState,
    ) -> Self {
        Self {
            channel: NotifyChannel::State,
            payload: format!("{formation}/{group}/{node}/{goal}"),
        }
    }

    /// Builds a `log` channel message.
    pub fn log(payload: impl Into<String>) -> Self {
        Self {
            channel: NotifyChannel::Log,
            payload: payload.into(),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// The append-only event log with its subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<Event>,
    last_id: EventId,
    subscribers: Vec<Sender<Notification>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event, assigning it the next ID.
    pub fn append(
        &mut self,
        timestamp: Timestamp,
        formation_id: FormationId,
        group_id: GroupId,
        node_id: NodeId,
        node_name: NodeName,
        reported_state: NodeState,
        goal_state: NodeState,
        description: impl Into<String>,
    ) -> &Event {
        self.last_id = self.last_id.next();
        let event = Event {
            event_id: self.last_id,
            timestamp,
            formation_id,
            group_id,
            node_id,
            node_name,
            reported_state,
            goal_state,
            description: description.into(),
        };
        debug!(
            event = event.event_id.as_u64(),
            node = %event.node_id,
            goal = %event.goal_state,
            "{}", event.description
        );
        self.events.push(event);
        self.events.last().expect("just pushed")
    }

    /// The last `limit` events of a formation (and optionally one
    /// group), most recent first.
    pub fn last_events(
        &self,
        formation: Option<&FormationId>,
        group: Option<GroupId>,
        limit: usize,
    ) -> Vec<Event> {
        self.events
            .iter()
            .rev()
            .filter(|e| formation.map_or(true, |f| &e.formation_id == f))
            .filter(|e| group.map_or(true, |g| e.group_id == g))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every event, in append order. Mostly for invariant checks.
    pub fn all_events(&self) -> &[Event] {
        &self.events
    }

    /// Registers a notification subscriber.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Publishes a notification to every live subscriber.
    ///
    /// Subscribers that went away are dropped silently.
    pub fn notify(&mut self, notification: &Notification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_n(bus: &mut EventBus, n: u64) {
        for i in 0..n {
            bus.append(
                Timestamp::from_secs(i),
                FormationId::new("default"),
                GroupId::ZERO,
                NodeId::new(1),
                NodeName::for_node(NodeId::new(1)),
                NodeState::Single,
                NodeState::Single,
                format!("event {i}"),
            );
        }
    }

    #[test]
    fn event_ids_are_strictly_monotonic() {
        let mut bus = EventBus::new();
        append_n(&mut bus, 5);
        let ids: Vec<u64> = bus.all_events().iter().map(|e| e.event_id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn last_events_is_reverse_chronological_and_limited() {
        let mut bus = EventBus::new();
        append_n(&mut bus, 10);
        let recent = bus.last_events(Some(&FormationId::new("default")), None, 3);
        let ids: Vec<u64> = recent.iter().map(|e| e.event_id.as_u64()).collect();
        assert_eq!(ids, vec![10, 9, 8]);
    }

    #[test]
    fn last_events_filters_by_formation() {
        let mut bus = EventBus::new();
        append_n(&mut bus, 2);
        assert!(bus
            .last_events(Some(&FormationId::new("other")), None, 10)
            .is_empty());
    }

    #[test]
    fn events_serialize_with_state_keywords() {
        let mut bus = EventBus::new();
        bus.append(
            Timestamp::from_secs(1),
            FormationId::new("default"),
            GroupId::ZERO,
            NodeId::new(2),
            NodeName::for_node(NodeId::new(2)),
            NodeState::Catchingup,
            NodeState::Secondary,
            "caught up",
        );
        let json = serde_json::to_string(&bus.all_events()[0]).unwrap();
        assert!(json.contains("\"reported_state\":\"catchingup\""));
        assert!(json.contains("\"goal_state\":\"secondary\""));
    }

    #[test]
    fn notify_reaches_live_subscribers_and_drops_dead_ones() {
        let mut bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        drop(rx2);

        bus.notify(&Notification::state_change(
            &FormationId::new("default"),
            GroupId::ZERO,
            NodeId::new(2),
            NodeState::WaitPrimary,
        ));

        let n = rx1.try_recv().unwrap();
        assert_eq!(n.channel, NotifyChannel::State);
        assert_eq!(n.payload, "default/0/2/wait_primary");
    }
}
