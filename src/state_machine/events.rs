//! Publish/subscribe plumbing for coordinator events.
//!
//! Every value the coordinator wants the outside world to see (the current
//! phase, the round parameters, the shared public key, the global model and
//! the round's aggregate insight) is broadcast on its own watch channel.
//! Subscribers always observe the latest value and can await changes, which
//! doubles as the readiness handshake: a participant knows the coordinator
//! accepts submissions the moment it observes the collect phase event, no
//! fixed startup delays anywhere.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    crypto::{Ciphertext, PublicKey},
    model::Model,
    state_machine::{
        coordinator::RoundParameters,
        phases::PhaseName,
    },
    RoundId,
};

/// An event emitted by the coordinator.
#[derive(Debug, Clone)]
pub struct Event<E> {
    /// The round in which the event was emitted.
    pub round_id: RoundId,
    /// The event itself.
    pub event: E,
}

/// Global model updates.
#[derive(Debug, Clone)]
pub enum ModelUpdate {
    Invalidate,
    New(Arc<Model>),
}

/// Aggregate insight ciphertext updates. `New` is intended for the
/// decryption authority; the coordinator itself never decrypts it.
#[derive(Debug, Clone)]
pub enum InsightUpdate {
    Invalidate,
    New(Arc<Ciphertext>),
}

/// A convenience type to emit any coordinator event.
pub struct EventPublisher {
    round_id: RoundId,
    keys_tx: EventBroadcaster<Arc<PublicKey>>,
    params_tx: EventBroadcaster<RoundParameters>,
    phase_tx: EventBroadcaster<PhaseName>,
    model_tx: EventBroadcaster<ModelUpdate>,
    insight_tx: EventBroadcaster<InsightUpdate>,
}

/// The `EventSubscriber` hands out `EventListener`s for any coordinator
/// event.
#[derive(Clone)]
pub struct EventSubscriber {
    keys_rx: EventListener<Arc<PublicKey>>,
    params_rx: EventListener<RoundParameters>,
    phase_rx: EventListener<PhaseName>,
    model_rx: EventListener<ModelUpdate>,
    insight_rx: EventListener<InsightUpdate>,
}

impl EventPublisher {
    /// Initializes a new event publisher with the given initial events.
    pub fn init(
        round_id: RoundId,
        public_key: Arc<PublicKey>,
        params: RoundParameters,
        phase: PhaseName,
    ) -> (Self, EventSubscriber) {
        let (keys_tx, keys_rx) = watch::channel(Event {
            round_id,
            event: public_key,
        });
        let (params_tx, params_rx) = watch::channel(Event {
            round_id,
            event: params,
        });
        let (phase_tx, phase_rx) = watch::channel(Event {
            round_id,
            event: phase,
        });
        let (model_tx, model_rx) = watch::channel(Event {
            round_id,
            event: ModelUpdate::Invalidate,
        });
        let (insight_tx, insight_rx) = watch::channel(Event {
            round_id,
            event: InsightUpdate::Invalidate,
        });

        let publisher = EventPublisher {
            round_id,
            keys_tx: keys_tx.into(),
            params_tx: params_tx.into(),
            phase_tx: phase_tx.into(),
            model_tx: model_tx.into(),
            insight_tx: insight_tx.into(),
        };

        let subscriber = EventSubscriber {
            keys_rx: keys_rx.into(),
            params_rx: params_rx.into(),
            phase_rx: phase_rx.into(),
            model_rx: model_rx.into(),
            insight_rx: insight_rx.into(),
        };

        (publisher, subscriber)
    }

    /// Sets the round id attached to subsequently broadcast events.
    pub fn set_round_id(&mut self, round_id: RoundId) {
        self.round_id = round_id;
    }

    fn event<E>(&self, event: E) -> Event<E> {
        Event {
            round_id: self.round_id,
            event,
        }
    }

    /// Emits a public key event.
    pub fn broadcast_keys(&mut self, public_key: Arc<PublicKey>) {
        let _ = self.keys_tx.broadcast(self.event(public_key));
    }

    /// Emits a round parameters event.
    pub fn broadcast_params(&mut self, params: RoundParameters) {
        let _ = self.params_tx.broadcast(self.event(params));
    }

    /// Emits a phase event.
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        let _ = self.phase_tx.broadcast(self.event(phase));
    }

    /// Emits a global model event.
    pub fn broadcast_model(&mut self, update: ModelUpdate) {
        let _ = self.model_tx.broadcast(self.event(update));
    }

    /// Emits an aggregate insight event.
    pub fn broadcast_insight(&mut self, update: InsightUpdate) {
        let _ = self.insight_tx.broadcast(self.event(update));
    }
}

impl EventSubscriber {
    /// Gets a listener for public key events.
    pub fn keys_listener(&self) -> EventListener<Arc<PublicKey>> {
        self.keys_rx.clone()
    }

    /// Gets a listener for round parameters events.
    pub fn params_listener(&self) -> EventListener<RoundParameters> {
        self.params_rx.clone()
    }

    /// Gets a listener for phase events.
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        self.phase_rx.clone()
    }

    /// Gets a listener for global model events.
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        self.model_rx.clone()
    }

    /// Gets a listener for aggregate insight events.
    pub fn insight_listener(&self) -> EventListener<InsightUpdate> {
        self.insight_rx.clone()
    }
}

/// A listener for coordinator events. It can be used to retrieve the latest
/// event of its kind, or to wait for a new one.
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> From<watch::Receiver<Event<E>>> for EventListener<E> {
    fn from(receiver: watch::Receiver<Event<E>>) -> Self {
        EventListener(receiver)
    }
}

impl<E: Clone> EventListener<E> {
    /// The most recent event of this kind.
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Waits for the next event of this kind. Returns `None` once the
    /// coordinator has shut down and no further events can arrive.
    pub async fn changed(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.0.borrow().clone())
    }
}

/// The sending half of an event channel.
#[derive(Debug)]
pub struct EventBroadcaster<E>(watch::Sender<Event<E>>);

impl<E> EventBroadcaster<E> {
    /// Sends `event` to all listeners.
    fn broadcast(&self, event: Event<E>) {
        // an error means there's no listener; this is fine
        let _ = self.0.send(event);
    }
}

impl<E> From<watch::Sender<Event<E>>> for EventBroadcaster<E> {
    fn from(sender: watch::Sender<Event<E>>) -> Self {
        Self(sender)
    }
}
