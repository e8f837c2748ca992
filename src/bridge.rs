//! Event bridge
//!
//! Single entry point translating engine event codes into state machine
//! handler calls. The background driver dispatches the events queued during
//! each engine step; engines that raise events from their own context (an
//! interrupt handler, a second thread, or synchronously from inside one of
//! their [`MacEngine`] methods) deliver them through an [`EventBridge`]
//! handle instead.

use core::fmt;
use std::sync::{Arc, Weak};

use log::{trace, warn};

use crate::device::{Shared, SessionStateMachine, TxCompletion};
use crate::engine::{EngineEvent, EventCode, MacEngine};

/// Route one event code to its handler. Returns the transmit outcome when the
/// event completed an uplink.
pub fn dispatch<E: MacEngine>(
    machine: &mut SessionStateMachine,
    engine: &mut E,
    code: EventCode,
) -> Option<TxCompletion> {
    let event = match EngineEvent::try_from(code) {
        Ok(event) => event,
        Err(unknown) => {
            warn!("Unhandled event: {}", unknown);
            return None;
        }
    };
    trace!("Event {}", event);

    match event {
        EngineEvent::Joining => machine.on_joining(),
        EngineEvent::Joined => machine.on_joined(engine),
        EngineEvent::JoinTxComplete => machine.on_join_tx_complete(),
        EngineEvent::JoinFailed => machine.on_join_failed(),
        EngineEvent::TxStart => machine.on_tx_start(),
        EngineEvent::TxComplete => return machine.on_tx_complete(engine),
        other => trace!("Unhandled event: {}", other),
    }
    None
}

/// Handle for delivering engine events to one device
pub struct EventBridge<E: MacEngine> {
    shared: Weak<Shared<E>>,
}

impl<E: MacEngine> EventBridge<E> {
    pub(crate) fn new(shared: &Arc<Shared<E>>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }

    /// Deliver one event code. Takes the device state lock for the
    /// transition and runs the message callback after releasing it.
    ///
    /// Called from inside an engine method, while the device already holds
    /// its state lock on this thread, the event is queued instead and
    /// dispatched when that transition finishes.
    pub fn dispatch(&self, code: impl Into<EventCode>) {
        let code = code.into();
        let Some(shared) = self.shared.upgrade() else {
            warn!("Event {:?} for a dropped device, ignored", code);
            return;
        };
        if shared.holds_core() {
            trace!("Event {:?} raised inside a transition, deferred", code);
            shared.defer(code);
            return;
        }
        shared.transition(|machine, engine, completions| {
            completions.extend(dispatch(machine, engine, code));
        });
        shared.flush();
    }
}

impl<E: MacEngine> fmt::Debug for EventBridge<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("attached", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl<E: MacEngine> Clone for EventBridge<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
