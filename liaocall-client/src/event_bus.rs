/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Per-session event bus.
//!
//! An MPMC broadcast channel of [`CallEvent`]s. Each [`crate::CallClient`]
//! owns its own bus, so independent sessions in one process never share a
//! stream; subscribe through the client.
//!
//! Emission is non-blocking: when the channel is full the oldest event is
//! dropped to make room, and a session with no subscribers simply discards
//! its events.

use crate::constants::EVENT_BUS_CAPACITY;
use crate::events::CallEvent;
use async_broadcast::{broadcast, InactiveReceiver, Receiver, Sender};

pub struct CallEventBus {
    sender: Sender<CallEvent>,
    // Keeps the channel open while no subscriber is attached.
    _keepalive: InactiveReceiver<CallEvent>,
}

impl CallEventBus {
    pub fn new() -> Self {
        let (mut sender, receiver) = broadcast(EVENT_BUS_CAPACITY);
        sender.set_overflow(true);
        Self {
            sender,
            _keepalive: receiver.deactivate(),
        }
    }

    /// Subscribe to all future events of this session.
    pub fn subscribe(&self) -> Receiver<CallEvent> {
        self.sender.new_receiver()
    }

    /// Emit an event to all subscribers. Never blocks.
    pub fn emit(&self, event: CallEvent) {
        let _ = self.sender.try_broadcast(event);
    }
}

impl Default for CallEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liaocall_types::PeerId;

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = CallEventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(CallEvent::RoomJoined);
        bus.emit(CallEvent::ParticipantAdded(PeerId::from("b2")));

        assert!(matches!(rx.try_recv().unwrap(), CallEvent::RoomJoined));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CallEvent::ParticipantAdded(p) if p == PeerId::from("b2")
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = CallEventBus::new();
        bus.emit(CallEvent::RoomLeft);
        // A later subscriber only sees later events.
        let mut rx = bus.subscribe();
        bus.emit(CallEvent::RoomJoined);
        assert!(matches!(rx.try_recv().unwrap(), CallEvent::RoomJoined));
    }

    #[test]
    fn independent_buses_do_not_cross() {
        let bus_a = CallEventBus::new();
        let bus_b = CallEventBus::new();
        let mut rx_b = bus_b.subscribe();
        bus_a.emit(CallEvent::RoomJoined);
        assert!(rx_b.try_recv().is_err());
    }
}
