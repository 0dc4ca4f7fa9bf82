use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::debug;

use crate::device::types::DeviceEvent;

/**
 * Broadcasts device events to every subscriber. Delivery is fire-and-forget: each
 * subscriber gets an unbounded queue, and subscribers that went away are dropped.
 */
#[derive(Clone, Default)]
pub struct EventSink {
    senders: Arc<Mutex<Vec<UnboundedSender<DeviceEvent>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        EventSink::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = unbounded::<DeviceEvent>();
        self.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: DeviceEvent) {
        let mut senders = self.lock();
        senders.retain(|sender| {
            match sender.unbounded_send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    debug!("Dropping closed event subscriber");
                    false
                },
            }
        });
    }

    pub fn progress(&self, value: f32) {
        self.emit(DeviceEvent::Progress(value.clamp(0.0, 1.0)));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<DeviceEvent>>> {
        // a panic while holding this lock can not leave the vec in a broken state
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
