//! Hand-off from the hook callback to the application context
//!
//! The callback only pushes small copyable notifications onto an
//! unbounded queue. Rendering and every other application-visible
//! effect happen on the receiving side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use super::chord::Chord;
use super::codec::{render_chord, KeyboardLayout};
use crate::events::HotkeyEvent;

/// Raw notification posted from the hook context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The armed chord was pressed
    Activated,
    /// A recording session captured this chord
    Captured(Chord),
}

/// Sending half, owned by the hook core
#[derive(Debug, Clone)]
pub struct Poster {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Poster {
    /// Queue a notification without blocking
    pub fn post(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!(?notification, "dispatcher gone, notification dropped");
        }
    }
}

/// Receiving half, polled from the application's main loop
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Notification>,
    layout: Arc<dyn KeyboardLayout>,
}

impl Dispatcher {
    /// Next event in posting order, `None` once every poster is dropped
    pub async fn next(&mut self) -> Option<HotkeyEvent> {
        let notification = self.rx.recv().await?;
        Some(self.deliver(notification))
    }

    /// Next already-queued event, without waiting
    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<HotkeyEvent> {
        let notification = self.rx.try_recv().ok()?;
        Some(self.deliver(notification))
    }

    fn deliver(&self, notification: Notification) -> HotkeyEvent {
        match notification {
            Notification::Activated => HotkeyEvent::Activated,
            Notification::Captured(chord) => HotkeyEvent::Captured {
                display: render_chord(&chord, self.layout.as_ref()),
            },
        }
    }
}

/// Create a connected poster/dispatcher pair
pub fn channel(layout: Arc<dyn KeyboardLayout>) -> (Poster, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Poster { tx }, Dispatcher { rx, layout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::chord::{KeyCode, Modifiers};
    use crate::hotkey::codec::UsLayout;

    #[test]
    fn test_delivery_is_fifo() {
        let (poster, mut dispatcher) = channel(Arc::new(UsLayout));
        let chord = Chord::new(Modifiers::CONTROL | Modifiers::ALT, KeyCode(u16::from(b'K')));

        poster.post(Notification::Activated);
        poster.post(Notification::Captured(chord));
        poster.post(Notification::Activated);
        drop(poster);

        tokio_test::block_on(async {
            assert_eq!(dispatcher.next().await, Some(HotkeyEvent::Activated));
            assert_eq!(
                dispatcher.next().await,
                Some(HotkeyEvent::Captured {
                    display: "Ctrl+Alt+K".into()
                })
            );
            assert_eq!(dispatcher.next().await, Some(HotkeyEvent::Activated));
            assert_eq!(dispatcher.next().await, None);
        });
    }

    #[test]
    fn test_post_after_dispatcher_dropped() {
        let (poster, dispatcher) = channel(Arc::new(UsLayout));
        drop(dispatcher);
        poster.post(Notification::Activated);
    }
}
