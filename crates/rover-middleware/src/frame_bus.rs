//! Single-slot, many-viewer live frame broadcast.
//!
//! [`FrameBus`] keeps exactly one [`Frame`]: the most recently published one.
//! Publishing replaces it and wakes every waiting [`FrameSubscriber`].  There
//! is no queue, so a viewer that is busy sending a frame simply gets the
//! newest frame on its next wait; memory stays at one frame no matter how
//! many viewers are connected or how slow they are.
//!
//! Built on [`tokio::sync::watch`], which provides the atomic swap and the
//! notify-all wake-up.

use std::fmt;
use std::sync::Arc;

use rover_types::RoverError;
use tokio::sync::watch;

/// One complete encoded image.  Cheap to clone; the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Arc<[u8]>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Frame(bytes.into())
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Frame(bytes.into())
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({} bytes)", self.0.len())
    }
}

/// Producer side of the live frame broadcast.  Clones share the same slot.
#[derive(Clone, Debug)]
pub struct FrameBus {
    sender: Arc<watch::Sender<Option<Frame>>>,
}

impl FrameBus {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the current frame and wake every waiting viewer.
    ///
    /// Returns the number of subscribed viewers at the time of publishing.
    pub fn publish(&self, frame: Frame) -> usize {
        self.sender.send_replace(Some(frame));
        self.sender.receiver_count()
    }

    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// The frame currently held, if any has been published.
    pub fn latest(&self) -> Option<Frame> {
        self.sender.borrow().clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of the live frame broadcast, one per viewer.
pub struct FrameSubscriber {
    receiver: watch::Receiver<Option<Frame>>,
}

impl FrameSubscriber {
    /// Wait for a frame published after this call began.
    ///
    /// Frames published while the viewer was not waiting are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::StreamClosed`] once every [`FrameBus`] handle
    /// has been dropped.
    pub async fn wait_for_next(&mut self) -> Result<Frame, RoverError> {
        drop(self.receiver.borrow_and_update());
        loop {
            self.receiver
                .changed()
                .await
                .map_err(|_| RoverError::StreamClosed)?;
            if let Some(frame) = self.receiver.borrow_and_update().clone() {
                return Ok(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::from(vec![0xFF, 0xD8, tag])
    }

    #[tokio::test]
    async fn waiting_viewer_receives_next_publish() {
        let bus = FrameBus::new();
        let mut viewer = bus.subscribe();

        let waiter = tokio::spawn(async move { viewer.wait_for_next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(frame(1));

        assert_eq!(waiter.await.unwrap().unwrap(), frame(1));
    }

    #[tokio::test]
    async fn frame_published_before_wait_is_not_returned() {
        let bus = FrameBus::new();
        let mut viewer = bus.subscribe();
        bus.publish(frame(1));

        let waiter = tokio::spawn(async move { viewer.wait_for_next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(frame(2));

        assert_eq!(waiter.await.unwrap().unwrap(), frame(2));
    }

    #[tokio::test]
    async fn every_viewer_gets_the_same_frame() {
        let bus = FrameBus::new();
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let mut viewer = bus.subscribe();
                tokio::spawn(async move { viewer.wait_for_next().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(bus.publish(frame(7)), 8);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), frame(7));
        }
    }

    #[tokio::test]
    async fn slow_viewer_gets_latest_not_backlog() {
        let bus = FrameBus::new();
        let mut viewer = bus.subscribe();

        let waiter = tokio::spawn(async move {
            let first = viewer.wait_for_next().await.unwrap();
            // Busy "sending" while the producer keeps publishing.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let second = viewer.wait_for_next().await.unwrap();
            (first, second)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish(frame(1));
        for tag in 2..100 {
            bus.publish(frame(tag));
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        bus.publish(frame(200));

        let (first, second) = waiter.await.unwrap();
        // The viewer only ran after the burst, so it sees the burst's last frame.
        assert_eq!(first, frame(99));
        assert_eq!(second, frame(200));
    }

    #[test]
    fn bus_retains_only_one_frame() {
        let bus = FrameBus::new();
        let _idle_viewer = bus.subscribe();

        let old = frame(1);
        bus.publish(old.clone());
        assert_eq!(Arc::strong_count(&old.0), 2);

        for tag in 2..=255 {
            bus.publish(frame(tag));
        }
        // Only the test still references the first frame.
        assert_eq!(Arc::strong_count(&old.0), 1);
        assert_eq!(bus.latest(), Some(frame(255)));
    }

    #[tokio::test]
    async fn dropped_bus_closes_viewers() {
        let bus = FrameBus::new();
        let mut viewer = bus.subscribe();
        drop(bus);

        assert!(matches!(
            viewer.wait_for_next().await,
            Err(RoverError::StreamClosed)
        ));
    }

    #[test]
    fn viewer_count_tracks_subscriptions() {
        let bus = FrameBus::new();
        assert_eq!(bus.viewer_count(), 0);
        let a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.viewer_count(), 2);
        drop(a);
        assert_eq!(bus.viewer_count(), 1);
    }
}
