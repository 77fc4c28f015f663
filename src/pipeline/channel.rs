//! Delivery channel between the acquisition thread and the consumer.
//!
//! Frames go into a one-frame slot: publishing while the consumer still has
//! not taken the previous frame replaces it. Control events (state changes,
//! errors, end-of-stream) are queued and never dropped. A control event
//! published while a frame is waiting in the slot is queued behind that
//! frame, so the consumer sees everything in publication order.

use std::collections::VecDeque;
use std::sync::mpsc::{RecvError, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{FailureReason, PipelineState};
use crate::frame::Frame;

/// Event delivered to the consumer.
#[derive(Debug)]
pub enum PipelineEvent {
    FrameReady(Frame),
    StreamEnded,
    Error(FailureReason),
    StateChanged(PipelineState),
}

impl PipelineEvent {
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::FrameReady(_))
    }
}

#[derive(Default)]
struct Inner {
    slot: Option<Frame>,
    queue: VecDeque<PipelineEvent>,
    disconnected: bool,
}

impl Inner {
    fn pop(&mut self) -> Option<PipelineEvent> {
        self.queue
            .pop_front()
            .or_else(|| self.slot.take().map(PipelineEvent::FrameReady))
    }
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Producer half, owned by the acquisition loop.
pub(crate) struct EventSender {
    shared: Arc<Shared>,
}

/// Consumer half. Single consumer; not cloneable.
pub struct EventReceiver {
    shared: Arc<Shared>,
}

pub(crate) fn delivery_channel() -> (EventSender, EventReceiver) {
    let shared = Arc::new(Shared::default());
    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

impl EventSender {
    /// Put a frame in the slot. Returns true if an unread frame was replaced.
    pub(crate) fn publish_frame(&self, frame: Frame) -> bool {
        let replaced = {
            let mut inner = self.shared.lock();
            inner.slot.replace(frame).is_some()
        };
        self.shared.ready.notify_one();
        replaced
    }

    /// Queue a control event behind any frame still waiting in the slot.
    pub(crate) fn publish(&self, event: PipelineEvent) {
        {
            let mut inner = self.shared.lock();
            if let Some(frame) = inner.slot.take() {
                inner.queue.push_back(PipelineEvent::FrameReady(frame));
            }
            inner.queue.push_back(event);
        }
        self.shared.ready.notify_one();
    }

    /// Drop every frame the consumer has not taken yet. Returns how many.
    pub(crate) fn discard_frames(&self) -> usize {
        let mut inner = self.shared.lock();
        let mut discarded = usize::from(inner.slot.take().is_some());
        let before = inner.queue.len();
        inner.queue.retain(|event| !event.is_frame());
        discarded += before - inner.queue.len();
        discarded
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        self.shared.lock().disconnected = true;
        self.shared.ready.notify_all();
    }
}

impl EventReceiver {
    /// Next event if one is ready.
    pub fn try_recv(&self) -> Result<PipelineEvent, TryRecvError> {
        let mut inner = self.shared.lock();
        match inner.pop() {
            Some(event) => Ok(event),
            None if inner.disconnected => Err(TryRecvError::Disconnected),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Block until an event arrives or the pipeline is gone.
    pub fn recv(&self) -> Result<PipelineEvent, RecvError> {
        let mut inner = self.shared.lock();
        loop {
            if let Some(event) = inner.pop() {
                return Ok(event);
            }
            if inner.disconnected {
                return Err(RecvError);
            }
            inner = self
                .shared
                .ready
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<PipelineEvent, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        loop {
            if let Some(event) = inner.pop() {
                return Ok(event);
            }
            if inner.disconnected {
                return Err(RecvTimeoutError::Disconnected);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvTimeoutError::Timeout);
            }
            inner = self
                .shared
                .ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    /// Drain whatever is ready without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = PipelineEvent> + '_ {
        std::iter::from_fn(move || self.try_recv().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::filled(2, 2, [tag, tag, tag]).unwrap()
    }

    fn tag(event: &PipelineEvent) -> Option<u8> {
        match event {
            PipelineEvent::FrameReady(frame) => frame.pixel(0, 0).map(|p| p[0]),
            _ => None,
        }
    }

    #[test]
    fn newest_frame_wins() {
        let (tx, rx) = delivery_channel();
        assert!(!tx.publish_frame(frame(1)));
        assert!(tx.publish_frame(frame(2)));
        assert!(tx.publish_frame(frame(3)));

        let event = rx.try_recv().unwrap();
        assert_eq!(tag(&event), Some(3));
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn control_event_queues_behind_pending_frame() {
        let (tx, rx) = delivery_channel();
        tx.publish_frame(frame(7));
        tx.publish(PipelineEvent::StreamEnded);
        tx.publish_frame(frame(8));

        assert_eq!(tag(&rx.try_recv().unwrap()), Some(7));
        assert!(matches!(rx.try_recv().unwrap(), PipelineEvent::StreamEnded));
        assert_eq!(tag(&rx.try_recv().unwrap()), Some(8));
    }

    #[test]
    fn discard_removes_queued_and_slotted_frames_only() {
        let (tx, rx) = delivery_channel();
        tx.publish_frame(frame(1));
        tx.publish(PipelineEvent::StateChanged(PipelineState::Running));
        tx.publish_frame(frame(2));

        assert_eq!(tx.discard_frames(), 2);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            PipelineEvent::StateChanged(PipelineState::Running)
        ));
    }

    #[test]
    fn receiver_sees_disconnect_after_drain() {
        let (tx, rx) = delivery_channel();
        tx.publish(PipelineEvent::StreamEnded);
        drop(tx);

        assert!(rx.recv().is_ok());
        assert!(matches!(rx.recv(), Err(RecvError)));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(5)).unwrap_err(),
            RecvTimeoutError::Disconnected
        );
    }

    #[test]
    fn recv_timeout_expires_when_idle() {
        let (_tx, rx) = delivery_channel();
        let started = Instant::now();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(20)).unwrap_err(),
            RecvTimeoutError::Timeout
        );
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn recv_wakes_on_publish_from_other_thread() {
        let (tx, rx) = delivery_channel();
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            tx.publish_frame(frame(9));
            tx
        });
        let event = rx.recv().unwrap();
        assert_eq!(tag(&event), Some(9));
        drop(producer.join().unwrap());
    }
}
