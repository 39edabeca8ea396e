// Frame handoff between the emulation thread and a render thread.
//
// The producer owns a small pool of frame buffers. A filled buffer is sent
// to the consumer; once drawn, the consumer sends it back for reuse. At
// most `depth` frames are in flight, so a slow renderer throttles the
// producer instead of queueing unbounded work.

use crossbeam_channel::{bounded, Receiver, RecvError, SendError, Sender, TryRecvError};

/// Sending half, held by the thread that produces frames.
pub struct FrameProducer<T> {
    frames: Sender<T>,
    returned: Receiver<T>,
}

/// Receiving half, held by the render thread.
pub struct FrameConsumer<T> {
    frames: Receiver<T>,
    returned: Sender<T>,
}

/// Create a handoff with at most `depth` frames in flight in each direction.
pub fn handoff<T>(depth: usize) -> (FrameProducer<T>, FrameConsumer<T>) {
    let depth = depth.max(1);
    let (frame_tx, frame_rx) = bounded(depth);
    let (return_tx, return_rx) = bounded(depth);
    (
        FrameProducer {
            frames: frame_tx,
            returned: return_rx,
        },
        FrameConsumer {
            frames: frame_rx,
            returned: return_tx,
        },
    )
}

impl<T> FrameProducer<T> {
    /// Queue a frame, blocking while `depth` frames are already queued.
    ///
    /// # Errors
    /// Returns the frame if the consumer has gone away.
    pub fn submit(&self, frame: T) -> Result<(), SendError<T>> {
        self.frames.send(frame)
    }

    /// A drawn frame handed back for reuse, if one is waiting.
    pub fn reclaim(&self) -> Option<T> {
        match self.returned.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a drawn frame comes back.
    pub fn wait_reclaim(&self) -> Option<T> {
        self.returned.recv().ok()
    }
}

impl<T> FrameConsumer<T> {
    /// Block for the next frame. Fails once the producer is dropped and the
    /// queue is drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.frames.recv()
    }

    /// Hand a drawn frame back. Dropped if the producer is gone or its
    /// return queue is full.
    pub fn release(&self, frame: T) {
        let _ = self.returned.try_send(frame);
    }
}
