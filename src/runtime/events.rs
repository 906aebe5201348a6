//! Writer event stream payloads.

/// Events emitted from the single drain loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    /// The drain loop started.
    Enabled,
    /// A bulk insert was fully accepted.
    BatchWritten {
        /// Records stored by this insert.
        written: usize,
    },
    /// A bulk insert was partially refused; the refused records were queued again.
    Requeued {
        /// Records put back on the queue.
        rejected: usize,
    },
    /// A bulk insert failed as a whole.
    StoreUnavailable {
        /// Records put back on the queue (zero when re-queueing is off).
        requeued: usize,
    },
    /// The drain loop exited.
    Stopped {
        /// Records still queued and discarded at exit.
        dropped: usize,
    },
}
