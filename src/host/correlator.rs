use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::types::{ReadResult, Response, UnitId};

/// Monotonic across the process lifetime
static NEXT_READ_TOKEN: AtomicU64 = AtomicU64::new(1);

struct PendingRead {
    token: u64,
    unit_id: UnitId,
    address: u16,
    count: u16,
    reply: oneshot::Sender<ReadResult>,
}

/// Matches read responses against outstanding reads in strict FIFO order.
///
/// The facade enforces a single in-flight read per transport, so the head
/// of the queue is always the read the next response belongs to. Exception
/// responses never complete a pending read; the waiter times out and the
/// exception is surfaced as an event instead.
pub(crate) struct Correlator {
    pending: Mutex<VecDeque<PendingRead>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a pending read and hand back its token and completion
    pub(crate) fn begin(
        &self,
        unit_id: UnitId,
        address: u16,
        count: u16,
    ) -> (u64, oneshot::Receiver<ReadResult>) {
        let token = NEXT_READ_TOKEN.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();

        self.pending.lock().unwrap().push_back(PendingRead {
            token,
            unit_id,
            address,
            count,
            reply,
        });

        (token, receiver)
    }

    /// Drop a pending read whose caller gave up (timeout or send failure).
    /// A late response will then match the next pending read, if any.
    pub(crate) fn abandon(&self, token: u64) {
        self.pending.lock().unwrap().retain(|p| p.token != token);
    }

    /// Complete the head pending read with a successful read response.
    /// Returns false when nothing was pending or the response is not a
    /// non-exception read reply.
    pub(crate) fn complete_front(&self, response: &Response) -> bool {
        if !response.is_read_reply() {
            return false;
        }

        let function = match response.function_code() {
            Some(function) => function,
            None => return false,
        };

        let pending = match self.pending.lock().unwrap().pop_front() {
            Some(pending) => pending,
            None => return false,
        };

        let result = ReadResult {
            unit_id: pending.unit_id,
            address: pending.address,
            count: pending.count,
            function,
            values: response.values.clone(),
        };

        // the receiver may already have timed out; that is not an error
        pending.reply.send(result).is_ok()
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
