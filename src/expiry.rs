/*!
 * Deferred Key Expiry
 *
 * A single background thread owns every pending expiry. `SET ... PX` sends
 * it a (deadline, key, version) triple over a channel; the thread sleeps
 * until the earliest deadline and then performs a compare-and-delete on the
 * shared dict. Each scheduled delete fires exactly once.
 */

use crate::storage::Dict;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    deadline: Instant,
    version: u64,
    key: String,
}

/// Sender side of the expiry worker. The worker exits once every handle
/// is dropped and no deadlines remain to be received.
#[derive(Clone)]
pub struct ExpiryHandle {
    tx: Sender<Scheduled>,
}

impl ExpiryHandle {
    /// Schedule deletion of `key` at `deadline`, if it still holds `version`.
    #[inline]
    pub fn schedule(&self, deadline: Instant, key: String, version: u64) {
        // Only fails after the worker is gone, at which point nothing is
        // left to expire.
        let _ = self.tx.send(Scheduled {
            deadline,
            version,
            key,
        });
    }
}

/// Spawn the expiry worker for `dict`.
///
/// # Returns
///
/// The handle used to schedule deadlines, or the error from spawning the
/// thread.
pub fn spawn_expiry_worker(dict: Arc<Mutex<Dict>>) -> std::io::Result<ExpiryHandle> {
    let (tx, rx) = unbounded::<Scheduled>();

    std::thread::Builder::new()
        .name("evkv-expiry".into())
        .spawn(move || run_worker(rx, dict))?;

    Ok(ExpiryHandle { tx })
}

fn run_worker(rx: Receiver<Scheduled>, dict: Arc<Mutex<Dict>>) {
    let mut pending: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();

    loop {
        let received = match pending.peek() {
            Some(Reverse(next)) => match rx.recv_deadline(next.deadline) {
                Ok(s) => Some(s),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(s) => Some(s),
                Err(_) => break,
            },
        };

        if let Some(s) = received {
            pending.push(Reverse(s));
        }

        fire_due(&mut pending, &dict, Instant::now());
    }

    debug!("expiry worker stopped with {} pending", pending.len());
}

fn fire_due(pending: &mut BinaryHeap<Reverse<Scheduled>>, dict: &Mutex<Dict>, now: Instant) {
    while pending
        .peek()
        .map_or(false, |Reverse(next)| next.deadline <= now)
    {
        if let Some(Reverse(due)) = pending.pop() {
            let removed = dict.lock().remove_if_version(&due.key, due.version);
            trace!("expire {} v{} removed={}", due.key, due.version, removed);
        }
    }
}
