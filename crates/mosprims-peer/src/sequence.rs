use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use mosprims_model::MessageId;

/// Shared message id generator.
///
/// Clones share one counter and one set of outstanding ids, so every channel
/// of every connection in the process draws from the same sequence. Ids run
/// `1..=MessageId::MAX` and wrap back to 1; after a wrap, ids still leased by
/// any channel are skipped.
#[derive(Debug, Clone, Default)]
pub struct MessageIdSequence {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    last: AtomicU32,
    outstanding: Mutex<HashSet<MessageId>>,
}

impl Shared {
    fn outstanding(&self) -> MutexGuard<'_, HashSet<MessageId>> {
        match self.outstanding.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MessageIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sequence whose next id follows `last`.
    pub fn starting_after(last: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                last: AtomicU32::new(last),
                outstanding: Mutex::default(),
            }),
        }
    }

    /// Next id of the counter, outstanding or not.
    pub fn next(&self) -> MessageId {
        let previous = self
            .shared
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(successor(current).get())
            })
            .unwrap_or_else(|current| current);
        successor(previous)
    }

    /// Reserve the next id no outstanding command holds.
    ///
    /// The id stays reserved until the returned lease is dropped.
    pub fn lease(&self) -> IdLease {
        loop {
            let id = self.next();
            if self.shared.outstanding().insert(id) {
                return IdLease {
                    id,
                    shared: Arc::clone(&self.shared),
                };
            }
        }
    }

    /// Ids currently leased.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding().len()
    }
}

/// A reserved message id, released on drop.
#[derive(Debug)]
pub struct IdLease {
    id: MessageId,
    shared: Arc<Shared>,
}

impl IdLease {
    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl Drop for IdLease {
    fn drop(&mut self) {
        self.shared.outstanding().remove(&self.id);
    }
}

fn successor(current: u32) -> MessageId {
    MessageId::new(current).map_or(MessageId::FIRST, MessageId::next)
}
