//! Shared supply of pending tasks with atomic claiming.
//!
//! Workers pull from one `TaskSupply`. A claim is a single `fetch_add` on a
//! cursor, so no record is ever handed to two workers. Cancellation closes the
//! supply: claims made after `cancel()` return `None`, while tasks already
//! claimed run to completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::task::TaskRecord;

/// Pending tasks for one run, in manifest order.
#[derive(Debug)]
pub struct TaskSupply {
    records: Arc<[Arc<TaskRecord>]>,
    cursor: AtomicUsize,
    cancelled: AtomicBool,
}

impl TaskSupply {
    pub fn new(records: Vec<TaskRecord>) -> Self {
        Self {
            records: records.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Claims the next unclaimed record, or `None` when exhausted or cancelled.
    pub fn claim(&self) -> Option<Arc<TaskRecord>> {
        if self.is_cancelled() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.records.get(index).cloned()
    }

    /// Stops further claims.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records that were never handed to a worker.
    pub fn unclaimed(&self) -> usize {
        let claimed = self.cursor.load(Ordering::Acquire).min(self.records.len());
        self.records.len() - claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use serde_json::Map;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn supply(n: usize) -> TaskSupply {
        TaskSupply::new(
            (0..n)
                .map(|i| TaskRecord::new(format!("t{i}"), TaskKind::Generic, Map::new()))
                .collect(),
        )
    }

    #[test]
    fn test_claims_in_order_until_exhausted() {
        let supply = supply(2);
        assert_eq!(supply.claim().map(|r| r.id.clone()), Some("t0".to_string()));
        assert_eq!(supply.claim().map(|r| r.id.clone()), Some("t1".to_string()));
        assert!(supply.claim().is_none());
        assert!(supply.claim().is_none());
        assert_eq!(supply.unclaimed(), 0);
    }

    #[test]
    fn test_cancel_stops_claims() {
        let supply = supply(3);
        assert!(supply.claim().is_some());
        supply.cancel();
        assert!(supply.is_cancelled());
        assert!(supply.claim().is_none());
        assert_eq!(supply.unclaimed(), 2);
    }

    #[test]
    fn test_concurrent_claims_are_unique() {
        let supply = Arc::new(supply(1000));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let supply = Arc::clone(&supply);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    while let Some(record) = supply.claim() {
                        seen.lock().unwrap().push(record.id.clone());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ids = seen.lock().unwrap();
        assert_eq!(ids.len(), 1000);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 1000);
    }
}
