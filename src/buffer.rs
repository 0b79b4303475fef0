//! The sequenced circular buffer.
//!
//! This is the single ordered, bounded log of observations. Appends assign
//! strictly increasing sequence numbers, exactly once, never reused within a
//! buffer incarnation; eviction is oldest-first and never fails. Readers take
//! a short read-lock only long enough to clone `Arc`s out of the retained
//! window, so any number of concurrent Sample/Current readers proceed without
//! serializing against each other, and a reader can never observe a partially
//! constructed entry.
//!
//! Range requests below `first_sequence` (already evicted) or beyond
//! `last_sequence + 1` (the future) are sequence errors carrying the valid
//! window, never silently clamped.

use crate::error::{AgentError, AgentResult};
use crate::observation::{Observation, ObservationFilter, ObservationInput};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Consistent view of the buffer bounds, paired with state-table reads by
/// the query engine and embedded in transport document headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHeader {
    /// Identifies this buffer incarnation; changes only on restart, telling
    /// consumers their prior sequence numbers are void.
    pub instance_id: u64,
    pub buffer_size: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub next_sequence: u64,
}

/// Result of a range scan: the matching observations plus the retained
/// window at the time of the read.
#[derive(Clone, Debug)]
pub struct SampleSet {
    pub observations: Vec<std::sync::Arc<Observation>>,
    pub first_sequence: u64,
    pub last_sequence: u64,
    /// Where a subsequent scan should continue: one past the last sequence
    /// covered by this scan (filtered-out entries included).
    pub next_sequence: u64,
}

struct Inner {
    entries: VecDeque<std::sync::Arc<Observation>>,
    next: u64,
}

impl Inner {
    fn first(&self) -> u64 {
        if self.entries.is_empty() {
            self.next
        } else {
            self.next - self.entries.len() as u64
        }
    }

    fn last(&self) -> u64 {
        self.next - 1
    }
}

/// The authoritative, append-only, fixed-capacity observation store.
pub struct ObservationBuffer {
    capacity: usize,
    instance_id: u64,
    inner: RwLock<Inner>,
    append_tx: watch::Sender<u64>,
}

impl ObservationBuffer {
    /// Construct with a fixed capacity. Zero capacity is a configuration
    /// error and the only startup-fatal condition in the core.
    pub fn new(capacity: usize) -> AgentResult<Self> {
        if capacity == 0 {
            return Err(AgentError::Configuration(
                "observation buffer capacity must be greater than zero".into(),
            ));
        }
        let (append_tx, _) = watch::channel(0u64);
        Ok(ObservationBuffer {
            capacity,
            instance_id: Utc::now().timestamp() as u64,
            inner: RwLock::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                next: 1,
            }),
            append_tx,
        })
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an observation, assigning the next sequence number. Always
    /// succeeds; when the buffer is full the oldest entry is evicted.
    pub fn append(&self, input: ObservationInput) -> (u64, std::sync::Arc<Observation>) {
        let observation = {
            let mut inner = self.write_inner();
            let sequence = inner.next;
            let observation = std::sync::Arc::new(Observation {
                device_uuid: input.data_item.device_uuid.clone(),
                data_item_id: input.data_item.id.clone(),
                category: input.data_item.category,
                type_: input.data_item.type_.clone(),
                sub_type: input.data_item.sub_type.clone(),
                composition_id: input.data_item.composition_id.clone(),
                representation: input.data_item.representation,
                timestamp: input.timestamp,
                sequence,
                values: input.values,
            });
            inner.entries.push_back(observation.clone());
            inner.next = sequence + 1;
            if inner.entries.len() > self.capacity {
                inner.entries.pop_front();
            }
            observation
        };
        // Publish outside the lock; readers waiting on the watch re-read
        // through get_range and take their own guard.
        self.append_tx.send_replace(observation.sequence);
        (observation.sequence, observation)
    }

    /// Entries with sequence in `[from, min(to ?? last, from + count - 1)]`
    /// intersected with the retained window, in ascending sequence order.
    pub fn get_range(
        &self,
        from: u64,
        to: Option<u64>,
        count: usize,
        filter: Option<&ObservationFilter>,
    ) -> AgentResult<SampleSet> {
        if count == 0 {
            return Err(AgentError::InvalidCountRange(0));
        }
        let inner = self.read_inner();
        let first = inner.first();
        let last = inner.last();
        if from < first || from > last + 1 {
            return Err(AgentError::SequenceOutOfRange {
                requested: from,
                first,
                last,
            });
        }
        let end = to
            .unwrap_or(last)
            .min(from + (count as u64 - 1))
            .min(last);
        let mut observations = Vec::new();
        if end >= from {
            let offset = (from - first) as usize;
            let span = (end - from + 1) as usize;
            for entry in inner.entries.iter().skip(offset).take(span) {
                if filter.map_or(true, |f| f.matches(entry)) {
                    observations.push(entry.clone());
                }
            }
        }
        Ok(SampleSet {
            observations,
            first_sequence: first,
            last_sequence: last,
            next_sequence: if end >= from { end + 1 } else { from },
        })
    }

    /// A consistent read of the buffer bounds.
    pub fn snapshot(&self) -> BufferHeader {
        let inner = self.read_inner();
        BufferHeader {
            instance_id: self.instance_id,
            buffer_size: self.capacity,
            first_sequence: inner.first(),
            last_sequence: inner.last(),
            next_sequence: inner.next,
        }
    }

    /// Subscribe to append notifications. The watch value is the newest
    /// assigned sequence; long-poll readers await changes instead of
    /// spinning on `get_range`.
    pub fn observe_appends(&self) -> watch::Receiver<u64> {
        self.append_tx.subscribe()
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataItemRef;
    use crate::observation::{Category, ObservationValues, Representation};

    fn item(id: &str) -> DataItemRef {
        DataItemRef {
            id: id.to_string(),
            name: None,
            device_uuid: "dev-1".to_string(),
            category: Category::Sample,
            type_: "POSITION".to_string(),
            sub_type: None,
            composition_id: None,
            representation: Representation::Value,
            native_units: None,
        }
    }

    fn input(id: &str, value: &str) -> ObservationInput {
        ObservationInput::new(
            item(id),
            Utc::now(),
            ObservationValues::Value(value.to_string()),
        )
    }

    #[test]
    fn sequences_are_gapless_from_one() {
        let buffer = ObservationBuffer::new(16).unwrap();
        for n in 1..=5u64 {
            let (seq, obs) = buffer.append(input("x", &n.to_string()));
            assert_eq!(seq, n);
            assert_eq!(obs.sequence, n);
        }
        let set = buffer.get_range(1, None, 100, None).unwrap();
        let seqs: Vec<u64> = set.observations.iter().map(|o| o.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(set.first_sequence, 1);
        assert_eq!(set.last_sequence, 5);
    }

    #[test]
    fn eviction_advances_first_sequence() {
        let buffer = ObservationBuffer::new(3).unwrap();
        for n in 1..=4u64 {
            buffer.append(input("x", &n.to_string()));
        }
        let header = buffer.snapshot();
        assert_eq!(header.first_sequence, 2);
        assert_eq!(header.last_sequence, 4);
        assert_eq!(header.next_sequence, 5);

        let err = buffer.get_range(1, None, 10, None).unwrap_err();
        match err {
            AgentError::SequenceOutOfRange {
                requested,
                first,
                last,
            } => {
                assert_eq!(requested, 1);
                assert_eq!(first, 2);
                assert_eq!(last, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn future_sequences_are_errors() {
        let buffer = ObservationBuffer::new(4).unwrap();
        buffer.append(input("x", "1"));
        // last + 1 is the await-new-data position, not an error.
        let set = buffer.get_range(2, None, 10, None).unwrap();
        assert!(set.observations.is_empty());
        assert_eq!(set.next_sequence, 2);
        assert!(buffer.get_range(3, None, 10, None).is_err());
    }

    #[test]
    fn empty_buffer_serves_from_one() {
        let buffer = ObservationBuffer::new(4).unwrap();
        let header = buffer.snapshot();
        assert_eq!(header.first_sequence, 1);
        assert_eq!(header.last_sequence, 0);
        assert_eq!(header.next_sequence, 1);
        let set = buffer.get_range(1, None, 10, None).unwrap();
        assert!(set.observations.is_empty());
        assert!(buffer.get_range(2, None, 10, None).is_err());
    }

    #[test]
    fn count_and_to_bound_the_scan() {
        let buffer = ObservationBuffer::new(16).unwrap();
        for n in 1..=10u64 {
            buffer.append(input("x", &n.to_string()));
        }
        let set = buffer.get_range(2, None, 3, None).unwrap();
        let seqs: Vec<u64> = set.observations.iter().map(|o| o.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(set.next_sequence, 5);

        let set = buffer.get_range(2, Some(6), 100, None).unwrap();
        assert_eq!(set.observations.len(), 5);
        assert_eq!(set.next_sequence, 7);

        assert!(matches!(
            buffer.get_range(1, None, 0, None),
            Err(AgentError::InvalidCountRange(0))
        ));
    }

    #[test]
    fn filter_skips_but_cursor_advances() {
        let buffer = ObservationBuffer::new(16).unwrap();
        buffer.append(input("x", "1"));
        buffer.append(input("y", "2"));
        buffer.append(input("x", "3"));
        let filter = ObservationFilter {
            device_uuid: None,
            data_item_ids: Some(["y".to_string()].into_iter().collect()),
        };
        let set = buffer.get_range(1, None, 100, Some(&filter)).unwrap();
        assert_eq!(set.observations.len(), 1);
        assert_eq!(set.observations[0].sequence, 2);
        assert_eq!(set.next_sequence, 4);
    }

    #[tokio::test]
    async fn append_watch_wakes_subscribers() {
        let buffer = ObservationBuffer::new(4).unwrap();
        let mut rx = buffer.observe_appends();
        assert_eq!(*rx.borrow(), 0);
        buffer.append(input("x", "1"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[test]
    fn zero_capacity_is_a_construction_error() {
        assert!(ObservationBuffer::new(0).is_err());
    }
}
