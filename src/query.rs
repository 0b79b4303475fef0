//! Current and Sample queries.
//!
//! Current is a snapshot of the state table paired with the buffer header;
//! it never scans history. Sample is a range scan over the buffer, with an
//! optional long-poll stream that re-issues the scan from the client's own
//! cursor as new data arrives. Every stream owns its cursor independently;
//! the buffer has no shared reader state, so any number of clients can
//! stream concurrently.

use crate::buffer::{BufferHeader, ObservationBuffer, SampleSet};
use crate::error::{AgentError, AgentResult};
use crate::observation::{Observation, ObservationFilter};
use crate::state::{CurrentEntry, StateTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

/// Result of a Current query: the latest value(s) per matching data item
/// plus the buffer header taken after the state read, so no item's sequence
/// can exceed `header.last_sequence`.
#[derive(Clone, Debug)]
pub struct CurrentSnapshot {
    pub header: BufferHeader,
    pub items: Vec<CurrentEntry>,
}

/// Parameters of one Sample query.
#[derive(Clone, Debug)]
pub struct SampleRequest {
    /// Starting sequence; defaults to the buffer's `first_sequence`.
    pub from: Option<u64>,
    pub to: Option<u64>,
    /// Maximum sequence span to scan. Signed so transports can pass their
    /// parsed input through; zero and negative counts are invalid.
    pub count: i64,
    pub filter: ObservationFilter,
}

impl Default for SampleRequest {
    fn default() -> Self {
        SampleRequest {
            from: None,
            to: None,
            count: 100,
            filter: ObservationFilter::all(),
        }
    }
}

/// One batch from a Sample query or stream. An empty `observations` with
/// `heartbeat` set keeps a long-poll session alive.
#[derive(Clone, Debug)]
pub struct SampleBatch {
    pub header: BufferHeader,
    pub observations: Vec<Arc<Observation>>,
    pub next_sequence: u64,
    pub heartbeat: bool,
}

/// Read-side facade over the buffer and state table.
#[derive(Clone)]
pub struct QueryEngine {
    buffer: Arc<ObservationBuffer>,
    state: Arc<StateTable>,
}

impl QueryEngine {
    pub fn new(buffer: Arc<ObservationBuffer>, state: Arc<StateTable>) -> Self {
        QueryEngine { buffer, state }
    }

    /// Latest value per matching data item. State first, header second:
    /// a concurrent append can only make the header newer than the items,
    /// never the reverse.
    pub fn current(&self, filter: &ObservationFilter) -> CurrentSnapshot {
        let items = self.state.snapshot(filter);
        let header = self.buffer.snapshot();
        CurrentSnapshot { header, items }
    }

    /// One range scan. Sequence errors carry the valid window so callers
    /// can resynchronize from `first_sequence`.
    pub fn sample(&self, request: &SampleRequest) -> AgentResult<SampleBatch> {
        let count = validate_count(request.count)?;
        let header = self.buffer.snapshot();
        let from = request.from.unwrap_or(header.first_sequence);
        let set = self
            .buffer
            .get_range(from, request.to, count, Some(&request.filter))?;
        Ok(batch_from(set, self.buffer.snapshot(), false))
    }

    /// Open a long-poll stream. `heartbeat` bounds how long a batch can be
    /// withheld when no data arrives; `interval` paces successive batches.
    pub fn sample_stream(
        &self,
        request: SampleRequest,
        interval: Option<Duration>,
        heartbeat: Duration,
    ) -> AgentResult<SampleStream> {
        let count = validate_count(request.count)?;
        let header = self.buffer.snapshot();
        let cursor = request.from.unwrap_or(header.first_sequence);
        Ok(SampleStream {
            buffer: self.buffer.clone(),
            appends: self.buffer.observe_appends(),
            filter: request.filter,
            cursor,
            count,
            interval,
            heartbeat,
        })
    }
}

fn validate_count(count: i64) -> AgentResult<usize> {
    if count <= 0 {
        return Err(AgentError::InvalidCountRange(count));
    }
    Ok(count as usize)
}

fn batch_from(set: SampleSet, header: BufferHeader, heartbeat: bool) -> SampleBatch {
    SampleBatch {
        header,
        next_sequence: set.next_sequence,
        observations: set.observations,
        heartbeat,
    }
}

/// A client's long-poll cursor over the buffer. Dropping the stream cancels
/// the poll loop; in-flight buffer reads are unaffected because reads are
/// non-blocking snapshots.
pub struct SampleStream {
    buffer: Arc<ObservationBuffer>,
    appends: watch::Receiver<u64>,
    filter: ObservationFilter,
    cursor: u64,
    count: usize,
    interval: Option<Duration>,
    heartbeat: Duration,
}

impl SampleStream {
    /// The sequence the next batch will start from.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Restart from the oldest retained observation, the usual recovery
    /// after a sequence error.
    pub fn resync_from_first(&mut self) {
        self.cursor = self.buffer.snapshot().first_sequence;
    }

    /// Produce the next batch: data as soon as any is available past the
    /// cursor, or an empty heartbeat batch after `heartbeat` of silence.
    pub async fn next_batch(&mut self) -> AgentResult<SampleBatch> {
        if let Some(interval) = self.interval {
            sleep(interval).await;
        }
        let deadline = Instant::now() + self.heartbeat;
        loop {
            // Mark the current append version seen before scanning, so an
            // append racing the scan makes the wait below resolve at once.
            self.appends.borrow_and_update();
            let set = self
                .buffer
                .get_range(self.cursor, None, self.count, Some(&self.filter))?;
            if !set.observations.is_empty() {
                self.cursor = set.next_sequence;
                return Ok(batch_from(set, self.buffer.snapshot(), false));
            }
            self.cursor = set.next_sequence;
            match timeout_at_deadline(deadline, self.appends.changed()).await {
                Some(Ok(())) => continue,
                Some(Err(_)) | None => {
                    let header = self.buffer.snapshot();
                    return Ok(SampleBatch {
                        header,
                        observations: Vec::new(),
                        next_sequence: self.cursor,
                        heartbeat: true,
                    });
                }
            }
        }
    }
}

async fn timeout_at_deadline<F>(deadline: Instant, future: F) -> Option<F::Output>
where
    F: std::future::Future,
{
    timeout(deadline.saturating_duration_since(Instant::now()), future)
        .await
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataItemRef;
    use crate::observation::{Category, ObservationInput, ObservationValues, Representation};
    use chrono::Utc;
    use tokio_test::assert_ok;

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

    fn engine(capacity: usize) -> (QueryEngine, Arc<ObservationBuffer>, Arc<StateTable>) {
        let buffer = Arc::new(ObservationBuffer::new(capacity).unwrap());
        let state = Arc::new(StateTable::new());
        (QueryEngine::new(buffer.clone(), state.clone()), buffer, state)
    }

    fn append(buffer: &ObservationBuffer, state: &StateTable, id: &str, value: &str) -> u64 {
        let input = ObservationInput::new(
            item(id),
            Utc::now(),
            ObservationValues::Value(value.to_string()),
        );
        let (seq, obs) = buffer.append(input);
        state.apply(&obs);
        seq
    }

    #[test]
    fn current_pairs_items_with_header() {
        let (engine, buffer, state) = engine(8);
        append(&buffer, &state, "x", "1");
        append(&buffer, &state, "y", "2");
        let snapshot = engine.current(&ObservationFilter::all());
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.header.last_sequence, 2);
        for entry in &snapshot.items {
            assert!(entry.observations[0].sequence <= snapshot.header.last_sequence);
        }
    }

    #[test]
    fn sample_rejects_nonpositive_count() {
        let (engine, _buffer, _state) = engine(8);
        let mut request = SampleRequest::default();
        request.count = 0;
        assert!(matches!(
            engine.sample(&request),
            Err(AgentError::InvalidCountRange(0))
        ));
        request.count = -5;
        assert!(matches!(
            engine.sample(&request),
            Err(AgentError::InvalidCountRange(-5))
        ));
    }

    #[test]
    fn sample_defaults_to_window_start() {
        let (engine, buffer, state) = engine(3);
        for n in 1..=5 {
            append(&buffer, &state, "x", &n.to_string());
        }
        let batch = assert_ok!(engine.sample(&SampleRequest::default()));
        let seqs: Vec<u64> = batch.observations.iter().map(|o| o.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn stream_wakes_on_append() {
        let (engine, buffer, state) = engine(8);
        append(&buffer, &state, "x", "1");
        let mut stream = engine
            .sample_stream(SampleRequest::default(), None, Duration::from_secs(5))
            .unwrap();
        let first = stream.next_batch().await.unwrap();
        assert_eq!(first.observations.len(), 1);

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            append(&buffer, &state, "x", "2");
        });
        let second = stream.next_batch().await.unwrap();
        writer.await.unwrap();
        assert_eq!(second.observations.len(), 1);
        assert_eq!(second.observations[0].sequence, 2);
        assert!(!second.heartbeat);
    }

    #[tokio::test]
    async fn stream_emits_heartbeat_when_idle() {
        let (engine, buffer, state) = engine(8);
        append(&buffer, &state, "x", "1");
        let mut stream = engine
            .sample_stream(SampleRequest::default(), None, Duration::from_millis(30))
            .unwrap();
        let first = stream.next_batch().await.unwrap();
        assert!(!first.heartbeat);
        let second = stream.next_batch().await.unwrap();
        assert!(second.heartbeat);
        assert!(second.observations.is_empty());
        assert_eq!(second.next_sequence, first.next_sequence);
    }

    #[tokio::test]
    async fn evicted_cursor_surfaces_sequence_error_then_resyncs() {
        let (engine, buffer, state) = engine(2);
        append(&buffer, &state, "x", "1");
        let mut stream = engine
            .sample_stream(
                SampleRequest {
                    from: Some(1),
                    ..Default::default()
                },
                None,
                Duration::from_millis(50),
            )
            .unwrap();
        stream.next_batch().await.unwrap();
        // Overrun the window while the client is away.
        for n in 2..=5 {
            append(&buffer, &state, "x", &n.to_string());
        }
        // Cursor 2 has been evicted (window is now [4, 5]).
        let err = stream.next_batch().await.unwrap_err();
        match err {
            AgentError::SequenceOutOfRange { first, last, .. } => {
                assert_eq!(first, 4);
                assert_eq!(last, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        stream.resync_from_first();
        let batch = stream.next_batch().await.unwrap();
        assert_eq!(
            batch.observations.iter().map(|o| o.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }
}
