use std::collections::HashSet;

use super::host::{AudioSink, SourceId};
use super::AudioFragment;

/// Handle to one fragment placed on the output timeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Start time on the sink clock, in seconds
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Gapless scheduler for audio pushed by the live service.
///
/// Each fragment starts at `max(now, cursor)` and moves the cursor to its
/// end, so on-time fragments play back-to-back while a late one plays
/// immediately instead of queueing behind a stale prediction.
pub struct PlaybackScheduler {
    sink: Option<Box<dyn AudioSink>>,
    /// Predicted start of the next fragment, 0 after a flush
    cursor: f64,
    /// Sources scheduled or playing, removed when they end
    live: HashSet<SourceId>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink: Some(sink),
            cursor: 0.0,
            live: HashSet::new(),
            next_id: 1,
        }
    }

    /// Schedule a decoded fragment. Returns `None` for empty fragments or
    /// once the sink has been closed.
    pub fn enqueue(&mut self, fragment: AudioFragment) -> Option<ScheduledSource> {
        if fragment.samples.is_empty() {
            return None;
        }
        let sink = self.sink.as_mut()?;

        let duration = fragment.duration();
        let start = sink.current_time().max(self.cursor);
        let id = self.next_id;
        self.next_id += 1;

        sink.schedule(id, fragment.samples, start);
        self.cursor = start + duration;
        self.live.insert(id);

        tracing::debug!(
            source = id,
            fragment = fragment.seq,
            start,
            duration,
            "Scheduled playback fragment"
        );

        Some(ScheduledSource { id, start, duration })
    }

    /// Forget a source whose playback completed.
    /// Returns whether anything is still scheduled.
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.live.remove(&id);
        !self.live.is_empty()
    }

    /// Stop everything now and reset the cursor so the next fragment
    /// starts immediately rather than at a stale future time.
    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            for id in self.live.iter() {
                sink.stop(*id);
            }
        }
        let stopped = self.live.len();
        self.live.clear();
        self.cursor = 0.0;

        tracing::info!(stopped, "Playback flushed");
    }

    /// Stop all sources and release the output sink. Idempotent.
    pub fn drain_and_close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            for id in self.live.drain() {
                sink.stop(id);
            }
            sink.close();
            self.cursor = 0.0;
            tracing::info!("Playback closed");
        }
    }

    pub fn is_playing(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.drain_and_close();
    }
}
