//! Status - ステータス報告のヘルパー
//!
//! EventSink と「誰が報告しているか」（EventSource）を束ねる。

use std::sync::Arc;

use crate::domain::{EventSource, StatusEvent, StatusKind};
use crate::ports::EventSink;

/// Stamps events with their source and hands them to the sink.
#[derive(Clone)]
pub struct StatusReporter {
    sink: Arc<dyn EventSink>,
    source: EventSource,
}

impl StatusReporter {
    pub fn new(sink: Arc<dyn EventSink>, source: EventSource) -> Self {
        Self { sink, source }
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn report(&self, kind: StatusKind) {
        self.sink
            .emit(StatusEvent::now(self.source.clone(), kind));
    }

    pub fn activity(&self, text: impl Into<String>) {
        self.report(StatusKind::Activity { text: text.into() });
    }

    pub fn idle(&self) {
        self.report(StatusKind::Idle);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::domain::RunId;
    use crate::ports::RecordingEventSink;

    pub(crate) fn recording_reporter() -> (StatusReporter, Arc<RecordingEventSink>) {
        let sink = Arc::new(RecordingEventSink::new());
        let reporter = StatusReporter::new(
            sink.clone(),
            EventSource {
                worker: "job worker 1".into(),
                run_id: RunId::generate(),
                database: "app".into(),
            },
        );
        (reporter, sink)
    }
}
