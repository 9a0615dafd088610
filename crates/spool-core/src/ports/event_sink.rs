//! EventSink port - ステータス報告の抽象化
//!
//! worker は emit() を呼ぶだけで、結果を待たない・見ない。
//!
//! # 実装
//! - NoopEventSink: 何もしない
//! - TracingEventSink: tracing のレコードとして出す
//! - RecordingEventSink: メモリに溜める（テスト・CLI のサマリ用）

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::domain::{StatusEvent, StatusKind};

/// Fire-and-forget status side-channel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: StatusEvent) {
        (**self).emit(event)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: StatusEvent) {}
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: StatusEvent) {
        let worker = event.source.worker.as_str();
        let run_id = event.source.run_id;
        match &event.kind {
            StatusKind::JobFailed {
                job_id,
                invocation,
                error,
                status_code,
                discarded,
            } => warn!(
                target: "spool::status",
                worker,
                %run_id,
                %job_id,
                invocation = invocation.as_str(),
                error = error.as_str(),
                status_code,
                discarded,
                "job failed"
            ),
            StatusKind::Activity { text } => debug!(
                target: "spool::status",
                worker,
                %run_id,
                activity = text.as_str(),
                "running"
            ),
            StatusKind::Idle => debug!(target: "spool::status", worker, %run_id, "idle"),
            other => info!(
                target: "spool::status",
                worker,
                %run_id,
                event = ?other,
                "status"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<StatusKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: StatusEvent) {
        // 報告の失敗で worker を止めない
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Forwards to several sinks.
#[derive(Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: StatusEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
