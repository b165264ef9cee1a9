use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Records kept before the oldest are discarded.
pub const DEFAULT_CONSOLE_CAPACITY: usize = 10_000;

/// Severity as the host console understands it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostLogLevel {
    Info,
    Warning,
    Error,
}

impl From<Level> for HostLogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warning,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for HostLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: HostLogLevel,
    pub target: String,
    pub message: String,
    pub session_id: Option<String>,
}

/// Consumer of log records. Only ever called from the thread that flushes
/// the queue, which is the host thread.
pub trait HostLogSink {
    fn write(&mut self, record: &HostLogRecord);
}

/// Writes records to stderr, one line each.
#[derive(Debug, Default)]
pub struct StderrConsole;

impl HostLogSink for StderrConsole {
    fn write(&mut self, record: &HostLogRecord) {
        match &record.session_id {
            Some(session) => eprintln!(
                "[{}] {} {} (session {}): {}",
                record.timestamp.format("%H:%M:%S%.3f"),
                record.level,
                record.target,
                session,
                record.message
            ),
            None => eprintln!(
                "[{}] {} {}: {}",
                record.timestamp.format("%H:%M:%S%.3f"),
                record.level,
                record.target,
                record.message
            ),
        }
    }
}

impl HostLogSink for Vec<HostLogRecord> {
    fn write(&mut self, record: &HostLogRecord) {
        self.push(record.clone());
    }
}

struct QueueInner {
    records: VecDeque<HostLogRecord>,
    dropped: u64,
}

/// Log records produced on any thread, waiting for the host to flush them.
#[derive(Clone)]
pub struct HostLogQueue {
    inner: Arc<Mutex<QueueInner>>,
    capacity: usize,
}

impl Default for HostLogQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CONSOLE_CAPACITY)
    }
}

impl HostLogQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                records: VecDeque::new(),
                dropped: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Queue a message directly, bypassing `tracing`.
    pub fn log(&self, level: HostLogLevel, message: impl Into<String>) {
        self.push(HostLogRecord {
            timestamp: Utc::now(),
            level,
            target: "host".into(),
            message: message.into(),
            session_id: None,
        });
    }

    pub fn push(&self, record: HostLogRecord) {
        let mut inner = self.inner.lock();
        if inner.records.len() >= self.capacity {
            let _ = inner.records.pop_front();
            inner.dropped += 1;
        }
        inner.records.push_back(record);
    }

    /// Hand every queued record to `sink`, oldest first. Returns how many
    /// were written.
    pub fn flush(&self, sink: &mut dyn HostLogSink) -> usize {
        let records = std::mem::take(&mut self.inner.lock().records);
        for record in &records {
            sink.write(record);
        }
        records.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

/// tracing Layer that copies events at or above a level into a
/// [`HostLogQueue`].
pub struct HostLogLayer {
    queue: HostLogQueue,
    min_level: Level,
}

impl HostLogLayer {
    pub fn new(queue: HostLogQueue, min_level: Level) -> Self {
        Self { queue, min_level }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    session_id: Option<String>,
    extra: Vec<(String, String)>,
}

impl FieldVisitor {
    fn render(self) -> String {
        let mut out = self.message.unwrap_or_default();
        for (name, value) in self.extra {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&name);
            out.push('=');
            out.push_str(&value);
        }
        out
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let val = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(val),
            "session_id" => self.session_id = Some(val.trim_matches('"').to_string()),
            name => self.extra.push((name.to_string(), val)),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            name => self.extra.push((name.to_string(), value.to_string())),
        }
    }
}

/// Stored on spans so child events inherit the session.
struct SpanSession(String);

impl<S> Layer<S> for HostLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > self.min_level {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut session_id = visitor.session_id.take();
        if session_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(SpanSession(id)) = span.extensions().get::<SpanSession>() {
                        session_id = Some(id.clone());
                        break;
                    }
                }
            }
        }

        self.queue.push(HostLogRecord {
            timestamp: Utc::now(),
            level: level.into(),
            target: event.metadata().target().to_string(),
            message: visitor.render(),
            session_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if let Some(session) = visitor.session_id {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanSession(session));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(min_level: Level, f: impl FnOnce()) -> Vec<HostLogRecord> {
        let queue = HostLogQueue::default();
        let subscriber =
            tracing_subscriber::registry().with(HostLogLayer::new(queue.clone(), min_level));
        tracing::subscriber::with_default(subscriber, f);
        let mut out = Vec::new();
        let _ = queue.flush(&mut out);
        out
    }

    #[test]
    fn maps_levels() {
        let records = capture(Level::INFO, || {
            tracing::info!("ready");
            tracing::warn!("slow");
            tracing::error!("broken");
            tracing::debug!("hidden");
        });

        let levels: Vec<_> = records.iter().map(|r| r.level).collect();
        assert_eq!(
            levels,
            vec![HostLogLevel::Info, HostLogLevel::Warning, HostLogLevel::Error]
        );
        assert_eq!(records[0].message, "ready");
    }

    #[test]
    fn renders_fields_after_message() {
        let records = capture(Level::INFO, || {
            tracing::info!(capability = "echo", elapsed_ms = 3u64, "capability call");
        });
        assert_eq!(records[0].message, "capability call capability=echo elapsed_ms=3");
    }

    #[test]
    fn session_from_event_or_span() {
        let records = capture(Level::INFO, || {
            tracing::info!(session_id = "abc", "direct");
            let span = tracing::info_span!("session", session_id = "xyz");
            let _enter = span.enter();
            tracing::warn!("nested");
        });
        assert_eq!(records[0].session_id.as_deref(), Some("abc"));
        assert_eq!(records[1].session_id.as_deref(), Some("xyz"));
    }

    #[test]
    fn flush_from_other_thread_preserves_order() {
        let queue = HostLogQueue::default();
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..5 {
                    queue.log(HostLogLevel::Info, format!("line {i}"));
                }
            })
        };
        producer.join().unwrap();

        let mut sink = Vec::new();
        assert_eq!(queue.flush(&mut sink), 5);
        assert!(queue.is_empty());
        let messages: Vec<_> = sink.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["line 0", "line 1", "line 2", "line 3", "line 4"]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = HostLogQueue::with_capacity(2);
        queue.log(HostLogLevel::Info, "a");
        queue.log(HostLogLevel::Warning, "b");
        queue.log(HostLogLevel::Error, "c");

        assert_eq!(queue.dropped(), 1);
        let mut sink = Vec::new();
        let _ = queue.flush(&mut sink);
        assert_eq!(sink[0].message, "b");
        assert_eq!(sink[1].message, "c");
    }
}
