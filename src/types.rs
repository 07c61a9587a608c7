use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Seconds since epoch
pub type TimePoint = f64;

pub type SpanId = String;
pub type TraceId = String;
pub type EventId = String;

pub const MILLISECONDS_PER_SECOND: f64 = 1000.0;

pub fn time_point_from_unix_nano(unix_nano: u64) -> TimePoint {
    unix_nano as f64 / 1_000_000_000.0
}

pub fn time_point_to_utc_string(time: TimePoint) -> String {
    let date_time = chrono::DateTime::from_timestamp_nanos((time * 1e9) as i64);
    date_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// A span as recorded by the SDK, before it is placed into a [crate::span_tree::SpanTree].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: SpanId,
    #[serde(default)]
    pub parent_span_id: Option<SpanId>,
    #[serde(default)]
    pub trace_id: TraceId,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start_timestamp: TimePoint,
    /// End of the span. Some SDKs send spans without one.
    #[serde(default)]
    pub timestamp: Option<TimePoint>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub exclusive_time: Option<f64>,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Placeholder for an interval that no span covers.
#[derive(Debug, Clone, PartialEq)]
pub struct GapSpan {
    pub start_timestamp: TimePoint,
    pub timestamp: TimePoint,
    pub description: Option<String>,
    pub is_orphan: bool,
}

/// A span after it has been placed into the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedSpan {
    Normal(Span),
    /// The declared parent was missing, `parent_span_id` now points at the root span.
    Orphan(Span),
    Gap(GapSpan),
}

impl ProcessedSpan {
    pub fn span_id(&self) -> Option<&str> {
        match self {
            ProcessedSpan::Normal(span) | ProcessedSpan::Orphan(span) => Some(&span.span_id),
            ProcessedSpan::Gap(_) => None,
        }
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        match self {
            ProcessedSpan::Normal(span) | ProcessedSpan::Orphan(span) => {
                span.parent_span_id.as_deref()
            }
            ProcessedSpan::Gap(_) => None,
        }
    }

    pub fn start_timestamp(&self) -> TimePoint {
        match self {
            ProcessedSpan::Normal(span) | ProcessedSpan::Orphan(span) => span.start_timestamp,
            ProcessedSpan::Gap(gap) => gap.start_timestamp,
        }
    }

    pub fn end_timestamp(&self) -> Option<TimePoint> {
        match self {
            ProcessedSpan::Normal(span) | ProcessedSpan::Orphan(span) => span.timestamp,
            ProcessedSpan::Gap(gap) => Some(gap.timestamp),
        }
    }

    pub fn is_orphan(&self) -> bool {
        match self {
            ProcessedSpan::Normal(_) => false,
            ProcessedSpan::Orphan(_) => true,
            ProcessedSpan::Gap(gap) => gap.is_orphan,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, ProcessedSpan::Gap(_))
    }

    /// The underlying recorded span, `None` for gaps.
    pub fn span(&self) -> Option<&Span> {
        match self {
            ProcessedSpan::Normal(span) | ProcessedSpan::Orphan(span) => Some(span),
            ProcessedSpan::Gap(_) => None,
        }
    }
}

/// `contexts.trace` of a transaction event, describes the root span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    #[serde(default)]
    pub trace_id: Option<TraceId>,
    #[serde(default)]
    pub span_id: Option<SpanId>,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<SpanId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub exclusive_time: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contexts {
    #[serde(default)]
    pub trace: Option<TraceContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    Spans {
        data: Vec<Span>,
    },
    /// Breadcrumbs, requests etc. Nothing in here looks at them.
    #[serde(other)]
    Other,
}

/// The transaction event as delivered by the host application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    #[serde(default)]
    pub id: EventId,
    #[serde(default)]
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub start_timestamp: Option<TimePoint>,
    #[serde(default)]
    pub end_timestamp: Option<TimePoint>,
    #[serde(default)]
    pub contexts: Contexts,
}

impl TransactionEvent {
    /// Spans of the first `spans` entry, if the event has one.
    pub fn spans_entry(&self) -> Option<&[Span]> {
        self.entries.iter().find_map(|entry| match entry {
            Entry::Spans { data } => Some(data.as_slice()),
            Entry::Other => None,
        })
    }

    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.contexts.trace.as_ref()
    }
}

/// Formats a duration given in seconds as milliseconds, e.g. `12,500.00ms`.
pub fn get_human_duration(duration: f64) -> String {
    let millis = duration * MILLISECONDS_PER_SECOND;
    let formatted = format!("{:.2}", millis.abs());
    let (integer, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if millis < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}ms")
}

/// `0.125` -> `12.500%`
pub fn to_percent(value: f64) -> String {
    format!("{:.3}%", value * 100.0)
}
