//! Builds the span tree of a single transaction.
//!
//! Spans arrive as a flat list where every span points at its parent. [parse_trace] groups them
//! by parent id, reattaches spans whose parent can't be found to the root span, and works out
//! the time range covered by the whole trace.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::config::WaterfallConfig;
use crate::task_timer::TaskTimer;
use crate::types::{
    time_point_to_utc_string, GapSpan, ProcessedSpan, Span, SpanId, TimePoint, TraceId,
    TransactionEvent,
};

pub const DEFAULT_ROOT_OP: &str = "transaction";
pub const MISSING_INSTRUMENTATION_DESCRIPTION: &str = "Missing instrumentation";

#[derive(Debug, Clone, PartialEq)]
pub struct SpanTree {
    pub op: String,
    pub description: Option<String>,
    pub trace_id: TraceId,
    pub root_span_id: SpanId,
    pub root_span_status: Option<String>,
    pub parent_span_id: Option<SpanId>,
    pub hash: Option<String>,
    pub exclusive_time: Option<f64>,
    /// Not guaranteed to be before `trace_end_timestamp`.
    pub trace_start_timestamp: TimePoint,
    pub trace_end_timestamp: TimePoint,
    /// Input spans, orphans already pointing at the root span.
    pub spans: Vec<Span>,
    /// Children of each span, keyed by the parent's id.
    pub child_spans: BTreeMap<SpanId, Vec<ProcessedSpan>>,
}

/// One row of the flattened tree, in the order the waterfall draws them.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedSpan {
    pub span: ProcessedSpan,
    /// The root span has depth 0, its children depth 1 and so on.
    pub depth: usize,
    pub has_children: bool,
}

pub fn is_valid_span_id(span_id: Option<&str>) -> bool {
    span_id.is_some_and(|id| !id.is_empty())
}

/// Orphans go after everything else, otherwise order by start time. Equal start times keep
/// their original order.
pub fn compare_spans(first: &ProcessedSpan, second: &ProcessedSpan) -> Ordering {
    match (first.is_orphan(), second.is_orphan()) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }

    first
        .start_timestamp()
        .total_cmp(&second.start_timestamp())
}

struct TraceAccumulator {
    child_spans: BTreeMap<SpanId, Vec<ProcessedSpan>>,
    spans: Vec<Span>,
    trace_start_timestamp: Option<TimePoint>,
    trace_end_timestamp: Option<TimePoint>,
    orphan_count: usize,
}

impl TraceAccumulator {
    fn update_timestamps(&mut self, span: &Span) {
        // A start that isn't a number never replaces a known one.
        match self.trace_start_timestamp {
            Some(start) if span.start_timestamp < start => {
                self.trace_start_timestamp = Some(span.start_timestamp);
            }
            Some(_) => {}
            None => self.trace_start_timestamp = Some(span.start_timestamp),
        }

        // Spans without an end still push the end of the trace out to their start, but never pull
        // it back in.
        match self.trace_end_timestamp {
            None => {
                self.trace_end_timestamp = Some(span.timestamp.unwrap_or(span.start_timestamp));
            }
            Some(end) => match span.timestamp {
                Some(timestamp) if timestamp > end => {
                    self.trace_end_timestamp = Some(timestamp);
                }
                _ if span.start_timestamp > end => {
                    self.trace_end_timestamp = Some(span.start_timestamp);
                }
                _ => {}
            },
        }
    }
}

/// Build the span tree of a transaction event.
///
/// A span is an orphan when its parent id is missing or doesn't belong to any span of this
/// transaction. Orphans get the root span as their parent and are tagged as
/// [ProcessedSpan::Orphan]. The input event is left untouched.
pub fn parse_trace(event: &TransactionEvent) -> SpanTree {
    let trace_context = event.trace_context().cloned().unwrap_or_default();

    let mut tree = SpanTree {
        op: trace_context
            .op
            .unwrap_or_else(|| DEFAULT_ROOT_OP.to_string()),
        description: trace_context.description,
        trace_id: trace_context.trace_id.unwrap_or_default(),
        root_span_id: trace_context.span_id.unwrap_or_default(),
        root_span_status: trace_context.status,
        parent_span_id: trace_context.parent_span_id,
        hash: trace_context.hash,
        exclusive_time: trace_context.exclusive_time,
        trace_start_timestamp: event.start_timestamp.unwrap_or_default(),
        trace_end_timestamp: event.end_timestamp.unwrap_or_default(),
        spans: Vec::new(),
        child_spans: BTreeMap::new(),
    };

    let spans = match event.spans_entry() {
        Some(spans) if !spans.is_empty() => spans,
        _ => {
            tracing::debug!(event_id = %event.id, "transaction has no spans");
            return tree;
        }
    };

    let t = TaskTimer::new("Building span tree");

    // Any span may be a parent of another span, and the root transaction span is a parent of
    // all of them even though it isn't in the list.
    let root_span_id = tree.root_span_id.clone();
    let mut potential_parents: HashSet<&str> =
        spans.iter().map(|span| span.span_id.as_str()).collect();
    potential_parents.insert(root_span_id.as_str());

    let init = TraceAccumulator {
        child_spans: BTreeMap::new(),
        spans: Vec::with_capacity(spans.len()),
        trace_start_timestamp: event.start_timestamp,
        trace_end_timestamp: event.end_timestamp,
        orphan_count: 0,
    };

    let mut acc = spans.iter().fold(init, |mut acc, input_span| {
        let parent_span_id = input_span.parent_span_id.as_deref();
        let has_parent = parent_span_id.is_some_and(|id| potential_parents.contains(id));
        let is_orphan = !is_valid_span_id(parent_span_id) || !has_parent;

        let span = if is_orphan {
            tracing::trace!(
                span_id = %input_span.span_id,
                parent_span_id = ?parent_span_id,
                "reattaching orphan span to root"
            );
            acc.orphan_count += 1;
            Span {
                parent_span_id: Some(root_span_id.clone()),
                ..input_span.clone()
            }
        } else {
            input_span.clone()
        };

        acc.update_timestamps(&span);
        acc.spans.push(span.clone());

        let parent_key = span.parent_span_id.clone().unwrap_or_default();
        let processed = if is_orphan {
            ProcessedSpan::Orphan(span)
        } else {
            ProcessedSpan::Normal(span)
        };
        acc.child_spans.entry(parent_key).or_default().push(processed);

        acc
    });

    for children in acc.child_spans.values_mut() {
        children.sort_by(compare_spans);
    }

    tree.trace_start_timestamp = acc.trace_start_timestamp.unwrap_or_default();
    tree.trace_end_timestamp = acc.trace_end_timestamp.unwrap_or_default();
    tree.spans = acc.spans;
    tree.child_spans = acc.child_spans;

    tracing::debug!(
        spans = tree.spans.len(),
        orphans = acc.orphan_count,
        trace_start = %time_point_to_utc_string(tree.trace_start_timestamp),
        trace_end = %time_point_to_utc_string(tree.trace_end_timestamp),
        "parsed span tree"
    );
    t.stop();

    tree
}

/// Insert a gap span wherever a sibling starts more than `threshold` seconds after all previous
/// siblings have ended. `siblings` must already be sorted.
pub fn insert_gap_spans(siblings: &[ProcessedSpan], threshold: TimePoint) -> Vec<ProcessedSpan> {
    let mut result = Vec::with_capacity(siblings.len());
    let mut previous_end: Option<TimePoint> = None;

    for span in siblings {
        if span.is_gap() {
            continue;
        }

        let start = span.start_timestamp();
        if let Some(end) = previous_end {
            if start - end > threshold {
                result.push(ProcessedSpan::Gap(GapSpan {
                    start_timestamp: end,
                    timestamp: start,
                    description: Some(MISSING_INSTRUMENTATION_DESCRIPTION.to_string()),
                    is_orphan: span.is_orphan(),
                }));
            }
        }

        let end = span.end_timestamp().unwrap_or(start).max(start);
        previous_end = Some(previous_end.map_or(end, |previous| previous.max(end)));
        result.push(span.clone());
    }

    result
}

impl SpanTree {
    pub fn children_of(&self, span_id: &str) -> &[ProcessedSpan] {
        self.child_spans
            .get(span_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The transaction itself as a span, spanning the whole trace.
    pub fn root_span(&self) -> Span {
        Span {
            span_id: self.root_span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            trace_id: self.trace_id.clone(),
            op: Some(self.op.clone()),
            description: self.description.clone(),
            start_timestamp: self.trace_start_timestamp,
            timestamp: Some(self.trace_end_timestamp),
            status: self.root_span_status.clone(),
            hash: self.hash.clone(),
            exclusive_time: self.exclusive_time,
            data: BTreeMap::new(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.trace_end_timestamp - self.trace_start_timestamp
    }

    /// Depth-first list of all spans below the root, each child list in its sorted order.
    pub fn flatten(&self) -> Vec<FlattenedSpan> {
        self.flatten_impl(None)
    }

    /// Same as [SpanTree::flatten], with gap spans between siblings that are more than
    /// `missing_instrumentation_threshold` seconds apart.
    pub fn flatten_with_gaps(&self, config: &WaterfallConfig) -> Vec<FlattenedSpan> {
        self.flatten_impl(Some(config.missing_instrumentation_threshold))
    }

    fn flatten_impl(&self, gap_threshold: Option<TimePoint>) -> Vec<FlattenedSpan> {
        let mut rows = Vec::with_capacity(self.spans.len());

        // Each span's children are expanded only once, so a cycle in the parent ids can't make
        // this loop forever.
        let mut expanded: HashSet<SpanId> = HashSet::new();
        expanded.insert(self.root_span_id.clone());

        let children_at = |span_id: &str| -> Vec<ProcessedSpan> {
            let children = self.children_of(span_id);
            match gap_threshold {
                Some(threshold) => insert_gap_spans(children, threshold),
                None => children.to_vec(),
            }
        };

        let mut stack: Vec<(ProcessedSpan, usize)> = children_at(&self.root_span_id)
            .into_iter()
            .rev()
            .map(|span| (span, 1))
            .collect();

        while let Some((span, depth)) = stack.pop() {
            let children = match span.span_id() {
                Some(span_id) if expanded.insert(span_id.to_string()) => children_at(span_id),
                _ => Vec::new(),
            };

            for child in children.iter().rev() {
                stack.push((child.clone(), depth + 1));
            }

            rows.push(FlattenedSpan {
                has_children: !children.is_empty(),
                span,
                depth,
            });
        }

        rows
    }
}
