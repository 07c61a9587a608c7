//! Navigation across the transactions of a distributed trace.
//!
//! A quick trace is the list of transactions that share a trace id with the event being viewed.
//! [parse_quick_trace] sorts them into the breadcrumb positions relative to that event, and
//! [flatten_relevant_paths] cuts a full trace down to the part that matters for it.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::QuickTraceError;
use crate::task_timer::TaskTimer;
use crate::traversal::{reduce_trace, TraceNode};
use crate::types::{EventId, SpanId, TransactionEvent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub event_id: EventId,
    #[serde(default)]
    pub issue_id: Option<u64>,
    #[serde(default)]
    pub span: Option<SpanId>,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub project_slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub level: String,
}

/// One transaction of a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickTraceEvent {
    pub event_id: EventId,
    /// Distance from the root transaction, unknown for partial traces.
    #[serde(default)]
    pub generation: Option<u32>,
    #[serde(default)]
    pub parent_event_id: Option<EventId>,
    #[serde(default)]
    pub parent_span_id: Option<SpanId>,
    #[serde(default)]
    pub span_id: SpanId,
    #[serde(default)]
    pub transaction: String,
    #[serde(rename = "transaction.duration", default)]
    pub transaction_duration: f64,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub project_slug: String,
    #[serde(default)]
    pub errors: Vec<TraceError>,
}

/// A transaction together with all of its child transactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceFull {
    #[serde(flatten)]
    pub event: QuickTraceEvent,
    #[serde(default)]
    pub children: Vec<TraceFull>,
}

impl TraceNode for TraceFull {
    fn children(&self) -> &[TraceFull] {
        &self.children
    }
}

impl TraceFull {
    /// Copy of this node without its children.
    pub fn simplified(&self) -> TraceFull {
        TraceFull {
            event: self.event.clone(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickTraceType {
    Empty,
    Partial,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickTrace {
    #[serde(rename = "type")]
    pub kind: QuickTraceType,
    pub trace: Option<Vec<QuickTraceEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Transaction,
    Error,
}

/// The event the user is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentEvent {
    pub id: EventId,
    pub kind: EventKind,
}

impl CurrentEvent {
    pub fn transaction(id: impl Into<EventId>) -> CurrentEvent {
        CurrentEvent {
            id: id.into(),
            kind: EventKind::Transaction,
        }
    }

    pub fn error(id: impl Into<EventId>) -> CurrentEvent {
        CurrentEvent {
            id: id.into(),
            kind: EventKind::Error,
        }
    }
}

impl From<&TransactionEvent> for CurrentEvent {
    fn from(event: &TransactionEvent) -> Self {
        CurrentEvent::transaction(event.id.clone())
    }
}

/// A transaction is the current event if it is that transaction, or if the current event is an
/// error that happened inside of it.
pub fn is_current_event(event: &QuickTraceEvent, current_event: &CurrentEvent) -> bool {
    match current_event.kind {
        EventKind::Transaction => event.event_id == current_event.id,
        EventKind::Error => event
            .errors
            .iter()
            .any(|error| error.event_id == current_event.id),
    }
}

/// Transactions of a quick trace sorted into their position relative to the current event.
/// `ancestors` and `descendants` are only known for full traces.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuickTrace<'a> {
    pub root: Option<&'a QuickTraceEvent>,
    pub ancestors: Option<Vec<&'a QuickTraceEvent>>,
    pub parent: Option<&'a QuickTraceEvent>,
    pub current: &'a QuickTraceEvent,
    pub children: Vec<&'a QuickTraceEvent>,
    pub descendants: Option<Vec<&'a QuickTraceEvent>>,
}

/// Slowest transactions first.
fn sort_trace_lite(events: &mut [&QuickTraceEvent]) {
    events.sort_by(|a, b| b.transaction_duration.total_cmp(&a.transaction_duration));
}

pub fn parse_quick_trace<'a>(
    quick_trace: &'a QuickTrace,
    current_event: &CurrentEvent,
) -> Result<ParsedQuickTrace<'a>, QuickTraceError> {
    let trace = match (&quick_trace.kind, &quick_trace.trace) {
        (QuickTraceType::Empty, _) | (_, None) => return Err(QuickTraceError::EmptyTrace),
        (_, Some(trace)) => trace,
    };
    let is_full_trace = quick_trace.kind == QuickTraceType::Full;

    let current = trace
        .iter()
        .find(|event| is_current_event(event, current_event))
        .ok_or(QuickTraceError::CurrentEventNotInTrace)?;

    // The direct parent takes priority over the root: if the root is the parent it is shown as
    // the parent only.
    let parent = current.parent_event_id.as_ref().and_then(|parent_event_id| {
        trace
            .iter()
            .find(|event| &event.event_id == parent_event_id)
    });

    let root = trace.iter().find(|event| {
        event.event_id != current.event_id
            && Some(&event.event_id) != parent.map(|parent| &parent.event_id)
            && event.generation == Some(0)
    });

    let current_generation = current.generation.map(i64::from);

    let is_child = |event: &QuickTraceEvent| {
        event.parent_event_id.as_ref() == Some(&current.event_id)
    };
    // Descendants start at the generation after the direct children.
    let is_descendant = |event: &QuickTraceEvent| match (current_generation, event.generation) {
        (Some(current_generation), Some(generation)) => {
            current_generation + 1 < i64::from(generation)
        }
        _ => false,
    };
    // Ancestors end at the generation before the direct parent and never include the root.
    let is_ancestor = |event: &QuickTraceEvent| match (current_generation, event.generation) {
        (Some(current_generation), Some(generation)) => {
            generation > 0 && current_generation - 1 > i64::from(generation)
        }
        _ => false,
    };

    let mut children = Vec::new();
    let mut ancestors = is_full_trace.then(Vec::new);
    let mut descendants = is_full_trace.then(Vec::new);
    let mut projects = HashSet::new();

    for event in trace {
        projects.insert(event.project_id);

        if is_child(event) {
            children.push(event);
        }
        if let Some(ancestors) = ancestors.as_mut() {
            if is_ancestor(event) {
                ancestors.push(event);
            }
        }
        if let Some(descendants) = descendants.as_mut() {
            if is_descendant(event) {
                descendants.push(event);
            }
        }
    }

    if is_full_trace && projects.len() > 1 {
        tracing::info!(
            target: "span_waterfall::analytics",
            projects = projects.len(),
            "quick trace spans multiple projects"
        );
    }

    sort_trace_lite(&mut children);
    if let Some(ancestors) = ancestors.as_mut() {
        sort_trace_lite(ancestors);
    }
    if let Some(descendants) = descendants.as_mut() {
        sort_trace_lite(descendants);
    }

    Ok(ParsedQuickTrace {
        root,
        ancestors,
        parent,
        current,
        children,
        descendants,
    })
}

/// Reduce a full trace to the path from its root down to the current event, followed by the
/// current event's own subtree in breadth-first order. Returned nodes have no children.
pub fn flatten_relevant_paths(
    current_event: &CurrentEvent,
    trace_full: &TraceFull,
) -> Result<Vec<TraceFull>, QuickTraceError> {
    let t = TaskTimer::new("Flattening relevant paths");

    let mut relevant_path = Vec::new();
    let mut matches: Vec<&TraceFull> = Vec::new();

    let mut paths: VecDeque<(&TraceFull, Vec<&TraceFull>)> = VecDeque::new();
    paths.push_back((trace_full, Vec::new()));

    while let Some((event, path)) = paths.pop_front() {
        if is_current_event(&event.event, current_event) {
            relevant_path.extend(path.iter().map(|node| node.simplified()));
            matches.push(event);
        } else {
            for child in &event.children {
                let mut child_path = path.clone();
                child_path.push(event);
                paths.push_back((child, child_path));
            }
        }
    }

    if matches.is_empty() {
        return Err(QuickTraceError::NoRelevantPath);
    }

    let mut queue: VecDeque<&TraceFull> = matches.into_iter().collect();
    while let Some(event) = queue.pop_front() {
        relevant_path.push(event.simplified());
        queue.extend(event.children.iter());
    }

    t.stop();
    Ok(relevant_path)
}

/// Totals over a whole trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceMeta {
    pub projects: usize,
    pub transactions: usize,
    pub errors: usize,
}

pub fn get_trace_meta(trace: &TraceFull) -> TraceMeta {
    let (projects, transactions, errors) = reduce_trace(
        trace,
        |(mut projects, transactions, errors), node: &TraceFull| {
            projects.insert(node.event.project_id);
            (projects, transactions + 1, errors + node.event.errors.len())
        },
        (HashSet::new(), 0, 0),
    );

    TraceMeta {
        projects: projects.len(),
        transactions,
        errors,
    }
}
