pub mod bounds;
pub mod config;
pub mod error;
pub mod in_view;
pub mod otlp;
pub mod quick_trace;
pub mod span_tree;
pub mod task_timer;
pub mod traversal;
pub mod types;

pub use bounds::{bounds_generator, BarBounds, Bounds, ViewProjection, ViewWindow};
pub use config::WaterfallConfig;
pub use error::QuickTraceError;
pub use in_view::SpansInViewMap;
pub use quick_trace::{
    flatten_relevant_paths, parse_quick_trace, CurrentEvent, ParsedQuickTrace, QuickTrace,
    QuickTraceEvent, TraceFull,
};
pub use span_tree::{parse_trace, SpanTree};
pub use traversal::{filter_trace, reduce_trace, TraceNode};
pub use types::{ProcessedSpan, Span, TimePoint, TransactionEvent};
