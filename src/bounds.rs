//! Projection of time intervals onto the zoomed/panned view window of the waterfall.
//!
//! Everything here is expressed in fractions of the view window: `0.0` is its left edge and `1.0`
//! its right edge. Intervals that stick out of the window produce values below zero or above one,
//! it's up to the renderer to clip them.

use crate::config::MIN_BAR_WIDTH;
use crate::types::{ProcessedSpan, TimePoint};

/// The part of the trace that is currently on screen, as fractions of the trace duration.
/// Callers keep `0 <= view_start <= view_end <= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewWindow {
    pub view_start: f64,
    pub view_end: f64,
}

impl ViewWindow {
    pub fn new(view_start: f64, view_end: f64) -> ViewWindow {
        ViewWindow {
            view_start,
            view_end,
        }
    }

    /// The whole trace is visible.
    pub fn full() -> ViewWindow {
        ViewWindow::new(0.0, 1.0)
    }
}

impl Default for ViewWindow {
    fn default() -> Self {
        ViewWindow::full()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounds {
    /// The trace has no duration, so nothing can be placed within it.
    TraceTimestampsEqual { is_span_visible_in_view: bool },
    /// The view window has no duration.
    InvalidViewWindow { is_span_visible_in_view: bool },
    TimestampsEqual {
        start: f64,
        width: f64,
        is_span_visible_in_view: bool,
    },
    TimestampsReversed {
        start: f64,
        end: f64,
        is_span_visible_in_view: bool,
    },
    TimestampsStable {
        start: f64,
        end: f64,
        is_span_visible_in_view: bool,
    },
}

impl Bounds {
    pub fn is_span_visible_in_view(&self) -> bool {
        match *self {
            Bounds::TraceTimestampsEqual {
                is_span_visible_in_view,
            }
            | Bounds::InvalidViewWindow {
                is_span_visible_in_view,
            }
            | Bounds::TimestampsEqual {
                is_span_visible_in_view,
                ..
            }
            | Bounds::TimestampsReversed {
                is_span_visible_in_view,
                ..
            }
            | Bounds::TimestampsStable {
                is_span_visible_in_view,
                ..
            } => is_span_visible_in_view,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampStatus {
    Stable,
    Reversed,
    Equal,
}

fn get_timestamp_status(start: TimePoint, end: TimePoint) -> TimestampStatus {
    if start > end {
        TimestampStatus::Reversed
    } else if start == end {
        TimestampStatus::Equal
    } else {
        TimestampStatus::Stable
    }
}

fn normalize_timestamps(start: TimePoint, end: TimePoint) -> (TimePoint, TimePoint) {
    if start > end {
        (end, start)
    } else {
        (start, end)
    }
}

/// Maps timestamps of one trace onto one view window.
///
/// Everything the projection needs is computed once in [ViewProjection::new], after that the value
/// is immutable and can be shared freely between threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    trace_duration: f64,
    view_start_timestamp: TimePoint,
    view_duration: f64,
}

impl ViewProjection {
    /// Trace timestamps given in the wrong order are swapped.
    pub fn new(
        trace_start_timestamp: TimePoint,
        trace_end_timestamp: TimePoint,
        window: ViewWindow,
    ) -> ViewProjection {
        let (trace_start, trace_end) =
            normalize_timestamps(trace_start_timestamp, trace_end_timestamp);
        let trace_duration = trace_end - trace_start;

        let view_start_timestamp = trace_start + window.view_start * trace_duration;
        let view_end_timestamp = trace_end - (1.0 - window.view_end) * trace_duration;

        ViewProjection {
            trace_duration,
            view_start_timestamp,
            view_duration: view_end_timestamp - view_start_timestamp,
        }
    }

    pub fn view_start_timestamp(&self) -> TimePoint {
        self.view_start_timestamp
    }

    pub fn view_end_timestamp(&self) -> TimePoint {
        self.view_start_timestamp + self.view_duration
    }

    pub fn view_duration(&self) -> f64 {
        self.view_duration
    }

    pub fn project(&self, start_timestamp: TimePoint, end_timestamp: TimePoint) -> Bounds {
        if self.trace_duration <= 0.0 {
            return Bounds::TraceTimestampsEqual {
                is_span_visible_in_view: true,
            };
        }

        if self.view_duration <= 0.0 {
            return Bounds::InvalidViewWindow {
                is_span_visible_in_view: true,
            };
        }

        let status = get_timestamp_status(start_timestamp, end_timestamp);
        let (start_timestamp, end_timestamp) = normalize_timestamps(start_timestamp, end_timestamp);

        let start = (start_timestamp - self.view_start_timestamp) / self.view_duration;
        let end = (end_timestamp - self.view_start_timestamp) / self.view_duration;

        match status {
            TimestampStatus::Equal => Bounds::TimestampsEqual {
                start,
                width: 1.0,
                // A zero-width bar right on the edge of the window is still drawn.
                is_span_visible_in_view: end >= 0.0 && start <= 1.0,
            },
            TimestampStatus::Reversed => Bounds::TimestampsReversed {
                start,
                end,
                is_span_visible_in_view: end > 0.0 && start < 1.0,
            },
            TimestampStatus::Stable => Bounds::TimestampsStable {
                start,
                end,
                is_span_visible_in_view: end > 0.0 && start < 1.0,
            },
        }
    }

    /// Inverse of the projection: the timestamp under a position in the view window,
    /// e.g. for a cursor hovering over the minimap.
    pub fn time_at(&self, fraction: f64) -> TimePoint {
        self.view_start_timestamp + fraction * self.view_duration
    }
}

/// Closure form of [ViewProjection], taking `(interval_start, interval_end)`.
pub fn bounds_generator(
    trace_start_timestamp: TimePoint,
    trace_end_timestamp: TimePoint,
    view_start: f64,
    view_end: f64,
) -> impl Fn(TimePoint, TimePoint) -> Bounds {
    let projection = ViewProjection::new(
        trace_start_timestamp,
        trace_end_timestamp,
        ViewWindow::new(view_start, view_end),
    );
    move |start, end| projection.project(start, end)
}

/// Where to draw a bar, as fractions of the view window. `left` and `width` are `None` when the
/// trace or the view window is degenerate and nothing can be placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarBounds {
    pub warning: Option<&'static str>,
    pub left: Option<f64>,
    pub width: Option<f64>,
    pub is_span_visible_in_view: bool,
}

impl BarBounds {
    fn unplaced(warning: Option<&'static str>, is_span_visible_in_view: bool) -> BarBounds {
        BarBounds {
            warning,
            left: None,
            width: None,
            is_span_visible_in_view,
        }
    }

    fn placed(
        warning: Option<&'static str>,
        left: f64,
        width: f64,
        is_span_visible_in_view: bool,
    ) -> BarBounds {
        BarBounds {
            warning,
            left: Some(left),
            width: Some(width),
            is_span_visible_in_view,
        }
    }
}

/// Bar placement without warnings, shared by markers and span groups.
fn unflagged_bar_bounds(bounds: Bounds) -> BarBounds {
    match bounds {
        Bounds::TraceTimestampsEqual {
            is_span_visible_in_view,
        }
        | Bounds::InvalidViewWindow {
            is_span_visible_in_view,
        } => BarBounds::unplaced(None, is_span_visible_in_view),
        Bounds::TimestampsEqual {
            start,
            is_span_visible_in_view,
            ..
        } => BarBounds::placed(None, start, MIN_BAR_WIDTH, is_span_visible_in_view),
        Bounds::TimestampsReversed {
            start,
            end,
            is_span_visible_in_view,
        }
        | Bounds::TimestampsStable {
            start,
            end,
            is_span_visible_in_view,
        } => BarBounds::placed(None, start, end - start, is_span_visible_in_view),
    }
}

/// Placement of a single instant, e.g. a measurement marker.
pub fn get_measurement_bounds(timestamp: TimePoint, projection: &ViewProjection) -> BarBounds {
    unflagged_bar_bounds(projection.project(timestamp, timestamp))
}

/// Earliest start and latest end of a group of spans. Spans without an end contribute their
/// start instead.
pub fn get_span_group_timestamps<'a>(
    group: impl IntoIterator<Item = &'a ProcessedSpan>,
) -> Option<(TimePoint, TimePoint)> {
    let mut min_max: Option<(TimePoint, TimePoint)> = None;

    for span in group {
        let start = span.start_timestamp();
        let end = span.end_timestamp().unwrap_or(start);
        min_max = Some(match min_max {
            Some((min_start, max_end)) => (min_start.min(start), max_end.max(end)),
            None => (start, end),
        });
    }

    min_max
}

/// Placement of a collapsed group of sibling spans, drawn as one bar covering all of them.
/// An empty group has nothing to draw.
pub fn get_span_group_bounds<'a>(
    group: impl IntoIterator<Item = &'a ProcessedSpan>,
    projection: &ViewProjection,
) -> BarBounds {
    let Some((start_timestamp, end_timestamp)) = get_span_group_timestamps(group) else {
        return BarBounds::unplaced(None, false);
    };

    unflagged_bar_bounds(projection.project(start_timestamp, end_timestamp))
}

/// Placement of a single span bar, with a warning attached to anything suspicious about its
/// timestamps.
pub fn get_span_bar_bounds(
    start_timestamp: TimePoint,
    end_timestamp: TimePoint,
    projection: &ViewProjection,
) -> BarBounds {
    match projection.project(start_timestamp, end_timestamp) {
        Bounds::TraceTimestampsEqual {
            is_span_visible_in_view,
        } => BarBounds::unplaced(Some("Trace times are equal"), is_span_visible_in_view),
        Bounds::InvalidViewWindow {
            is_span_visible_in_view,
        } => BarBounds::unplaced(Some("Invalid view window"), is_span_visible_in_view),
        Bounds::TimestampsEqual {
            start,
            is_span_visible_in_view,
            ..
        } => BarBounds::placed(
            Some("The start and end timestamps are equal"),
            start,
            MIN_BAR_WIDTH,
            is_span_visible_in_view,
        ),
        Bounds::TimestampsReversed {
            start,
            end,
            is_span_visible_in_view,
        } => BarBounds::placed(
            Some("The start and end timestamps are reversed"),
            start,
            end - start,
            is_span_visible_in_view,
        ),
        Bounds::TimestampsStable {
            start,
            end,
            is_span_visible_in_view,
        } => BarBounds::placed(None, start, end - start, is_span_visible_in_view),
    }
}

/// Bar placement for a processed span. Spans without an end are drawn as an instant.
pub fn get_processed_span_bounds(span: &ProcessedSpan, projection: &ViewProjection) -> BarBounds {
    let start = span.start_timestamp();
    get_span_bar_bounds(start, span.end_timestamp().unwrap_or(start), projection)
}
