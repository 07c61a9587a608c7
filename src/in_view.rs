use std::collections::HashMap;

use crate::config::WaterfallConfig;
use crate::types::SpanId;

/// Keeps track of which spans are currently scrolled into view, and how deep they are in the
/// tree, so the waterfall can scroll horizontally to keep their toggle buttons reachable.
///
/// Owned by whoever handles scrolling. It isn't synchronized, wrap it in a lock if it ever has to
/// be shared.
#[derive(Debug, Clone)]
pub struct SpansInViewMap {
    span_depths_in_view: HashMap<SpanId, usize>,
    tree_depth_sum: usize,
    is_root_span_in_view: bool,
    toggle_border_box: f64,
    toggle_button_max_width: f64,
}

impl Default for SpansInViewMap {
    fn default() -> Self {
        SpansInViewMap::new()
    }
}

impl SpansInViewMap {
    pub fn new() -> SpansInViewMap {
        SpansInViewMap::with_config(&WaterfallConfig::default())
    }

    pub fn with_config(config: &WaterfallConfig) -> SpansInViewMap {
        SpansInViewMap {
            span_depths_in_view: HashMap::new(),
            tree_depth_sum: 0,
            is_root_span_in_view: false,
            toggle_border_box: config.toggle_border_box(),
            toggle_button_max_width: config.toggle_button_max_width,
        }
    }

    /// Returns false if the span was already tracked, in which case nothing changes.
    pub fn add_span(&mut self, span_id: impl Into<SpanId>, tree_depth: usize) -> bool {
        let span_id = span_id.into();
        if self.span_depths_in_view.contains_key(&span_id) {
            return false;
        }

        self.span_depths_in_view.insert(span_id, tree_depth);
        self.tree_depth_sum += tree_depth;

        if tree_depth == 0 {
            self.is_root_span_in_view = true;
        }

        true
    }

    /// Returns false if the span wasn't tracked.
    ///
    /// Removing any depth 0 span marks the root as out of view, even if another depth 0 span is
    /// still tracked.
    pub fn remove_span(&mut self, span_id: &str) -> bool {
        let Some(tree_depth) = self.span_depths_in_view.remove(span_id) else {
            return false;
        };

        self.tree_depth_sum -= tree_depth;

        if tree_depth == 0 {
            self.is_root_span_in_view = false;
        }

        true
    }

    pub fn contains(&self, span_id: &str) -> bool {
        self.span_depths_in_view.contains_key(span_id)
    }

    pub fn depth_of(&self, span_id: &str) -> Option<usize> {
        self.span_depths_in_view.get(span_id).copied()
    }

    pub fn len(&self) -> usize {
        self.span_depths_in_view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.span_depths_in_view.is_empty()
    }

    pub fn tree_depth_sum(&self) -> usize {
        self.tree_depth_sum
    }

    pub fn is_root_span_in_view(&self) -> bool {
        self.is_root_span_in_view
    }

    /// Horizontal scroll offset (in pixels) that brings the toggle buttons at the average depth of
    /// the visible spans into view. No scrolling is needed while the root is visible, and none is
    /// possible with nothing in view.
    pub fn scroll_offset(&self) -> f64 {
        if self.is_root_span_in_view || self.is_empty() {
            return 0.0;
        }

        let average_depth = (self.tree_depth_sum as f64 / self.len() as f64).round();
        average_depth * (self.toggle_border_box / 2.0) - self.toggle_button_max_width / 2.0
    }
}
