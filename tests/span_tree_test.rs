use std::collections::HashMap;

use span_waterfall::config::WaterfallConfig;
use span_waterfall::span_tree::{
    compare_spans, insert_gap_spans, parse_trace, MISSING_INSTRUMENTATION_DESCRIPTION,
};
use span_waterfall::types::{ProcessedSpan, TransactionEvent};

use test_helpers::{create_test_event, create_test_span, ROOT_SPAN_ID, TRACE_ID};

fn child_ids<'a>(children: &'a [ProcessedSpan]) -> Vec<&'a str> {
    children.iter().filter_map(|span| span.span_id()).collect()
}

#[test]
fn test_event_without_spans_uses_event_bounds() {
    let mut event = create_test_event(10.0, 20.0, vec![]);
    let tree = parse_trace(&event);
    assert!(tree.child_spans.is_empty());
    assert!(tree.spans.is_empty());
    assert_eq!(tree.trace_start_timestamp, 10.0);
    assert_eq!(tree.trace_end_timestamp, 20.0);
    assert_eq!(tree.root_span_id, ROOT_SPAN_ID);
    assert_eq!(tree.trace_id, TRACE_ID);
    assert_eq!(tree.op, "http.server");

    // No spans entry at all behaves the same.
    event.entries.clear();
    let tree = parse_trace(&event);
    assert!(tree.child_spans.is_empty());
    assert_eq!(tree.trace_end_timestamp, 20.0);
}

#[test]
fn test_missing_trace_context_defaults() {
    let event = TransactionEvent {
        start_timestamp: Some(1.0),
        end_timestamp: Some(2.0),
        ..Default::default()
    };
    let tree = parse_trace(&event);
    assert_eq!(tree.op, "transaction");
    assert_eq!(tree.root_span_id, "");
    assert_eq!(tree.root_span_status, None);
}

#[test]
fn test_spans_are_grouped_by_parent_and_sorted() {
    let event = create_test_event(
        10.0,
        20.0,
        vec![
            create_test_span("b", Some(ROOT_SPAN_ID), 12.0, Some(13.0)),
            create_test_span("a", Some(ROOT_SPAN_ID), 11.0, Some(12.0)),
            create_test_span("a1", Some("a"), 11.5, Some(11.8)),
            create_test_span("a0", Some("a"), 11.1, Some(11.2)),
        ],
    );

    let tree = parse_trace(&event);
    assert_eq!(child_ids(tree.children_of(ROOT_SPAN_ID)), vec!["a", "b"]);
    assert_eq!(child_ids(tree.children_of("a")), vec!["a0", "a1"]);
    assert!(tree.children_of("b").is_empty());
}

#[test]
fn test_orphans_are_reattached_to_root_and_sorted_last() {
    let event = create_test_event(
        10.0,
        20.0,
        vec![
            create_test_span("late", Some(ROOT_SPAN_ID), 15.0, Some(16.0)),
            create_test_span("lost", Some("does-not-exist"), 10.5, Some(11.0)),
            create_test_span("no-parent", None, 10.2, Some(10.4)),
            create_test_span("empty-parent", Some(""), 10.1, Some(10.3)),
            create_test_span("early", Some(ROOT_SPAN_ID), 11.0, Some(12.0)),
        ],
    );

    let tree = parse_trace(&event);
    let root_children = tree.children_of(ROOT_SPAN_ID);
    assert_eq!(
        child_ids(root_children),
        vec!["early", "late", "empty-parent", "no-parent", "lost"]
    );

    for span in root_children {
        let expect_orphan = !matches!(span.span_id(), Some("early") | Some("late"));
        assert_eq!(span.is_orphan(), expect_orphan, "{:?}", span.span_id());
        assert_eq!(span.parent_span_id(), Some(ROOT_SPAN_ID));
    }

    // The input event is left alone.
    assert_eq!(
        event.spans_entry().unwrap()[1].parent_span_id.as_deref(),
        Some("does-not-exist")
    );
    // The span list of the tree carries the reattached parent.
    let lost = tree.spans.iter().find(|s| s.span_id == "lost").unwrap();
    assert_eq!(lost.parent_span_id.as_deref(), Some(ROOT_SPAN_ID));
}

#[test]
fn test_every_span_appears_exactly_once() {
    let spans = vec![
        create_test_span("a", Some(ROOT_SPAN_ID), 1.0, Some(2.0)),
        create_test_span("b", Some("a"), 1.1, Some(1.5)),
        create_test_span("c", Some("b"), 1.2, Some(1.3)),
        create_test_span("d", Some("zzz"), 1.0, None),
        create_test_span("e", Some("a"), 1.1, Some(1.9)),
        create_test_span("f", None, 3.0, Some(4.0)),
    ];
    let event = create_test_event(1.0, 2.0, spans.clone());
    let tree = parse_trace(&event);

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for children in tree.child_spans.values() {
        for span in children {
            *seen.entry(span.span_id().unwrap()).or_default() += 1;
        }
    }

    assert_eq!(seen.len(), spans.len());
    assert!(seen.values().all(|&count| count == 1));
    assert_eq!(tree.spans.len(), spans.len());
}

#[test]
fn test_sibling_lists_respect_ordering_rule() {
    let event = create_test_event(
        0.0,
        10.0,
        vec![
            create_test_span("o2", Some("x"), 1.0, Some(2.0)),
            create_test_span("n3", Some(ROOT_SPAN_ID), 5.0, Some(6.0)),
            create_test_span("o1", Some("y"), 0.5, Some(2.0)),
            create_test_span("n1", Some(ROOT_SPAN_ID), 2.0, Some(3.0)),
            create_test_span("n2", Some(ROOT_SPAN_ID), 2.0, Some(4.0)),
        ],
    );
    let tree = parse_trace(&event);

    for children in tree.child_spans.values() {
        let first_orphan = children.iter().position(|span| span.is_orphan());
        if let Some(first_orphan) = first_orphan {
            assert!(children[first_orphan..].iter().all(|span| span.is_orphan()));
        }
        for pair in children.windows(2) {
            if pair[0].is_orphan() == pair[1].is_orphan() {
                assert!(pair[0].start_timestamp() <= pair[1].start_timestamp());
            }
        }
    }

    // Equal start times keep their input order.
    assert_eq!(
        child_ids(tree.children_of(ROOT_SPAN_ID)),
        vec!["n1", "n2", "n3", "o1", "o2"]
    );
}

#[test]
fn test_trace_bounds_extend_from_spans() {
    let event = create_test_event(
        10.0,
        20.0,
        vec![
            create_test_span("a", Some(ROOT_SPAN_ID), 9.0, Some(15.0)),
            create_test_span("b", Some(ROOT_SPAN_ID), 12.0, Some(21.5)),
        ],
    );
    let tree = parse_trace(&event);
    assert_eq!(tree.trace_start_timestamp, 9.0);
    assert_eq!(tree.trace_end_timestamp, 21.5);
}

#[test]
fn test_span_without_end_pushes_trace_end_to_its_start() {
    let event = create_test_event(
        10.0,
        20.0,
        vec![
            create_test_span("a", Some(ROOT_SPAN_ID), 11.0, Some(12.0)),
            create_test_span("unfinished", Some(ROOT_SPAN_ID), 25.0, None),
        ],
    );
    let tree = parse_trace(&event);
    assert_eq!(tree.trace_end_timestamp, 25.0);
}

#[test]
fn test_span_without_end_never_shrinks_trace_end() {
    let event = create_test_event(
        10.0,
        20.0,
        vec![create_test_span("unfinished", Some(ROOT_SPAN_ID), 15.0, None)],
    );
    let tree = parse_trace(&event);
    assert_eq!(tree.trace_start_timestamp, 10.0);
    assert_eq!(tree.trace_end_timestamp, 20.0);
}

#[test]
fn test_event_without_timestamps_takes_them_from_spans() {
    let mut event = create_test_event(
        0.0,
        0.0,
        vec![
            create_test_span("a", Some(ROOT_SPAN_ID), 3.0, None),
            create_test_span("b", Some(ROOT_SPAN_ID), 2.0, Some(4.0)),
        ],
    );
    event.start_timestamp = None;
    event.end_timestamp = None;

    let tree = parse_trace(&event);
    assert_eq!(tree.trace_start_timestamp, 2.0);
    assert_eq!(tree.trace_end_timestamp, 4.0);
}

#[test]
fn test_self_parented_span_is_not_an_orphan() {
    let event = create_test_event(
        0.0,
        10.0,
        vec![create_test_span("loop", Some("loop"), 1.0, Some(2.0))],
    );
    let tree = parse_trace(&event);
    let children = tree.children_of("loop");
    assert_eq!(children.len(), 1);
    assert!(!children[0].is_orphan());

    // It isn't reachable from the root, so flattening lists nothing and terminates.
    assert!(tree.flatten().is_empty());
}

#[test]
fn test_root_span() {
    let event = create_test_event(
        10.0,
        20.0,
        vec![create_test_span("a", Some(ROOT_SPAN_ID), 11.0, Some(22.0))],
    );
    let tree = parse_trace(&event);
    let root = tree.root_span();
    assert_eq!(root.span_id, ROOT_SPAN_ID);
    assert_eq!(root.op.as_deref(), Some("http.server"));
    assert_eq!(root.description.as_deref(), Some("GET /api"));
    assert_eq!(root.status.as_deref(), Some("ok"));
    assert_eq!(root.exclusive_time, Some(1.5));
    assert_eq!(root.start_timestamp, 10.0);
    assert_eq!(root.timestamp, Some(22.0));
    assert_eq!(tree.duration(), 12.0);
}

#[test]
fn test_flatten_is_depth_first() {
    let event = create_test_event(
        0.0,
        10.0,
        vec![
            create_test_span("b", Some(ROOT_SPAN_ID), 5.0, Some(6.0)),
            create_test_span("a", Some(ROOT_SPAN_ID), 1.0, Some(4.0)),
            create_test_span("a2", Some("a"), 2.0, Some(3.0)),
            create_test_span("a1", Some("a"), 1.5, Some(2.0)),
            create_test_span("a1x", Some("a1"), 1.6, Some(1.7)),
        ],
    );
    let tree = parse_trace(&event);
    let rows = tree.flatten();

    let summary: Vec<(&str, usize, bool)> = rows
        .iter()
        .map(|row| (row.span.span_id().unwrap(), row.depth, row.has_children))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a", 1, true),
            ("a1", 2, true),
            ("a1x", 3, false),
            ("a2", 2, false),
            ("b", 1, false),
        ]
    );
}

#[test]
fn test_flatten_with_gaps_marks_missing_instrumentation() {
    let event = create_test_event(
        0.0,
        10.0,
        vec![
            create_test_span("a", Some(ROOT_SPAN_ID), 1.0, Some(2.0)),
            create_test_span("b", Some(ROOT_SPAN_ID), 2.05, Some(3.0)),
            create_test_span("c", Some(ROOT_SPAN_ID), 5.0, Some(6.0)),
        ],
    );
    let tree = parse_trace(&event);
    let rows = tree.flatten_with_gaps(&WaterfallConfig::default());

    assert_eq!(rows.len(), 4);
    match &rows[2].span {
        ProcessedSpan::Gap(gap) => {
            assert_eq!(gap.start_timestamp, 3.0);
            assert_eq!(gap.timestamp, 5.0);
            assert_eq!(
                gap.description.as_deref(),
                Some(MISSING_INSTRUMENTATION_DESCRIPTION)
            );
            assert!(!gap.is_orphan);
        }
        other => panic!("expected a gap, got {other:?}"),
    }
    assert_eq!(rows[2].depth, 1);
    assert!(!rows[2].has_children);
}

#[test]
fn test_gap_threshold_comes_from_config() {
    let event = create_test_event(
        0.0,
        10.0,
        vec![
            create_test_span("a", Some(ROOT_SPAN_ID), 1.0, Some(2.0)),
            create_test_span("b", Some(ROOT_SPAN_ID), 4.0, Some(5.0)),
        ],
    );
    let tree = parse_trace(&event);

    let relaxed = WaterfallConfig::from_json_str(r#"{"missing_instrumentation_threshold": 5.0}"#)
        .unwrap();
    assert_eq!(tree.flatten_with_gaps(&relaxed).len(), 2);

    let strict = WaterfallConfig {
        missing_instrumentation_threshold: 1.0,
        ..Default::default()
    };
    let rows = tree.flatten_with_gaps(&strict);
    assert_eq!(rows.len(), 3);
    assert!(rows[1].span.is_gap());
}

#[test]
fn test_nan_start_times_do_not_break_sorting() {
    let spans: Vec<_> = (0..64)
        .map(|i| {
            let start = if i % 3 == 0 { f64::NAN } else { 64.0 - i as f64 };
            create_test_span(&format!("s{i}"), Some(ROOT_SPAN_ID), start, Some(70.0))
        })
        .collect();
    let event = create_test_event(0.0, 100.0, spans);

    let tree = parse_trace(&event);
    let children = tree.children_of(ROOT_SPAN_ID);
    assert_eq!(children.len(), 64);
    assert_eq!(tree.trace_start_timestamp, 0.0);
    assert_eq!(tree.trace_end_timestamp, 100.0);

    let finite: Vec<f64> = children
        .iter()
        .map(|span| span.start_timestamp())
        .filter(|start| !start.is_nan())
        .collect();
    assert!(finite.windows(2).all(|pair| pair[0] <= pair[1]));
    // NaN sorts after every real start time.
    assert!(children[finite.len()..]
        .iter()
        .all(|span| span.start_timestamp().is_nan()));
}

#[test]
fn test_gaps_respect_overlapping_siblings() {
    let siblings = vec![
        ProcessedSpan::Normal(create_test_span("long", Some("p"), 0.0, Some(10.0))),
        ProcessedSpan::Normal(create_test_span("short", Some("p"), 1.0, Some(2.0))),
        ProcessedSpan::Normal(create_test_span("after", Some("p"), 9.0, Some(11.0))),
        ProcessedSpan::Orphan(create_test_span("orphan", Some("p"), 20.0, Some(21.0))),
    ];

    let with_gaps = insert_gap_spans(&siblings, 0.1);
    assert_eq!(with_gaps.len(), 5);
    assert!(with_gaps[..3].iter().all(|span| !span.is_gap()));
    assert!(with_gaps[3].is_gap());
    // The gap before an orphan is drawn with the orphans.
    assert!(with_gaps[3].is_orphan());
    assert_eq!(with_gaps[3].start_timestamp(), 11.0);
}

#[test]
fn test_compare_spans() {
    use std::cmp::Ordering;

    let normal = ProcessedSpan::Normal(create_test_span("n", Some("p"), 5.0, None));
    let orphan = ProcessedSpan::Orphan(create_test_span("o", Some("p"), 1.0, None));
    let earlier = ProcessedSpan::Normal(create_test_span("e", Some("p"), 1.0, None));

    assert_eq!(compare_spans(&orphan, &normal), Ordering::Greater);
    assert_eq!(compare_spans(&normal, &orphan), Ordering::Less);
    assert_eq!(compare_spans(&earlier, &normal), Ordering::Less);
    assert_eq!(compare_spans(&normal, &normal), Ordering::Equal);
}

#[test]
fn test_parse_trace_from_json() {
    let event: TransactionEvent = serde_json::from_str(
        r#"{
            "id": "e1",
            "startTimestamp": 100.0,
            "endTimestamp": 101.0,
            "entries": [{"type": "spans", "data": [
                {"span_id": "s1", "parent_span_id": "r", "trace_id": "t", "op": "db",
                 "start_timestamp": 100.1, "timestamp": 100.2, "data": {"db.system": "postgres"}},
                {"span_id": "s2", "parent_span_id": "gone", "trace_id": "t",
                 "start_timestamp": 100.0, "timestamp": 100.5}
            ]}],
            "contexts": {"trace": {"trace_id": "t", "span_id": "r", "op": "http.server"}}
        }"#,
    )
    .unwrap();

    let tree = parse_trace(&event);
    assert_eq!(child_ids(tree.children_of("r")), vec!["s1", "s2"]);
    assert!(tree.children_of("r")[1].is_orphan());
    assert_eq!(
        tree.children_of("r")[0].span().unwrap().data["db.system"],
        "postgres"
    );
}
