//! Turns OpenTelemetry trace exports into transaction events that [crate::span_tree::parse_trace]
//! understands.
//!
//! Every trace in the export becomes one event. Its first span without a parent plays the
//! transaction (root span), everything else goes into the event's span list.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;

use crate::task_timer::TaskTimer;
use crate::types::{
    time_point_from_unix_nano, Contexts, Entry, Span, TraceContext, TransactionEvent,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Parse a trace file: a JSON array of export requests, optionally gzipped.
pub fn parse_trace_file(file_bytes: &[u8]) -> Result<Vec<ExportTraceServiceRequest>> {
    let t = TaskTimer::new("Parsing trace file");

    let mut decompressed = Vec::new();
    let json_bytes = if file_bytes.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(file_bytes)
            .read_to_end(&mut decompressed)
            .context("Failed to decompress gzipped trace file")?;
        decompressed.as_slice()
    } else {
        file_bytes
    };

    let file_str =
        std::str::from_utf8(json_bytes).map_err(|e| anyhow::anyhow!("File is not UTF8!: {}", e))?;
    let traces: Vec<ExportTraceServiceRequest> =
        serde_json::from_str(file_str).context("Failed to parse trace file")?;

    t.stop();
    Ok(traces)
}

/// Attribute values as JSON. Bytes become a hex string, a missing value becomes `null`.
pub fn value_to_json(value: Option<Value>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(Value::StringValue(s)) => serde_json::Value::String(s),
        Some(Value::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Value::IntValue(i)) => serde_json::Value::from(i),
        Some(Value::DoubleValue(d)) => serde_json::Value::from(d),
        Some(Value::BytesValue(b)) => serde_json::Value::String(hex::encode(b)),
        Some(Value::ArrayValue(array)) => serde_json::Value::Array(
            array
                .values
                .into_iter()
                .map(|v| value_to_json(v.value))
                .collect(),
        ),
        Some(Value::KvlistValue(kvlist)) => serde_json::Value::Object(
            kvlist
                .values
                .into_iter()
                .map(|kv| (kv.key, value_to_json(kv.value.and_then(|v| v.value))))
                .collect(),
        ),
    }
}

fn attributes_to_data(attributes: &[KeyValue]) -> BTreeMap<String, serde_json::Value> {
    attributes
        .iter()
        .map(|attribute| {
            (
                attribute.key.clone(),
                value_to_json(attribute.value.clone().and_then(|v| v.value)),
            )
        })
        .collect()
}

fn service_name(attributes: &[KeyValue]) -> String {
    attributes
        .iter()
        .find(|attribute| attribute.key == "service.name")
        .and_then(|attribute| attribute.value.clone().and_then(|v| v.value))
        .map(|value| match value_to_json(Some(value)) {
            serde_json::Value::String(name) => name,
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn span_status(span: &OtlpSpan) -> Option<String> {
    let code = span.status.as_ref()?.code;
    if code == StatusCode::Ok as i32 {
        Some("ok".to_string())
    } else if code == StatusCode::Error as i32 {
        Some("internal_error".to_string())
    } else {
        None
    }
}

fn encode_span_id(id: &[u8]) -> Option<String> {
    if id.is_empty() {
        None
    } else {
        Some(hex::encode(id))
    }
}

fn convert_span(span: &OtlpSpan, service: &str) -> Span {
    let mut data = attributes_to_data(&span.attributes);
    data.insert(
        "service.name".to_string(),
        serde_json::Value::String(service.to_string()),
    );

    Span {
        span_id: hex::encode(&span.span_id),
        parent_span_id: encode_span_id(&span.parent_span_id),
        trace_id: hex::encode(&span.trace_id),
        op: Some(span.name.clone()),
        description: Some(service.to_string()),
        start_timestamp: time_point_from_unix_nano(span.start_time_unix_nano),
        timestamp: (span.end_time_unix_nano != 0)
            .then(|| time_point_from_unix_nano(span.end_time_unix_nano)),
        status: span_status(span),
        hash: None,
        exclusive_time: None,
        data,
    }
}

/// One transaction event per trace id found in the requests, ordered by trace id.
pub fn transaction_events(requests: &[ExportTraceServiceRequest]) -> Vec<TransactionEvent> {
    let t = TaskTimer::new("Extracting transaction events");

    let mut spans_by_trace: BTreeMap<String, Vec<Span>> = BTreeMap::new();
    for request in requests {
        for rs in &request.resource_spans {
            let service = match &rs.resource {
                Some(resource) => service_name(&resource.attributes),
                None => "no resource".to_string(),
            };

            for ss in &rs.scope_spans {
                for span in &ss.spans {
                    let span = convert_span(span, &service);
                    spans_by_trace
                        .entry(span.trace_id.clone())
                        .or_default()
                        .push(span);
                }
            }
        }
    }

    let events: Vec<TransactionEvent> = spans_by_trace
        .into_iter()
        .filter_map(|(trace_id, spans)| build_transaction_event(trace_id, spans))
        .collect();

    tracing::debug!(events = events.len(), "extracted transaction events");
    t.stop();

    events
}

fn build_transaction_event(trace_id: String, mut spans: Vec<Span>) -> Option<TransactionEvent> {
    let root_index = spans
        .iter()
        .position(|span| span.parent_span_id.is_none())
        .or_else(|| {
            spans
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.start_timestamp.total_cmp(&b.start_timestamp))
                .map(|(i, _)| i)
        })?;
    let root = spans.remove(root_index);

    let trace_context = TraceContext {
        trace_id: Some(trace_id),
        span_id: Some(root.span_id.clone()),
        op: root.op.clone(),
        status: root.status.clone(),
        parent_span_id: root.parent_span_id.clone(),
        description: root.description.clone(),
        hash: None,
        exclusive_time: None,
    };

    Some(TransactionEvent {
        id: root.span_id,
        entries: vec![Entry::Spans { data: spans }],
        start_timestamp: Some(root.start_timestamp),
        end_timestamp: root.timestamp,
        contexts: Contexts {
            trace: Some(trace_context),
        },
    })
}
