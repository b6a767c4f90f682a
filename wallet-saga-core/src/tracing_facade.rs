//! Minimal tracing facade (`spec.md` §4.7).
//!
//! The core calls `start_span`/`Span::end` directly at the four hot points
//! named in the spec's design notes: business-txn append, publish attempt,
//! consumer receive, saga transition. The concrete exporter/sampler is an
//! external collaborator — this module only wraps `opentelemetry` +
//! `tracing-opentelemetry` the way `oauth2-events::events::envelope` does,
//! so a real exporter can be plugged into the global propagator/provider by
//! the binary's composition root without this crate knowing about it.

use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::{
    SpanKind as OtelSpanKind, Status, TraceContextExt, TraceId as OtelTraceId,
};
use opentelemetry::Context as OtelContext;
use std::collections::HashMap;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const MAX_ATTRIBUTE_LEN: usize = 1024;

/// Mirrors the OpenTelemetry span kinds named in `spec.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Server,
    Client,
    Producer,
    Consumer,
    Internal,
}

impl From<SpanKind> for OtelSpanKind {
    fn from(kind: SpanKind) -> Self {
        match kind {
            SpanKind::Server => OtelSpanKind::Server,
            SpanKind::Client => OtelSpanKind::Client,
            SpanKind::Producer => OtelSpanKind::Producer,
            SpanKind::Consumer => OtelSpanKind::Consumer,
            SpanKind::Internal => OtelSpanKind::Internal,
        }
    }
}

/// Terminal status passed to [`Span::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error,
}

/// An opaque, propagatable trace context.
///
/// Carries just enough to round-trip through a `traceparent` string: this
/// crate never inspects trace/span ids directly, it only asks the
/// propagator to inject/extract them.
#[derive(Debug, Clone)]
pub struct TraceContext(OtelContext);

impl TraceContext {
    /// The trace id of the span this context carries, formatted as lowercase
    /// hex — used by tests to assert trace continuity (`spec.md` §8.1).
    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.0.span().span_context().trace_id())
    }

    fn is_valid(&self) -> bool {
        self.0.span().span_context().trace_id() != OtelTraceId::INVALID
    }
}

/// A span handle. Dropping it without calling [`Span::end`] is harmless —
/// the underlying `tracing::Span` still closes on drop — but callers should
/// always call `end` so the terminal status is recorded.
pub struct Span {
    inner: tracing::Span,
}

impl Span {
    /// Start a new span named `name`, optionally as a child of `parent`.
    /// With no parent, starts a new root trace. `name` need not be
    /// `'static` — consumer spans are named per event type at runtime.
    pub fn start(name: impl AsRef<str>, kind: SpanKind, parent: Option<&TraceContext>) -> Self {
        let span = tracing::info_span!("span", otel.name = name.as_ref());
        span.set_attribute("span.kind", format!("{:?}", OtelSpanKind::from(kind)));

        if let Some(parent) = parent {
            span.set_parent(parent.0.clone());
        }

        Span { inner: span }
    }

    pub fn set_attribute(&self, key: &'static str, value: impl Into<String>) {
        let mut value = value.into();
        if value.len() > MAX_ATTRIBUTE_LEN {
            value.truncate(MAX_ATTRIBUTE_LEN);
        }
        self.inner.set_attribute(key, value);
    }

    pub fn record_error(&self, err: &(dyn std::error::Error + 'static)) {
        self.inner
            .set_attribute("error.message", truncate(err.to_string()));
    }

    pub fn end(self, status: SpanStatus) {
        let otel_status = match status {
            SpanStatus::Ok => Status::Ok,
            SpanStatus::Error => Status::error(""),
        };
        self.inner.context().span().set_status(otel_status);
    }

    /// The trace context carried by this span, suitable for injecting into
    /// an outgoing envelope as `traceparent`.
    pub fn context(&self) -> TraceContext {
        TraceContext(self.inner.context())
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_ATTRIBUTE_LEN {
        s.truncate(MAX_ATTRIBUTE_LEN);
    }
    s
}

/// The trace context of the currently active `tracing::Span`.
pub fn current_context() -> TraceContext {
    TraceContext(tracing::Span::current().context())
}

struct MapInjector<'a>(&'a mut HashMap<String, String>);

impl<'a> Injector for MapInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

struct MapExtractor<'a>(&'a HashMap<String, String>);

impl<'a> Extractor for MapExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Serialize `ctx` to a `traceparent` header value (empty string if the
/// context carries no valid trace id).
pub fn traceparent_from_context(ctx: &TraceContext) -> Option<String> {
    if !ctx.is_valid() {
        return None;
    }
    let mut headers = HashMap::new();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx.0, &mut MapInjector(&mut headers));
    });
    headers.get("traceparent").cloned()
}

/// Serialize `ctx` to a `tracestate` header value, if any vendor state is
/// present.
pub fn tracestate_from_context(ctx: &TraceContext) -> Option<String> {
    let mut headers = HashMap::new();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx.0, &mut MapInjector(&mut headers));
    });
    headers.get("tracestate").cloned()
}

/// Parse a `traceparent` header value into a context usable as a span
/// parent. Returns `None` on any malformed input — callers should log a
/// warning and start a fresh root trace per `spec.md` §4.1.
pub fn context_from_traceparent(traceparent: &str, tracestate: Option<&str>) -> Option<TraceContext> {
    if !is_well_formed_traceparent(traceparent) {
        return None;
    }
    let mut headers = HashMap::new();
    headers.insert("traceparent".to_string(), traceparent.to_string());
    if let Some(ts) = tracestate {
        headers.insert("tracestate".to_string(), ts.to_string());
    }

    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&MapExtractor(&headers))
    });

    let candidate = TraceContext(ctx);
    if candidate.is_valid() {
        Some(candidate)
    } else {
        None
    }
}

/// Structural validation of a `traceparent` string per W3C Trace Context v1:
/// `"00-<trace-id:32hex>-<span-id:16hex>-<flags:2hex>"`. Does not consult a
/// propagator — this is the cheap check the envelope codec uses to decide
/// whether to drop the extension (`spec.md` §4.1).
pub fn is_well_formed_traceparent(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() != 4 {
        return false;
    }
    let [version, trace_id, span_id, flags] = [parts[0], parts[1], parts[2], parts[3]];
    version == "00"
        && trace_id.len() == 32
        && trace_id.chars().all(|c| c.is_ascii_hexdigit())
        && trace_id != "0".repeat(32)
        && span_id.len() == 16
        && span_id.chars().all(|c| c.is_ascii_hexdigit())
        && span_id != "0".repeat(16)
        && flags.len() == 2
        && flags.chars().all(|c| c.is_ascii_hexdigit())
}

/// The fixed set of counters the core increments per `spec.md` §5 step 2
/// (error metric on malformed envelope), §5 step 5 (duplicate counter),
/// §7 (poison counter) and the outbox's missing-binding operator alert.
/// A closed enum rather than a free-form string registry — every counter
/// this crate emits is named here, not invented at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterName {
    /// A decoded envelope failed CloudEvents validation and was dropped as
    /// a poison message (`spec.md` §4.5 step 2, §7, §8.3 Scenario F).
    PoisonMessage,
    /// An envelope was recognized as already processed by the idempotency
    /// ledger and skipped (`spec.md` §4.5 step 5).
    DuplicateDelivery,
    /// An outbox row's `attemptCount` crossed the missing-binding alert
    /// threshold (`spec.md` §4.3 step 2a, §7).
    MissingBindingAlert,
}

static POISON_MESSAGE_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
static DUPLICATE_DELIVERY_COUNTER: std::sync::atomic::AtomicU64 =
    std::sync::atomic::AtomicU64::new(0);
static MISSING_BINDING_ALERT_COUNTER: std::sync::atomic::AtomicU64 =
    std::sync::atomic::AtomicU64::new(0);

impl CounterName {
    fn atomic(self) -> &'static std::sync::atomic::AtomicU64 {
        match self {
            CounterName::PoisonMessage => &POISON_MESSAGE_COUNTER,
            CounterName::DuplicateDelivery => &DUPLICATE_DELIVERY_COUNTER,
            CounterName::MissingBindingAlert => &MISSING_BINDING_ALERT_COUNTER,
        }
    }
}

/// Increments the named counter by one. Process-global atomics rather than
/// a full metrics exporter: the core's contract is maintaining the count
/// (`spec.md` §5, "Counters and gauges for metrics are maintained
/// atomically"), not shipping it anywhere — wiring a real exporter is the
/// backend concern `spec.md` §1 leaves to external collaborators.
pub fn increment_counter(name: CounterName) {
    name.atomic().fetch_add(1, std::sync::atomic::Ordering::Relaxed);
}

/// Current value of a counter, exposed so callers (and tests) can observe
/// that it moved without standing up a real metrics backend.
pub fn counter_value(name: CounterName) -> u64 {
    name.atomic().load(std::sync::atomic::Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_counter_is_observable_and_additive() {
        let before = counter_value(CounterName::PoisonMessage);
        increment_counter(CounterName::PoisonMessage);
        increment_counter(CounterName::PoisonMessage);
        assert_eq!(counter_value(CounterName::PoisonMessage), before + 2);
    }

    #[test]
    fn counters_are_independent_per_name() {
        let poison_before = counter_value(CounterName::PoisonMessage);
        let duplicate_before = counter_value(CounterName::DuplicateDelivery);
        increment_counter(CounterName::DuplicateDelivery);
        assert_eq!(counter_value(CounterName::PoisonMessage), poison_before);
        assert_eq!(
            counter_value(CounterName::DuplicateDelivery),
            duplicate_before + 1
        );
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(!is_well_formed_traceparent("00-abc-def"));
    }

    #[test]
    fn rejects_bad_version() {
        let v = "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        assert!(!is_well_formed_traceparent(v));
    }

    #[test]
    fn rejects_non_hex() {
        let v = "00-zzf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        assert!(!is_well_formed_traceparent(v));
    }

    #[test]
    fn rejects_wrong_length() {
        let v = "00-4bf92f3577b34da6a3ce929d0e0e47-00f067aa0ba902b7-01";
        assert!(!is_well_formed_traceparent(v));
    }

    #[test]
    fn accepts_well_formed() {
        let v = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        assert!(is_well_formed_traceparent(v));
    }

    #[test]
    fn rejects_all_zero_trace_id() {
        let v = "00-00000000000000000000000000000000-00f067aa0ba902b7-01";
        assert!(!is_well_formed_traceparent(v));
    }
}
