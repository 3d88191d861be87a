//! Metrics sink boundary.
//!
//! Key generation and schema registration MUST NOT depend on obs::metrics
//! directly. All instrumentation flows through MetricsEvent and MetricsSink.
use crate::obs::metrics;
use std::cell::RefCell;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn MetricsSink>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    SchemaRegistered {
        kind: &'static str,
    },
    SchemaConflict {
        kind: &'static str,
    },
    KeyGenerated {
        kind: &'static str,
        tokens: u64,
        bound_values: u64,
        back_refs: u64,
        symbols: u64,
    },
    Uncacheable {
        kind: &'static str,
    },
}

impl MetricsEvent {
    /// Node kind the event is attributed to.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SchemaRegistered { kind }
            | Self::SchemaConflict { kind }
            | Self::KeyGenerated { kind, .. }
            | Self::Uncacheable { kind } => *kind,
        }
    }
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default sink writing into the thread-local event state.
/// Used whenever no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::SchemaRegistered { kind } => {
                m.ops.schemas_registered = m.ops.schemas_registered.saturating_add(1);
                let entry = m.kinds.entry(kind.to_string()).or_default();
                entry.registrations = entry.registrations.saturating_add(1);
            }

            MetricsEvent::SchemaConflict { kind } => {
                m.ops.schema_conflicts = m.ops.schema_conflicts.saturating_add(1);
                let entry = m.kinds.entry(kind.to_string()).or_default();
                entry.conflicts = entry.conflicts.saturating_add(1);
            }

            MetricsEvent::KeyGenerated {
                kind,
                tokens,
                bound_values,
                back_refs,
                symbols,
            } => {
                m.ops.keys_generated = m.ops.keys_generated.saturating_add(1);
                m.ops.tokens_emitted = m.ops.tokens_emitted.saturating_add(tokens);
                m.ops.bound_values = m.ops.bound_values.saturating_add(bound_values);
                m.ops.back_refs = m.ops.back_refs.saturating_add(back_refs);
                m.ops.symbols = m.ops.symbols.saturating_add(symbols);

                let entry = m.kinds.entry(kind.to_string()).or_default();
                entry.keys_generated = entry.keys_generated.saturating_add(1);
                entry.tokens_emitted = entry.tokens_emitted.saturating_add(tokens);
                if tokens > entry.tokens_max {
                    entry.tokens_max = tokens;
                }
            }

            MetricsEvent::Uncacheable { kind } => {
                m.ops.uncacheable = m.ops.uncacheable.saturating_add(1);
                let entry = m.kinds.entry(kind.to_string()).or_default();
                entry.uncacheable = entry.uncacheable.saturating_add(1);
            }
        });
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent) {
    let override_ptr = SINK_OVERRIDE.with(|cell| *cell.borrow());
    if let Some(ptr) = override_ptr {
        // SAFETY:
        // - `ptr` was produced from a valid `&dyn MetricsSink` in `with_metrics_sink`,
        //   which restores the previous slot on every exit, including unwind.
        // - `record` is synchronous and never stores `ptr` beyond this call.
        // - Only a shared reference is materialized, matching the original borrow.
        unsafe { (&*ptr).record(event) };
    } else {
        GLOBAL_METRICS_SINK.record(event);
    }
}

/// Snapshot the current thread's metrics state.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all metrics state for the current thread.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
///
/// Events recorded by `f` on this thread go to `sink` instead of the global
/// state. Nested overrides restore the outer sink when they end.
pub fn with_metrics_sink<T>(sink: &dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<*const dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0;
            });
        }
    }

    // SAFETY:
    // - `sink_ptr` is installed only for this dynamic scope; `Guard` restores
    //   the previous slot on all exits, including panic.
    // - `record` only dereferences synchronously and never persists `sink_ptr`.
    // - The lifetime is erased, but only shared access is ever exposed.
    let sink_ptr = unsafe { std::mem::transmute::<&dyn MetricsSink, *const dyn MetricsSink>(sink) };
    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink_ptr));
    let _guard = Guard(prev);

    f()
}
