use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// EventState
/// Ephemeral, in-memory counters for key generation and registration.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub kinds: BTreeMap<String, KindCounters>,
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Registry
    pub schemas_registered: u64,
    pub schema_conflicts: u64,

    // Key generation
    pub keys_generated: u64,
    pub uncacheable: u64,
    pub tokens_emitted: u64,
    pub bound_values: u64,
    pub back_refs: u64,
    pub symbols: u64,
}

///
/// KindCounters
/// counters attributed to the root kind of a pass (or the registered kind)
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct KindCounters {
    pub registrations: u64,
    pub conflicts: u64,
    pub keys_generated: u64,
    pub uncacheable: u64,
    pub tokens_emitted: u64,
    pub tokens_max: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Reset all counters.
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    pub counters: EventState,
    /// Per-kind summaries, busiest first.
    pub kind_counters: Vec<KindSummary>,
}

///
/// KindSummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct KindSummary {
    pub kind: String,
    pub keys_generated: u64,
    pub uncacheable: u64,
    pub avg_tokens_per_key: f64,
    pub tokens_max: u64,
}

/// Build a metrics report from the in-memory counters.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub(crate) fn report() -> EventReport {
    let snap = with_state(Clone::clone);

    let mut kind_counters: Vec<KindSummary> = snap
        .kinds
        .iter()
        .filter(|(_, c)| c.keys_generated > 0 || c.uncacheable > 0)
        .map(|(kind, c)| KindSummary {
            kind: kind.clone(),
            keys_generated: c.keys_generated,
            uncacheable: c.uncacheable,
            avg_tokens_per_key: if c.keys_generated > 0 {
                c.tokens_emitted as f64 / c.keys_generated as f64
            } else {
                0.0
            },
            tokens_max: c.tokens_max,
        })
        .collect();

    kind_counters.sort_by(|a, b| {
        b.keys_generated
            .cmp(&a.keys_generated)
            .then_with(|| a.kind.cmp(&b.kind))
    });

    EventReport {
        counters: snap,
        kind_counters,
    }
}

///
/// TESTS
///
