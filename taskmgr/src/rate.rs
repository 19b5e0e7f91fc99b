//! Byte-rate derivation from cumulative counters.

#[derive(Debug, Clone, PartialEq)]
struct Baseline {
    counter_id: String,
    value: u64,
    ts_ms: i64,
}

/// Last observation of one cumulative counter.
///
/// The baseline is replaced, never extrapolated, when the counter identity changes, the value
/// goes backwards (wrap or reset), or time fails to advance. Each of those returns 0.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    last: Option<Baseline>,
}

impl RateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes per second since the previous observation of the same counter.
    pub fn derive_rate(&mut self, counter_id: &str, value: u64, ts_ms: i64) -> f64 {
        let rate = match &self.last {
            Some(prev)
                if prev.counter_id == counter_id && value >= prev.value && ts_ms > prev.ts_ms =>
            {
                let dt = (ts_ms - prev.ts_ms).max(1) as f64;
                (value - prev.value) as f64 * 1000.0 / dt
            }
            _ => 0.0,
        };
        self.last = Some(Baseline {
            counter_id: counter_id.to_string(),
            value,
            ts_ms,
        });
        rate
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn counter_id(&self) -> Option<&str> {
        self.last.as_ref().map(|b| b.counter_id.as_str())
    }
}
