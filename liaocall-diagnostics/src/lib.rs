/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Lightweight diagnostics event bus shared across the call core.
//!
//! Subsystems (the peer mesh, the signaling adapter, the speaking monitor)
//! publish tagged metric events; any number of subscribers (debug overlays,
//! log sinks, tests) consume them without the producers knowing.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// === Diagnostic data structures ===

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagEvent {
    /// Sub-system that produced this event (e.g. "peer_mesh", "signaling",
    /// "speaking").
    pub subsystem: &'static str,
    /// Peer the event is about, if it concerns a single participant.
    pub peer_id: Option<String>,
    /// Unix time in milliseconds when the metric was captured.
    pub ts_ms: u64,
    /// Arbitrary key/value metrics.
    pub metrics: Vec<Metric>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metric {
    pub name: &'static str,
    pub value: MetricValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum MetricValue {
    I64(i64),
    U64(u64),
    F64(f64),
    Text(String),
}

// === Simple global broadcast bus (flume multi-producer multi-consumer) ===

use flume::{Receiver, Sender};

static BUS: Lazy<(Sender<DiagEvent>, Receiver<DiagEvent>)> = Lazy::new(flume::unbounded);

/// Obtain a sender that can publish diagnostics events.
pub fn global_sender() -> &'static Sender<DiagEvent> {
    &BUS.0
}

/// Subscribe to the diagnostics stream. Each subscriber receives **all**
/// future events.
pub fn subscribe() -> Receiver<DiagEvent> {
    BUS.1.clone()
}

// === Helper utilities ===

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// === metric! helper macro ===

/// Shorthand for constructing a [`Metric`].
#[macro_export]
macro_rules! metric {
    ($name:expr, $value:expr) => {
        $crate::Metric {
            name: $name,
            value: $crate::MetricValue::from($value),
        }
    };
}

// Implement `From` conversions so `metric!("links", 3u64)` works for common
// types.
impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::I64(v)
    }
}
impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::U64(v)
    }
}
impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::F64(v)
    }
}
impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}
impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_delivers_to_subscribers() {
        let rx = subscribe();
        global_sender()
            .send(DiagEvent {
                subsystem: "peer_mesh",
                peer_id: Some("p-1".to_string()),
                ts_ms: now_ms(),
                metrics: vec![metric!("links", 2u64)],
            })
            .unwrap();
        let event = rx.recv().unwrap();
        assert_eq!(event.subsystem, "peer_mesh");
        assert_eq!(event.metrics[0].name, "links");
    }

    #[test]
    fn metric_macro_converts_common_types() {
        assert!(matches!(metric!("n", 1i64).value, MetricValue::I64(1)));
        assert!(matches!(metric!("n", 1u64).value, MetricValue::U64(1)));
        assert!(matches!(metric!("n", 0.5f64).value, MetricValue::F64(_)));
        assert!(matches!(metric!("n", "up").value, MetricValue::Text(_)));
    }
}
