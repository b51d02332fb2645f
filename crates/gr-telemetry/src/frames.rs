//! ---
//! gr_section: "02-telemetry"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Position and power samples and their wire payloads."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Ordered key/value payload ready to be framed for the control channel.
pub type Payload = IndexMap<String, Value>;

/// One position fix. Angles in degrees, distances in metres.
#[derive(Debug, Clone, Serialize)]
pub struct PositionFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub hac: f64,
    pub vac: f64,
}

impl PositionFix {
    /// Position tick payload; every value is a fixed-precision string.
    pub fn to_message(&self) -> Payload {
        let mut payload = Payload::with_capacity(5);
        payload.insert("elevation".into(), Value::String(format!("{:.2}", self.elevation)));
        payload.insert("latitude".into(), Value::String(format!("{:.7}", self.latitude)));
        payload.insert("longitude".into(), Value::String(format!("{:.7}", self.longitude)));
        payload.insert("hac".into(), Value::String(format!("{:.2}", self.hac)));
        payload.insert("vac".into(), Value::String(format!("{:.2}", self.vac)));
        payload
    }
}

/// Battery state from the fuel gauge.
#[derive(Debug, Clone, Serialize)]
pub struct PowerReading {
    pub timestamp: DateTime<Utc>,
    /// State of charge, percent.
    pub soc: f64,
    /// Charge rate, percent per hour. Negative while discharging.
    pub change: f64,
}

impl PowerReading {
    /// Power tick payload; values are JSON numbers.
    pub fn to_message(&self) -> Payload {
        let mut payload = Payload::with_capacity(2);
        payload.insert("batterySoc".into(), Value::from(round2(self.soc)));
        payload.insert("batteryChange".into(), Value::from(round2(self.change)));
        payload
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_keys_keep_wire_order() {
        let fix = PositionFix {
            timestamp: Utc::now(),
            latitude: 35.556_123_4,
            longitude: -78.774_9,
            elevation: 100.2,
            hac: 0.1,
            vac: 0.25,
        };
        let payload = fix.to_message();
        let keys: Vec<_> = payload.keys().map(String::as_str).collect();
        assert_eq!(keys, ["elevation", "latitude", "longitude", "hac", "vac"]);
        assert_eq!(payload["latitude"], "35.5561234");
        assert_eq!(payload["longitude"], "-78.7749000");
        assert_eq!(payload["elevation"], "100.20");
        assert_eq!(payload["hac"], "0.10");
    }

    #[test]
    fn power_values_are_numbers() {
        let reading = PowerReading {
            timestamp: Utc::now(),
            soc: 87.456,
            change: -4.0,
        };
        let encoded = serde_json::to_string(&reading.to_message()).unwrap();
        assert_eq!(encoded, r#"{"batterySoc":87.46,"batteryChange":-4.0}"#);
    }
}
