//! ---
//! gr_section: "02-telemetry"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Position sources, including the synthetic fix generator."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use chrono::Utc;
use gr_common::config::{PositionConfig, StepRange};
use rand::prelude::*;

use crate::error::TelemetryError;
use crate::frames::PositionFix;

const DEGREE_SCALE: f64 = 1e7;
const METRE_SCALE: f64 = 100.0;

/// Anything that can produce a position fix on demand.
///
/// A GNSS receiver driver plugs in here without touching the scheduler.
pub trait PositionSource: Send {
    fn sample(&mut self) -> Result<PositionFix, TelemetryError>;

    fn name(&self) -> &'static str;
}

/// Fixed base coordinates plus uniform integer-step jitter.
#[derive(Debug)]
pub struct SyntheticPosition {
    config: PositionConfig,
    rng: StdRng,
}

impl SyntheticPosition {
    pub fn new(config: PositionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    fn random_in_range(&mut self, range: StepRange) -> i64 {
        self.rng.gen_range(range.min..=range.max)
    }

    fn jittered(&mut self, base: f64, range: StepRange, scale: f64) -> f64 {
        let steps = self.random_in_range(range);
        ((base * scale).round() as i64 + steps) as f64 / scale
    }
}

impl PositionSource for SyntheticPosition {
    fn sample(&mut self) -> Result<PositionFix, TelemetryError> {
        let PositionConfig {
            base_latitude,
            latitude_steps,
            base_longitude,
            longitude_steps,
            base_elevation,
            elevation_steps,
            hac_steps,
            vac_steps,
            ..
        } = self.config;
        let elevation = self.jittered(base_elevation, elevation_steps, METRE_SCALE);
        let latitude = self.jittered(base_latitude, latitude_steps, DEGREE_SCALE);
        let longitude = self.jittered(base_longitude, longitude_steps, DEGREE_SCALE);
        let hac = self.jittered(0.0, hac_steps, METRE_SCALE);
        let vac = self.jittered(0.0, vac_steps, METRE_SCALE);
        Ok(PositionFix {
            timestamp: Utc::now(),
            latitude,
            longitude,
            elevation,
            hac,
            vac,
        })
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
