//! ---
//! gr_section: "02-telemetry"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Fuel gauge drivers: simulated and Linux power_supply sysfs."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use crate::error::TelemetryError;
use crate::frames::PowerReading;

const SECS_PER_HOUR: f64 = 3600.0;

/// Battery fuel gauge.
pub trait FuelGauge: Send {
    /// State of charge, percent.
    fn state_of_charge(&mut self) -> Result<f64, TelemetryError>;

    /// Charge rate in percent per hour, negative while discharging.
    fn charge_rate(&mut self) -> Result<f64, TelemetryError>;

    /// Check the gauge still answers.
    fn probe(&mut self) -> Result<(), TelemetryError>;

    fn name(&self) -> &'static str;

    fn read(&mut self) -> Result<PowerReading, TelemetryError> {
        let soc = self.state_of_charge()?;
        let change = self.charge_rate()?;
        Ok(PowerReading {
            timestamp: Utc::now(),
            soc,
            change,
        })
    }
}

/// Linear discharge from a starting charge, for benches without a battery.
#[derive(Debug)]
pub struct SimulatedFuelGauge {
    start_soc: f64,
    drain_per_hour: f64,
    started: Instant,
}

impl SimulatedFuelGauge {
    pub fn new(start_soc: f64, drain_per_hour: f64) -> Self {
        Self {
            start_soc,
            drain_per_hour,
            started: Instant::now(),
        }
    }

    fn soc_at(&self, elapsed_secs: f64) -> f64 {
        (self.start_soc - self.drain_per_hour * elapsed_secs / SECS_PER_HOUR).clamp(0.0, 100.0)
    }
}

impl FuelGauge for SimulatedFuelGauge {
    fn state_of_charge(&mut self) -> Result<f64, TelemetryError> {
        Ok(self.soc_at(self.started.elapsed().as_secs_f64()))
    }

    fn charge_rate(&mut self) -> Result<f64, TelemetryError> {
        if self.soc_at(self.started.elapsed().as_secs_f64()) <= 0.0 {
            return Ok(0.0);
        }
        Ok(-self.drain_per_hour)
    }

    fn probe(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Reads `<dir>/capacity` from a Linux power_supply class device.
#[derive(Debug)]
pub struct SysfsFuelGauge {
    dir: PathBuf,
    last: Option<(Instant, f64)>,
    rate: f64,
}

impl SysfsFuelGauge {
    /// Open the gauge, failing if the capacity attribute cannot be read.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TelemetryError> {
        let dir = dir.into();
        let initial = read_capacity(&dir).map_err(|err| TelemetryError::GaugeUnavailable {
            path: dir.clone(),
            reason: err.to_string(),
        })?;
        debug!(path = %dir.display(), soc = initial, "sysfs fuel gauge opened");
        Ok(Self {
            dir,
            last: Some((Instant::now(), initial)),
            rate: 0.0,
        })
    }

    fn observe(&mut self, soc: f64, now: Instant) {
        if let Some((then, previous)) = self.last {
            let hours = now.duration_since(then).as_secs_f64() / SECS_PER_HOUR;
            if hours > 0.0 {
                self.rate = (soc - previous) / hours;
            }
        }
        self.last = Some((now, soc));
    }
}

impl FuelGauge for SysfsFuelGauge {
    fn state_of_charge(&mut self) -> Result<f64, TelemetryError> {
        let soc = read_capacity(&self.dir)?;
        self.observe(soc, Instant::now());
        Ok(soc)
    }

    fn charge_rate(&mut self) -> Result<f64, TelemetryError> {
        Ok(self.rate)
    }

    fn probe(&mut self) -> Result<(), TelemetryError> {
        read_capacity(&self.dir).map(|_| ())
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}

fn read_capacity(dir: &Path) -> Result<f64, TelemetryError> {
    let path = dir.join("capacity");
    let raw = fs::read_to_string(&path)
        .map_err(|err| TelemetryError::Read(format!("{}: {err}", path.display())))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|err| TelemetryError::Read(format!("{}: {err}", path.display())))
}
