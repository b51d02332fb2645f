//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Status indicator colours and the task that drives the LED."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::fmt;

use gr_common::config::IndicatorConfig;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Red,
    Yellow,
    Green,
    /// Reserved.
    Blue,
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedColor::Red => "red",
            LedColor::Yellow => "yellow",
            LedColor::Green => "green",
            LedColor::Blue => "blue",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndicatorState {
    pub color: LedColor,
    pub blink: bool,
}

impl IndicatorState {
    pub const fn solid(color: LedColor) -> Self {
        Self {
            color,
            blink: false,
        }
    }
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blink {
            write!(f, "{} (blinking)", self.color)
        } else {
            write!(f, "{}", self.color)
        }
    }
}

/// Sink for the indicator. `None` switches the light off.
pub trait Led: Send {
    fn show(&mut self, color: Option<LedColor>);
}

/// Reports colour changes through tracing; used when no hardware LED exists.
#[derive(Debug, Default)]
pub struct LogLed {
    last: Option<Option<LedColor>>,
}

impl Led for LogLed {
    fn show(&mut self, color: Option<LedColor>) {
        if self.last != Some(color) {
            match color {
                Some(color) => debug!(%color, "indicator on"),
                None => debug!("indicator off"),
            }
            self.last = Some(color);
        }
    }
}

enum Wake {
    Elapsed,
    Changed,
    Stop,
}

async fn hold(
    phase: std::time::Duration,
    state: &mut watch::Receiver<IndicatorState>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Wake {
    tokio::select! {
        _ = sleep(phase) => Wake::Elapsed,
        changed = state.changed() => match changed {
            Ok(()) => Wake::Changed,
            Err(_) => Wake::Stop,
        },
        _ = shutdown.recv() => Wake::Stop,
    }
}

/// Drive `led` from `state`: on for `timing.on`, then off for `timing.off`
/// only while blinking. State changes take effect immediately.
pub async fn run_indicator(
    mut led: Box<dyn Led>,
    mut state: watch::Receiver<IndicatorState>,
    timing: IndicatorConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let current = *state.borrow_and_update();
        led.show(Some(current.color));
        match hold(timing.on, &mut state, &mut shutdown).await {
            Wake::Elapsed => {}
            Wake::Changed => continue,
            Wake::Stop => break,
        }
        if current.blink {
            led.show(None);
            match hold(timing.off, &mut state, &mut shutdown).await {
                Wake::Elapsed | Wake::Changed => {}
                Wake::Stop => break,
            }
        }
    }
    led.show(None);
    info!("indicator task stopped");
}
