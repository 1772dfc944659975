use crate::config::GateConfig;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Operating mode of the gate this node controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Entry,
    Exit,
}

impl GateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateMode::Entry => "entry",
            GateMode::Exit => "exit",
        }
    }
}

impl TryFrom<String> for GateMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "entry" => Ok(Self::Entry),
            "exit" => Ok(Self::Exit),
            other => Err(format!(
                "{} is not a supported gate mode. Use either `entry` or `exit`.",
                other
            )),
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Barrier position as driven by this controller. `Closed` is the rest and
/// failure-safe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// The resolved verdict for one plate candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Open { message: String },
    Deny { reason: String },
}

#[derive(Error, Debug)]
pub enum ActuatorFault {
    #[error("gpio line {line} unavailable: {source}")]
    Unavailable {
        line: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to drive gpio line {line}: {source}")]
    WriteFailed {
        line: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Binary digital output driving the barrier relay: high raises, low lowers.
pub trait Actuator: Send {
    fn set_high(&mut self) -> Result<(), ActuatorFault>;
    fn set_low(&mut self) -> Result<(), ActuatorFault>;
}

/// Relay driven through the sysfs GPIO interface. The line is exported and
/// set as an output, resting low, when the relay is opened.
pub struct SysfsRelay {
    line: u32,
    value_path: PathBuf,
}

impl SysfsRelay {
    pub fn open(line: u32) -> Result<Self, ActuatorFault> {
        let gpio_dir = PathBuf::from(format!("/sys/class/gpio/gpio{}", line));
        if !gpio_dir.exists() {
            write_sysfs(Path::new("/sys/class/gpio/export"), &line.to_string())
                .map_err(|source| ActuatorFault::Unavailable { line, source })?;
        }

        write_sysfs(&gpio_dir.join("direction"), "out")
            .map_err(|source| ActuatorFault::Unavailable { line, source })?;

        let mut relay = Self {
            line,
            value_path: gpio_dir.join("value"),
        };
        relay.set_low()?;

        tracing::info!(line, "relay initialized on gpio line");
        Ok(relay)
    }

    fn write_value(&mut self, value: &str) -> Result<(), ActuatorFault> {
        write_sysfs(&self.value_path, value).map_err(|source| ActuatorFault::WriteFailed {
            line: self.line,
            source,
        })
    }
}

impl Actuator for SysfsRelay {
    fn set_high(&mut self) -> Result<(), ActuatorFault> {
        self.write_value("1")
    }

    fn set_low(&mut self) -> Result<(), ActuatorFault> {
        self.write_value("0")
    }
}

fn write_sysfs(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(value.as_bytes())
}

/// Stand-in used when no relay hardware is present: logs the transition the
/// hardware would have made and succeeds.
pub struct SimulatedRelay;

impl Actuator for SimulatedRelay {
    fn set_high(&mut self) -> Result<(), ActuatorFault> {
        tracing::info!("simulated relay: HIGH (barrier raised)");
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), ActuatorFault> {
        tracing::info!("simulated relay: LOW (barrier lowered)");
        Ok(())
    }
}

/// Builds the configured actuator, falling back to simulation when the GPIO
/// line is disabled or cannot be opened.
pub fn build_actuator(config: &GateConfig) -> Box<dyn Actuator> {
    if !config.gpio_enabled {
        tracing::info!("gpio disabled, using simulated relay");
        return Box::new(SimulatedRelay);
    }

    match SysfsRelay::open(config.relay_line) {
        Ok(relay) => Box::new(relay),
        Err(fault) => {
            tracing::warn!(%fault, "gpio unavailable, falling back to simulated relay");
            Box::new(SimulatedRelay)
        }
    }
}

/// Drives one physical gate. The controller is the sole writer of its
/// actuator and runs exactly one open/close cycle at a time: `execute` holds
/// `&mut self` for the whole cycle, so a decision arriving while a cycle is
/// in flight waits until the barrier is back at rest.
pub struct GateController {
    actuator: Box<dyn Actuator>,
    state: GateState,
    mode: GateMode,
    open_duration: Duration,
}

impl GateController {
    pub fn new(actuator: Box<dyn Actuator>, mode: GateMode, open_duration: Duration) -> Self {
        Self {
            actuator,
            state: GateState::Closed,
            mode,
            open_duration,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GateMode) {
        self.mode = mode;
    }

    /// Runs one full decision cycle. A deny never touches the actuator. Any
    /// actuator fault forces the state back to `Closed` and is returned to
    /// the caller instead of panicking.
    pub async fn execute(&mut self, decision: GateDecision) -> Result<bool, ActuatorFault> {
        match decision {
            GateDecision::Deny { reason } => {
                tracing::warn!(gate = %self.mode, %reason, "access denied");
                Ok(false)
            }
            GateDecision::Open { message } => {
                tracing::info!(gate = %self.mode, %message, "access granted, raising barrier");

                self.state = GateState::Opening;
                if let Err(fault) = self.actuator.set_high() {
                    self.state = GateState::Closed;
                    return Err(fault);
                }

                self.state = GateState::Open;
                tracing::info!(
                    gate = %self.mode,
                    hold_secs = self.open_duration.as_secs_f64(),
                    "barrier open, waiting for vehicle to pass"
                );
                sleep(self.open_duration).await;

                self.state = GateState::Closing;
                if let Err(fault) = self.actuator.set_low() {
                    self.state = GateState::Closed;
                    return Err(fault);
                }

                self.state = GateState::Closed;
                tracing::info!(gate = %self.mode, "barrier closed");
                Ok(true)
            }
        }
    }
}
