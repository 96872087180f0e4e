//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `actuator` - Arm controller interface and its error type
//! - `sim_actuator` - In-process simulated arm (dry runs, tests)
//! - `bridge` - TCP client for the motion-control SDK sidecar
//! - `sensor_listener` - UDP listener for occupancy reports
//! - `cues` - UDP cue fan-out to the audio and lighting machines

pub mod actuator;
pub mod bridge;
pub mod cues;
pub mod sensor_listener;
pub mod sim_actuator;

// Re-export commonly used types
pub use actuator::{Actuator, ActuatorError, NotifyCallback};
pub use bridge::{BridgeActuator, BridgeSettings};
pub use cues::CueFanout;
pub use sensor_listener::{ListenerStats, ReportHandler, SensorListener};
pub use sim_actuator::SimulatedActuator;
