//! Plant models: the electro-thermal battery pack and its cooling loop.

/// Lumped electro-thermal battery pack model.
pub mod battery;
/// Liquid cooling loop driven by a compressor command.
pub mod cooling;
pub mod types;

// Re-export the main types for convenience
pub use battery::{BatteryPack, BatteryPackConfig, BatteryState, StepOutcome, ThermalBattery};
pub use cooling::{CoefficientTable, CoolingConfig, CoolingOutcome, CoolingSystem};
pub use types::{ControlAction, OperatingLimits};
