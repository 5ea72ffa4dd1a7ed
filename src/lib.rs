//! Battery pack thermal-management simulator.
//!
//! A lumped electro-thermal pack model is cooled by a compressor-driven
//! liquid loop. A rule-based hysteresis controller or a nonlinear MPC sets
//! the compressor power and the pack current while the pack serves an
//! external power demand.

/// Configuration, presets, and component builders.
pub mod config;
pub mod devices;
pub mod health;
pub mod io;
/// Nonlinear programming: problem and solver traits, interior-point solver.
pub mod nlp;
/// Simulation engine, controllers, and KPI modules.
pub mod sim;
pub mod target;
pub mod tariff;
