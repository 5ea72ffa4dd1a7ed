/// Simulation clock for timestep management.
pub mod clock;
pub mod controller;
pub mod engine;
pub mod kpi;
/// Model predictive controller and its horizon problem.
pub mod mpc;
pub mod types;
