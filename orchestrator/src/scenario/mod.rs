//! Scenario definition and execution

mod hooks;
mod matrix;
mod runner;

pub use hooks::EnvironmentResetHook;
pub use matrix::{ScenarioMatrix, ScenarioSpec};
pub use runner::{ScenarioError, ScenarioRunner};
