//! UiProof Engine
//!
//! The run orchestration core: admission control, step sequencing with
//! error-detection checkpoints, terminal reconciliation, artifact and
//! record coordination, and retention sweeping. Transport lives in
//! `uiproof-web`; this crate only exposes the engine contract.

pub mod actuator;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod recorder;
pub mod report;
pub mod scenario;
pub mod sweeper;

pub use actuator::{Actuator, ActuatorFactory, WebDriverActuator, WebDriverFactory};
pub use config::EngineConfig;
pub use events::{EventBus, RunEvent};
pub use orchestrator::{Orchestrator, StartReceipt, StatusSnapshot};
pub use report::{PdfRenderer, ReportRenderer};
pub use scenario::{Action, Scenario, ScenarioSet, StepDef};
pub use sweeper::{RetentionSweeper, SweepReport};
