//! # Chassis Auto-Tester
//!
//! An operator-supervised validation harness for drive-by-wire vehicle chassis. It
//! publishes control commands over a command bus, reads back chassis feedback and
//! grades a tiered plan of functional and control-performance tests.
//!
//! ## Features
//!
//! - **Tiered test plan**: static checks, low-speed control loops and high-dynamic manoeuvres
//! - **Emergency stop**: a dedicated monitor task watches the keyboard and stops the vehicle
//! - **Step-response analysis**: response time, overshoot and steady-state error
//! - **Pluggable transport**: TCP line-delimited JSON or an in-process simulated vehicle
//! - **Structured results**: per-test verdicts with metrics, exportable as JSON
//!
//! ## Quick Start
//!
//! ```no_run
//! use chassis_tester::*;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let cache = Arc::new(FeedbackCache::new(SessionClock::start()));
//! let vehicle = Arc::new(SimulatedVehicle::spawn(SimConfig::default(), cache.clone()));
//!
//! let mut orchestrator = Orchestrator::with_standard_suite(HarnessConfig::default());
//! let report = orchestrator
//!     .run(Harness {
//!         bus: vehicle,
//!         cache,
//!         input: Box::new(ScriptedInput::confirmed()),
//!         sink: Arc::new(MemorySink::new()),
//!     })
//!     .await;
//! println!("{} passed, {} failed", report.passed(), report.failed());
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`orchestrator`] - Suite sequencing, per-test isolation and finalization
//! - [`safety`] - Abort latch, safety monitor and the full-stop sequence
//! - [`context`] - What a test procedure may touch during a run
//! - [`scenarios`] - The standard test plan
//! - [`analysis`] - Step-response metrics and statistics
//! - [`bus`] - Command publishing and transports
//! - [`telemetry`] - Feedback cache and sample collection
//! - [`protocol`] - Command and feedback wire format
//! - [`sim`] - Simulated vehicle used for dry runs

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod bus;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod safety;
pub mod scenarios;
pub mod sim;
pub mod telemetry;
pub mod verdict;
pub mod wait;

// Re-export main public types for convenience
pub use analysis::{compute_metrics, mean, population_std_dev, round_half_even, ResponseMetrics, NOT_COMPUTED};
pub use bus::{CommandBus, CommandPublisher, RecordingBus, TcpBus};
pub use config::HarnessConfig;
pub use console::{Key, KeyInput, MemorySink, ScriptedInput, StatusSink, Style, TerminalInput, TerminalSink};
pub use context::TestContext;
pub use error::{BusError, HarnessError, HarnessResult};
pub use orchestrator::{
    Harness, Orchestrator, Procedure, ProcedureFuture, SuiteOutcome, SuiteReport, SuiteState, TestCase, TestRecord,
    Tier,
};
pub use protocol::{
    ChassisFeedback, ControlCommand, DrivingMode, ErrorCode, Gear, Header, ProtocolError, TurnSignal, VehicleSignal,
};
pub use safety::{full_stop_sequence, AbortCause, AbortLatch, MonitorExit, SafetyMonitor};
pub use sim::{SimConfig, SimulatedVehicle, VehicleModel};
pub use telemetry::{FeedbackCache, FrameSubscription, SampleWindow, SessionClock, TimedFrame};
pub use verdict::{Criteria, MetricValue, Verdict};
pub use wait::{sleep_unless_aborted, wait_for_condition};
