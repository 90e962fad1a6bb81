use crate::bus::{CommandBus, CommandPublisher};
use crate::config::HarnessConfig;
use crate::console::{Key, KeyInput, StatusSink, Style, CONFIRM_KEY};
use crate::context::TestContext;
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::ControlCommand;
use crate::safety::{full_stop_sequence, AbortCause, AbortLatch, MonitorExit, SafetyMonitor};
use crate::scenarios;
use crate::telemetry::FeedbackCache;
use crate::verdict::Verdict;
use crate::wait::WAIT_POLL_INTERVAL;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinError;
use tokio::time::{self, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Static = 1,
    LowSpeed = 2,
    HighDynamic = 3,
}

impl Tier {
    pub fn level(self) -> u8 {
        self as u8
    }
}

pub type ProcedureFuture = Pin<Box<dyn Future<Output = HarnessResult<Verdict>> + Send>>;
pub type Procedure = fn(TestContext) -> ProcedureFuture;

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub tier: Tier,
    pub procedure: Procedure,
}

impl TestCase {
    pub fn new(name: impl Into<String>, tier: Tier, procedure: Procedure) -> Self {
        Self {
            name: name.into(),
            tier,
            procedure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuiteState {
    Idle,
    AwaitingOperatorStart,
    ResetToSafeState,
    Executing,
    Reporting,
    Completed,
    Aborted,
    Faulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuiteOutcome {
    Completed,
    Aborted,
    Faulted(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub index: usize,
    pub name: String,
    pub tier: Tier,
    pub verdict: Verdict,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub level: u8,
    pub outcome: SuiteOutcome,
    pub abort_cause: Option<AbortCause>,
    pub results: Vec<TestRecord>,
    pub skipped: Vec<String>,
    pub commands_sent: u64,
}

impl SuiteReport {
    fn new(level: u8) -> Self {
        Self {
            level,
            outcome: SuiteOutcome::Completed,
            abort_cause: None,
            results: Vec::new(),
            skipped: Vec::new(),
            commands_sent: 0,
        }
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.verdict.pass).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn result(&self, name: &str) -> Option<&TestRecord> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// The session resources a run needs. The orchestrator takes ownership for the run.
pub struct Harness {
    pub bus: Arc<dyn CommandBus>,
    pub cache: Arc<FeedbackCache>,
    pub input: Box<dyn KeyInput>,
    pub sink: Arc<dyn StatusSink>,
}

/// Sequences registered test cases under operator supervision.
pub struct Orchestrator {
    config: HarnessConfig,
    cases: Vec<TestCase>,
    state: SuiteState,
    history: Vec<SuiteState>,
}

impl Orchestrator {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            cases: Vec::new(),
            state: SuiteState::Idle,
            history: vec![SuiteState::Idle],
        }
    }

    pub fn with_standard_suite(config: HarnessConfig) -> Self {
        let mut orchestrator = Self::new(config);
        for case in scenarios::standard_suite() {
            orchestrator.register(case);
        }
        orchestrator
    }

    pub fn register(&mut self, case: TestCase) {
        self.cases.push(case);
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Cases with tier <= `level`, in registration order.
    pub fn select(&self, level: u8) -> Vec<&TestCase> {
        self.cases.iter().filter(|case| case.tier.level() <= level).collect()
    }

    pub fn state(&self) -> SuiteState {
        self.state
    }

    pub fn history(&self) -> &[SuiteState] {
        &self.history
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn transition(&mut self, next: SuiteState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "suite state");
        }
        self.state = next;
        self.history.push(next);
    }

    /// Runs the suite to completion, abort or fault. Finalization always runs before
    /// the report is returned.
    pub async fn run(&mut self, harness: Harness) -> SuiteReport {
        let latch = AbortLatch::new();
        let publisher = Arc::new(CommandPublisher::new(harness.bus));
        let guard = StopGuard::new(publisher.clone(), latch.clone());
        let (monitor, mut keys) =
            SafetyMonitor::spawn(harness.input, publisher.clone(), harness.sink.clone(), latch.clone());
        let ctx = TestContext::new(
            publisher.clone(),
            harness.cache,
            latch.clone(),
            harness.sink,
            Arc::new(self.config.clone()),
        );

        let mut report = SuiteReport::new(self.config.level);
        let outcome = self.execute(&ctx, &mut keys, &mut report).await;
        report.abort_cause = latch.cause();
        report.outcome = outcome;

        self.finalize(&ctx, monitor, guard).await;
        report.commands_sent = publisher.last_sequence();
        report
    }

    async fn execute(
        &mut self,
        ctx: &TestContext,
        keys: &mut mpsc::UnboundedReceiver<Key>,
        report: &mut SuiteReport,
    ) -> SuiteOutcome {
        self.transition(SuiteState::AwaitingOperatorStart);
        self.show_banner(ctx);
        if !await_operator_start(ctx, keys).await {
            self.transition(SuiteState::Aborted);
            return SuiteOutcome::Aborted;
        }

        let selected: Vec<TestCase> = self.select(self.config.level).into_iter().cloned().collect();
        if selected.is_empty() {
            ctx.log("No tests found for the selected level.", Style::Warning);
            self.transition(SuiteState::Completed);
            return SuiteOutcome::Completed;
        }

        let total = selected.len();
        for (index, case) in selected.iter().enumerate() {
            if ctx.is_aborted() {
                return self.abort_remaining(ctx, report, &selected[index..]);
            }

            self.transition(SuiteState::ResetToSafeState);
            match ctx.reset_to_safe_state(self.config.reset_settle()).await {
                Ok(()) => {}
                Err(HarnessError::Aborted) => return self.abort_remaining(ctx, report, &selected[index..]),
                Err(e) => return self.fault(ctx, &e),
            }
            if ctx.is_aborted() {
                return self.abort_remaining(ctx, report, &selected[index..]);
            }

            ctx.log(
                &format!("\n[{}/{}] Running (L{}): {}...", index + 1, total, case.tier.level(), case.name),
                Style::Plain,
            );
            self.transition(SuiteState::Executing);
            let started = Instant::now();
            let verdict = match run_procedure(case, ctx.clone()).await {
                Ok(verdict) => verdict,
                Err(e) => return self.fault(ctx, &e),
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            self.transition(SuiteState::Reporting);
            report_verdict(ctx, &case.name, &verdict);
            report.results.push(TestRecord {
                index: index + 1,
                name: case.name.clone(),
                tier: case.tier,
                verdict,
                duration_ms,
            });

            if ctx.is_aborted() {
                return self.abort_remaining(ctx, report, &selected[index + 1..]);
            }
            ctx.hold(self.config.inter_test_pause()).await;
        }

        if ctx.is_aborted() {
            return self.abort_remaining(ctx, report, &[]);
        }
        ctx.log("\n--- All tests completed. ---", Style::Success);
        self.transition(SuiteState::Completed);
        SuiteOutcome::Completed
    }

    fn show_banner(&self, ctx: &TestContext) {
        ctx.log("Chassis Auto-Tester", Style::Info);
        ctx.log(&format!("Running tests up to LEVEL {}", self.config.level), Style::Warning);
        ctx.log(&"-".repeat(60), Style::Plain);
        ctx.log("PRESS [SPACEBAR] AT ANY TIME FOR EMERGENCY STOP", Style::Danger);
        ctx.log("Press [Enter] to start tests...", Style::Plain);
    }

    fn abort_remaining(&mut self, ctx: &TestContext, report: &mut SuiteReport, remaining: &[TestCase]) -> SuiteOutcome {
        report.skipped.extend(remaining.iter().map(|case| case.name.clone()));
        warn!(skipped = remaining.len(), "test suite aborted");
        ctx.log("Test suite aborted due to emergency stop.", Style::Danger);
        self.transition(SuiteState::Aborted);
        SuiteOutcome::Aborted
    }

    fn fault(&mut self, ctx: &TestContext, cause: &HarnessError) -> SuiteOutcome {
        error!(error = %cause, "infrastructure fault, terminating run");
        ctx.log(&format!("Infrastructure fault: {cause}"), Style::Danger);
        self.transition(SuiteState::Faulted);
        SuiteOutcome::Faulted(cause.to_string())
    }

    async fn finalize(&mut self, ctx: &TestContext, monitor: SafetyMonitor, guard: StopGuard) {
        ctx.log("Cleaning up and shutting down...", Style::Info);
        ctx.latch().trigger(AbortCause::Finalization);

        match monitor.release(self.config.monitor_release()).await {
            Some(MonitorExit::OperatorAbort) => info!("safety monitor exited after operator abort"),
            Some(MonitorExit::ExternalAbort) => info!("safety monitor released"),
            None => {}
        }

        if let Err(e) = full_stop_sequence(ctx.publisher(), ctx.sink()).await {
            error!(error = %e, "final stop could not be published");
        }
        guard.disarm();

        ctx.publisher().close();
        ctx.log("Shutdown complete.", Style::Plain);
    }
}

async fn await_operator_start(ctx: &TestContext, keys: &mut mpsc::UnboundedReceiver<Key>) -> bool {
    loop {
        if ctx.is_aborted() {
            return false;
        }
        match keys.try_recv() {
            Ok(key) if key == CONFIRM_KEY => {
                info!("operator confirmed start");
                return true;
            }
            Ok(_) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!("operator input closed before start");
                return false;
            }
        }
        time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// Runs one procedure in its own task. Only infrastructure faults come back as errors.
async fn run_procedure(case: &TestCase, ctx: TestContext) -> HarnessResult<Verdict> {
    match tokio::spawn((case.procedure)(ctx)).await {
        Ok(Ok(verdict)) => Ok(verdict),
        Ok(Err(e)) if e.is_infrastructure() => Err(e),
        Ok(Err(e)) => {
            warn!(test = %case.name, error = %e, "procedure failed");
            Ok(Verdict::fail(format!("Caught fault: {e}")))
        }
        Err(e) => {
            let reason = describe_join_error(e);
            error!(test = %case.name, %reason, "procedure panicked");
            Ok(Verdict::fail(format!("Caught fault: {reason}")))
        }
    }
}

fn describe_join_error(e: JoinError) -> String {
    if !e.is_panic() {
        return "procedure cancelled".to_string();
    }
    let payload = e.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "procedure panicked".to_string()
    }
}

fn report_verdict(ctx: &TestContext, name: &str, verdict: &Verdict) {
    info!(test = name, pass = verdict.pass, detail = %verdict.detail, "test verdict");
    let style = if verdict.pass { Style::Success } else { Style::Danger };
    ctx.log(
        &format!("  -> Result: {} | Details: {}", verdict.status_text(), verdict.detail),
        style,
    );
    for warning in &verdict.warnings {
        ctx.log(&format!("     warning: {warning}"), Style::Warning);
    }
}

/// Publishes a best-effort stop if the run unwinds before finalization.
struct StopGuard {
    publisher: Arc<CommandPublisher>,
    latch: AbortLatch,
    armed: bool,
}

impl StopGuard {
    fn new(publisher: Arc<CommandPublisher>, latch: AbortLatch) -> Self {
        Self {
            publisher,
            latch,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.latch.trigger(AbortCause::Finalization);
        let stop = ControlCommand::full_stop();
        for _ in 0..2 {
            if let Err(e) = self.publisher.publish(&stop) {
                error!(error = %e, "unwind stop could not be published");
            }
        }
    }
}
