//! Deterministic drive-by-wire chassis model.
//!
//! The model reacts to [`ControlCommand`]s the way a by-wire vehicle does from the
//! outside: first-order actuator lags, delayed discrete actuators (EPB, gear, signals),
//! gear protection while moving and a driver takeover that can be scripted for
//! disengagement tests. It is stepped at a fixed 10 ms by [`SimulatedVehicle`] and by the
//! `chassis-sim` TCP server.

use crate::bus::CommandBus;
use crate::error::BusError;
use crate::protocol::{ChassisFeedback, ControlCommand, DrivingMode, ErrorCode, Gear, VehicleSignal};
use crate::telemetry::FeedbackCache;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info};

pub const SIM_STEP: Duration = Duration::from_millis(10);

// Actuator time constants (seconds)
const THROTTLE_TAU: f64 = 0.050;
const BRAKE_TAU: f64 = 0.040;
const STEERING_TAU: f64 = 0.080;
const ACCEL_TAU: f64 = 0.080;

// Discrete actuator delays (seconds)
const EPB_DELAY: f64 = 0.300;
const GEAR_DELAY: f64 = 0.200;
const SIGNAL_DELAY: f64 = 0.100;

const GEAR_SHIFT_MAX_SPEED: f64 = 0.5;        // m/s
const FULL_THROTTLE_ACCEL: f64 = 3.0;         // m/s² at 100 % throttle
const FULL_BRAKE_DECEL: f64 = 8.0;            // m/s² at 100 % brake
const EPB_DECEL: f64 = 3.0;
const DRAG_COEFF: f64 = 0.05;                 // 1/s
const SPEED_GAIN: f64 = 2.0;
const SPEED_CTRL_MAX_ACCEL: f64 = 2.0;
const SPEED_CTRL_MAX_DECEL: f64 = 3.0;
const SPEED_SNAP: f64 = 0.02;
const MAX_SPEED: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seconds after the first engagement at which the simulated driver takes over.
    pub takeover_after_secs: Option<f64>,
    /// Whether frames carry `instantaneous_acceleration`.
    pub report_acceleration: bool,
    /// Whether frames carry `error_code`.
    pub report_error_codes: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            takeover_after_secs: None,
            report_acceleration: true,
            report_error_codes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending<T> {
    target: T,
    remaining: f64,
}

impl<T: Copy + PartialEq> Pending<T> {
    fn schedule(slot: &mut Option<Pending<T>>, current: T, target: T, delay: f64) {
        match slot {
            Some(pending) if pending.target == target => {}
            _ if current == target => *slot = None,
            _ => {
                *slot = Some(Pending {
                    target,
                    remaining: delay,
                })
            }
        }
    }

    fn advance(slot: &mut Option<Pending<T>>, value: &mut T, dt: f64) {
        if let Some(pending) = slot {
            pending.remaining -= dt;
            if pending.remaining <= 0.0 {
                *value = pending.target;
                *slot = None;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Longitudinal {
    Acceleration { target: f64, cap: f64 },
    Speed { target: f64 },
    Pedals,
}

#[derive(Debug)]
pub struct VehicleModel {
    config: SimConfig,
    command: Option<ControlCommand>,
    mode: DrivingMode,
    error_code: Option<ErrorCode>,
    gear: Gear,
    pending_gear: Option<Pending<Gear>>,
    parking_brake: bool,
    pending_epb: Option<Pending<bool>>,
    signal: VehicleSignal,
    pending_signal: Option<Pending<VehicleSignal>>,
    throttle: f64,
    brake: f64,
    steering: f64,
    speed: f64,
    accel: f64,
    time: f64,
    engaged_at: Option<f64>,
    takeover_done: bool,
}

impl VehicleModel {
    /// A parked vehicle: manual mode, NEUTRAL, parking brake applied.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            command: None,
            mode: DrivingMode::CompleteManual,
            error_code: None,
            gear: Gear::Neutral,
            pending_gear: None,
            parking_brake: true,
            pending_epb: None,
            signal: VehicleSignal::default(),
            pending_signal: None,
            throttle: 0.0,
            brake: 0.0,
            steering: 0.0,
            speed: 0.0,
            accel: 0.0,
            time: 0.0,
            engaged_at: None,
            takeover_done: false,
        }
    }

    pub fn mode(&self) -> DrivingMode {
        self.mode
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn apply_command(&mut self, command: ControlCommand) {
        match command.driving_mode {
            DrivingMode::CompleteAutoDrive if self.mode != DrivingMode::CompleteAutoDrive => {
                self.mode = DrivingMode::CompleteAutoDrive;
                self.error_code = Some(ErrorCode::NoError);
                self.engaged_at.get_or_insert(self.time);
                info!(t = self.time, "sim: autonomous mode engaged");
            }
            DrivingMode::CompleteManual if self.mode != DrivingMode::CompleteManual => {
                self.mode = DrivingMode::CompleteManual;
                info!(t = self.time, "sim: manual mode requested");
            }
            _ => {}
        }

        if self.mode != DrivingMode::CompleteAutoDrive {
            self.command = None;
            return;
        }

        let requested_gear = command.gear_location;
        let gear_target = self.pending_gear.map_or(self.gear, |p| p.target);
        if requested_gear != gear_target {
            if self.speed > GEAR_SHIFT_MAX_SPEED {
                if self.error_code != Some(ErrorCode::ChassisErrorOnGear) {
                    debug!(speed = self.speed, gear = %requested_gear, "sim: gear change rejected while moving");
                }
                self.error_code = Some(ErrorCode::ChassisErrorOnGear);
            } else {
                if self.error_code == Some(ErrorCode::ChassisErrorOnGear) {
                    self.error_code = Some(ErrorCode::NoError);
                }
                Pending::schedule(&mut self.pending_gear, self.gear, requested_gear, GEAR_DELAY);
            }
        }

        Pending::schedule(&mut self.pending_epb, self.parking_brake, command.parking_brake, EPB_DELAY);
        Pending::schedule(&mut self.pending_signal, self.signal, command.signal, SIGNAL_DELAY);

        self.command = Some(command);
    }

    pub fn step(&mut self, dt: f64) {
        self.time += dt;
        self.check_takeover();

        Pending::advance(&mut self.pending_gear, &mut self.gear, dt);
        Pending::advance(&mut self.pending_epb, &mut self.parking_brake, dt);
        Pending::advance(&mut self.pending_signal, &mut self.signal, dt);

        let (throttle_target, brake_target, steering_target) = match &self.command {
            Some(cmd) => (
                cmd.throttle.clamp(0.0, 100.0),
                cmd.brake.clamp(0.0, 100.0),
                cmd.steering_target.clamp(-100.0, 100.0),
            ),
            None => (0.0, 0.0, self.steering),
        };
        self.throttle += (throttle_target - self.throttle) * lag(dt, THROTTLE_TAU);
        self.brake += (brake_target - self.brake) * lag(dt, BRAKE_TAU);
        self.steering += (steering_target - self.steering) * lag(dt, STEERING_TAU);

        let propulsion = self.command.is_some()
            && !self.parking_brake
            && matches!(self.gear, Gear::Drive | Gear::Reverse);
        let regime = self.longitudinal_regime();
        let drag = DRAG_COEFF * self.speed;

        let drive = if propulsion {
            match regime {
                Longitudinal::Acceleration { target, cap } => target.min(SPEED_GAIN * (cap - self.speed)) + drag,
                Longitudinal::Speed { target } => {
                    (SPEED_GAIN * (target - self.speed)).clamp(-SPEED_CTRL_MAX_DECEL, SPEED_CTRL_MAX_ACCEL) + drag
                }
                Longitudinal::Pedals => self.throttle / 100.0 * FULL_THROTTLE_ACCEL,
            }
        } else {
            0.0
        };
        let braking = self.brake / 100.0 * FULL_BRAKE_DECEL + if self.parking_brake { EPB_DECEL } else { 0.0 };

        let mut net = drive - braking - drag;
        if self.speed <= 0.0 && net < 0.0 {
            net = 0.0;
        }
        if self.speed >= MAX_SPEED && net > 0.0 {
            net = 0.0;
        }

        self.accel += (net - self.accel) * lag(dt, ACCEL_TAU);
        self.speed = (self.speed + self.accel * dt).clamp(0.0, MAX_SPEED);
        if self.speed <= 0.0 && self.accel < 0.0 {
            self.accel = 0.0;
        }

        if let (true, Longitudinal::Speed { target }) = (propulsion, regime) {
            if (target - self.speed).abs() < SPEED_SNAP && self.brake < 1.0 {
                self.speed = target;
                self.accel = 0.0;
            }
        }
    }

    fn check_takeover(&mut self) {
        let (Some(after), Some(engaged_at)) = (self.config.takeover_after_secs, self.engaged_at) else {
            return;
        };
        if self.takeover_done || self.mode != DrivingMode::CompleteAutoDrive {
            return;
        }
        if self.time - engaged_at >= after {
            self.takeover_done = true;
            self.mode = DrivingMode::CompleteManual;
            self.error_code = Some(ErrorCode::ManualIntervention);
            self.command = None;
            info!(t = self.time, "sim: driver takeover");
        }
    }

    fn longitudinal_regime(&self) -> Longitudinal {
        let Some(cmd) = &self.command else {
            return Longitudinal::Pedals;
        };
        if cmd.acceleration > 0.0 {
            let cap = if cmd.speed > 0.0 { cmd.speed } else { MAX_SPEED };
            Longitudinal::Acceleration {
                target: cmd.acceleration,
                cap,
            }
        } else if cmd.throttle == 0.0 && cmd.brake == 0.0 {
            Longitudinal::Speed {
                target: cmd.speed.clamp(0.0, MAX_SPEED),
            }
        } else {
            Longitudinal::Pedals
        }
    }

    pub fn feedback(&self) -> ChassisFeedback {
        ChassisFeedback {
            driving_mode: self.mode,
            gear_location: self.gear,
            throttle_percentage: self.throttle,
            brake_percentage: self.brake,
            steering_percentage: self.steering,
            speed_mps: self.speed,
            instantaneous_acceleration: self.config.report_acceleration.then_some(self.accel),
            error_code: self.error_code.filter(|_| self.config.report_error_codes),
            parking_brake: self.parking_brake,
            signal: self.signal,
        }
    }
}

fn lag(dt: f64, tau: f64) -> f64 {
    1.0 - (-dt / tau).exp()
}

/// In-process simulated vehicle behind the [`CommandBus`] interface.
pub struct SimulatedVehicle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedVehicle {
    /// Spawns the 10 ms model loop, writing a frame into `cache` every step.
    pub fn spawn(config: SimConfig, cache: Arc<FeedbackCache>) -> Self {
        let (commands, mut queue) = mpsc::unbounded_channel::<ControlCommand>();
        let task = tokio::spawn(async move {
            let mut model = VehicleModel::new(config);
            let mut ticker = time::interval(SIM_STEP);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                loop {
                    match queue.try_recv() {
                        Ok(command) => model.apply_command(command),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return,
                    }
                }
                model.step(SIM_STEP.as_secs_f64());
                cache.update(model.feedback());
            }
        });
        info!("simulated vehicle started");

        Self {
            commands,
            task: Mutex::new(Some(task)),
        }
    }
}

impl CommandBus for SimulatedVehicle {
    fn publish(&self, command: &ControlCommand) -> Result<(), BusError> {
        self.commands.send(command.clone()).map_err(|_| BusError::Closed)
    }

    fn close(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
            info!("simulated vehicle stopped");
        }
    }
}

impl Drop for SimulatedVehicle {
    fn drop(&mut self) {
        self.close();
    }
}
