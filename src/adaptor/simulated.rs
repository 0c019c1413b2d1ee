// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated cell devices
//!
//! Each simulated device keeps a small physical model behind a mutex and
//! settles actions after the configured latency. They exercise the whole
//! handshake without hardware and back the `sim://` connection strings.
//!
//! ### Positioning axis (`sim://axis`)
//!
//! - 8: absolute move to param0 (i32, ±1 000 000 steps)
//! - 16: return to origin
//! - telemetry: 4..=5 position (i32), 6..=7 target (i32), 8 completed moves
//!
//! ### Gripper (`sim://gripper`)
//!
//! - 8: close to param0 permille (0..=1000) with force param1 (0..=100 %)
//! - 16: open fully
//! - telemetry: 4 position, 5 force, 6 object held
//!
//! ### Vibration feeder (`sim://feeder`)
//!
//! - 8: vibrate at strength param0 (0..=100 %), frequency param1 (1..=400 Hz)
//!   for param2 milliseconds
//! - 16: stop
//! - telemetry: 4 strength, 5 frequency, 6 completed runs
//!
//! ### LED controller (`sim://light`)
//!
//! - 8: set the channels in mask param0 (bits 0..=3) to brightness param1
//!   (0..=511)
//! - 16: all channels off
//! - telemetry: 4 mask of lit channels, 5..=8 channel brightness
//!
//! Command 32 resets the model and re-initialises the device on every kind.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};

use super::link::sleep_or_cancel;
use super::{
    AdaptorError, CancelToken, CommandParams, DeviceAdaptor, DeviceLink, DeviceState,
    DeviceStatus, ExecutionHandle, ExecutionResult, LinkOptions, Telemetry,
};
use crate::handshake::ActionKind;

/// Kind of simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimKind {
    Axis,
    Gripper,
    Feeder,
    Light,
}

impl FromStr for SimKind {
    type Err = AdaptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "axis" => Ok(SimKind::Axis),
            "gripper" => Ok(SimKind::Gripper),
            "feeder" => Ok(SimKind::Feeder),
            "light" => Ok(SimKind::Light),
            other => Err(AdaptorError::InvalidSpec(format!(
                "unknown simulated device '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimKind::Axis => "axis",
            SimKind::Gripper => "gripper",
            SimKind::Feeder => "feeder",
            SimKind::Light => "light",
        };
        write!(f, "{name}")
    }
}

/// Physical model of one simulated device.
trait SimModel: Send + fmt::Debug {
    /// Reject bad parameters before any time passes.
    fn validate(&self, kind: ActionKind, params: &CommandParams) -> Result<(), AdaptorError>;

    /// Extra action time on top of the link latency.
    fn duration(&self, _kind: ActionKind, _params: &CommandParams) -> Duration {
        Duration::ZERO
    }

    fn apply(&mut self, kind: ActionKind, params: &CommandParams);

    fn telemetry(&self) -> Telemetry;

    fn reset(&mut self);
}

fn unsupported(kind: ActionKind) -> AdaptorError {
    AdaptorError::Unsupported(kind.word())
}

#[derive(Debug, Default)]
struct AxisModel {
    position: i32,
    target: i32,
    moves: u16,
}

const AXIS_TRAVEL: i32 = 1_000_000;

impl SimModel for AxisModel {
    fn validate(&self, kind: ActionKind, params: &CommandParams) -> Result<(), AdaptorError> {
        match kind {
            ActionKind::Primary => {
                let target = params.param_i32(0);
                if !(-AXIS_TRAVEL..=AXIS_TRAVEL).contains(&target) {
                    return Err(AdaptorError::InvalidParams(format!(
                        "target {target} outside ±{AXIS_TRAVEL}"
                    )));
                }
                Ok(())
            }
            ActionKind::Home | ActionKind::Reinitialize => Ok(()),
            other => Err(unsupported(other)),
        }
    }

    fn apply(&mut self, kind: ActionKind, params: &CommandParams) {
        self.target = match kind {
            ActionKind::Primary => params.param_i32(0),
            _ => 0,
        };
        self.position = self.target;
        self.moves = self.moves.wrapping_add(1);
    }

    fn telemetry(&self) -> Telemetry {
        let mut telemetry = Telemetry::new();
        telemetry
            .set_i32(4, self.position)
            .set_i32(6, self.target)
            .set(8, self.moves);
        telemetry
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
struct GripperModel {
    position: u16,
    force: u16,
}

impl SimModel for GripperModel {
    fn validate(&self, kind: ActionKind, params: &CommandParams) -> Result<(), AdaptorError> {
        match kind {
            ActionKind::Primary => {
                let (position, force) = (params.param_u32(0), params.param_u32(1));
                if position > 1000 || force > 100 {
                    return Err(AdaptorError::InvalidParams(format!(
                        "position {position}‰ / force {force}% out of range"
                    )));
                }
                Ok(())
            }
            ActionKind::Home | ActionKind::Reinitialize => Ok(()),
            other => Err(unsupported(other)),
        }
    }

    fn apply(&mut self, kind: ActionKind, params: &CommandParams) {
        match kind {
            ActionKind::Primary => {
                self.position = params.param_u32(0) as u16;
                self.force = params.param_u32(1) as u16;
            }
            _ => self.reset(),
        }
    }

    fn telemetry(&self) -> Telemetry {
        let held = self.position > 0 && self.force > 0;
        let mut telemetry = Telemetry::new();
        telemetry
            .set(4, self.position)
            .set(5, self.force)
            .set(6, held as u16);
        telemetry
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
struct FeederModel {
    strength: u16,
    frequency: u16,
    runs: u16,
}

impl SimModel for FeederModel {
    fn validate(&self, kind: ActionKind, params: &CommandParams) -> Result<(), AdaptorError> {
        match kind {
            ActionKind::Primary => {
                let (strength, frequency) = (params.param_u32(0), params.param_u32(1));
                if strength > 100 || !(1..=400).contains(&frequency) {
                    return Err(AdaptorError::InvalidParams(format!(
                        "strength {strength}% / frequency {frequency} Hz out of range"
                    )));
                }
                Ok(())
            }
            ActionKind::Home | ActionKind::Reinitialize => Ok(()),
            other => Err(unsupported(other)),
        }
    }

    fn duration(&self, kind: ActionKind, params: &CommandParams) -> Duration {
        match kind {
            ActionKind::Primary => Duration::from_millis(params.param_u32(2) as u64),
            _ => Duration::ZERO,
        }
    }

    fn apply(&mut self, kind: ActionKind, params: &CommandParams) {
        match kind {
            ActionKind::Primary => {
                self.strength = params.param_u32(0) as u16;
                self.frequency = params.param_u32(1) as u16;
                self.runs = self.runs.wrapping_add(1);
            }
            _ => {
                self.strength = 0;
                self.frequency = 0;
            }
        }
    }

    fn telemetry(&self) -> Telemetry {
        let mut telemetry = Telemetry::new();
        telemetry
            .set(4, self.strength)
            .set(5, self.frequency)
            .set(6, self.runs);
        telemetry
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

const LIGHT_CHANNELS: usize = 4;
const LIGHT_MAX_BRIGHTNESS: u32 = 511;

#[derive(Debug, Default)]
struct LightModel {
    brightness: [u16; LIGHT_CHANNELS],
}

impl SimModel for LightModel {
    fn validate(&self, kind: ActionKind, params: &CommandParams) -> Result<(), AdaptorError> {
        match kind {
            ActionKind::Primary => {
                let (mask, level) = (params.param_u32(0), params.param_u32(1));
                if mask == 0 || mask > 0b1111 || level > LIGHT_MAX_BRIGHTNESS {
                    return Err(AdaptorError::InvalidParams(format!(
                        "channel mask {mask:#b} / brightness {level} out of range"
                    )));
                }
                Ok(())
            }
            ActionKind::Home | ActionKind::Reinitialize => Ok(()),
            other => Err(unsupported(other)),
        }
    }

    fn apply(&mut self, kind: ActionKind, params: &CommandParams) {
        match kind {
            ActionKind::Primary => {
                let mask = params.param_u32(0);
                let level = params.param_u32(1) as u16;
                for (channel, brightness) in self.brightness.iter_mut().enumerate() {
                    if mask & (1 << channel) != 0 {
                        *brightness = level;
                    }
                }
            }
            _ => self.reset(),
        }
    }

    fn telemetry(&self) -> Telemetry {
        let mask = self
            .brightness
            .iter()
            .enumerate()
            .filter(|(_, level)| **level > 0)
            .fold(0u16, |mask, (channel, _)| mask | (1 << channel));
        let mut telemetry = Telemetry::new();
        telemetry.set(4, mask);
        for (channel, level) in self.brightness.iter().enumerate() {
            telemetry.set(5 + channel as u16, *level);
        }
        telemetry
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

type SharedModel = Arc<Mutex<Box<dyn SimModel>>>;

fn lock_model(
    model: &SharedModel,
) -> Result<std::sync::MutexGuard<'_, Box<dyn SimModel>>, AdaptorError> {
    model.lock().map_err(|_| AdaptorError::Device {
        code: 0,
        message: "simulation state poisoned".into(),
    })
}

/// Adaptor driving one simulated device.
#[derive(Debug)]
pub struct SimulatedAdaptor {
    kind: SimKind,
    link: Arc<DeviceLink>,
    model: SharedModel,
}

impl SimulatedAdaptor {
    pub fn new(kind: SimKind, options: LinkOptions) -> Self {
        let model: Box<dyn SimModel> = match kind {
            SimKind::Axis => Box::<AxisModel>::default(),
            SimKind::Gripper => Box::<GripperModel>::default(),
            SimKind::Feeder => Box::<FeederModel>::default(),
            SimKind::Light => Box::<LightModel>::default(),
        };
        let name = match kind {
            SimKind::Axis => "sim-axis",
            SimKind::Gripper => "sim-gripper",
            SimKind::Feeder => "sim-feeder",
            SimKind::Light => "sim-light",
        };
        Self {
            kind,
            link: Arc::new(DeviceLink::new(name, options)),
            model: Arc::new(Mutex::new(model)),
        }
    }

    pub fn kind(&self) -> SimKind {
        self.kind
    }

    /// Connection state, exposed so that tests can pull the plug.
    pub fn link(&self) -> &DeviceLink {
        &self.link
    }
}

async fn run_action(
    link: &DeviceLink,
    model: &SharedModel,
    kind: ActionKind,
    params: CommandParams,
    cancel: CancelToken,
) -> ExecutionResult {
    let extra = {
        let model = lock_model(model)?;
        model.validate(kind, &params)?;
        model.duration(kind, &params)
    };

    link.set_state(DeviceState::Busy);
    if let Err(e) = sleep_or_cancel(link.options().latency + extra, &cancel).await {
        link.set_state(DeviceState::Idle);
        return Err(e);
    }
    link.require_connected()?;

    let mut model = lock_model(model)?;
    if kind == ActionKind::Reinitialize {
        model.reset();
        link.set_initialized(true);
    } else {
        model.apply(kind, &params);
    }
    link.set_state(DeviceState::Idle);
    Ok(Some(model.telemetry()))
}

#[async_trait]
impl DeviceAdaptor for SimulatedAdaptor {
    async fn connect(&self) -> Result<(), AdaptorError> {
        self.link.connect()
    }

    async fn initialize(&self) -> Result<(), AdaptorError> {
        self.link.require_connected()?;
        if !self.link.is_initialized() {
            lock_model(&self.model)?.reset();
            self.link.set_initialized(true);
            debug!("{} initialised", self.kind);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdaptorError> {
        self.link.disconnect();
        Ok(())
    }

    fn query(&self) -> DeviceStatus {
        self.link.status()
    }

    fn execute(&self, kind: ActionKind, params: CommandParams) -> ExecutionHandle {
        let id = self.link.next_id();
        if let Err(e) = self.link.require_connected() {
            return ExecutionHandle::resolved(id, Err(e));
        }

        let (handle, completion) = ExecutionHandle::pair(id);
        let link = Arc::clone(&self.link);
        let model = Arc::clone(&self.model);
        let device = self.kind;
        tokio::spawn(async move {
            let result = run_action(&link, &model, kind, params, completion.cancel_token()).await;
            if let Err(e) = &result {
                warn!("{device} {kind} #{id} failed: {e}");
            }
            completion.finish(result);
        });
        handle
    }
}
