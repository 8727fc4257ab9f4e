//! JIT control level
//!
//! The control level gates what the JIT may do on a request. Levels are
//! ordered and each one grants everything the lower ones do:
//!
//! | Level | Resident kernels | Load from disk | Compile |
//! |-------|------------------|----------------|---------|
//! | `Off`   | no (cache swept) | no | no |
//! | `Pause` | yes (under lock) | no | no |
//! | `Run`   | yes              | no | no |
//! | `Load`  | yes              | yes | no |
//! | `On`    | yes              | yes | yes |
//!
//! Internal failures only ever lower the level; raising it again takes an
//! explicit [`crate::JitContext::set_control`].

use crate::error::{JitError, Result};
use log::{info, warn};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Ordered control level, `Off < Pause < Run < Load < On`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ControlLevel {
    /// No JIT kernels at all; the non-persistent part of the cache is freed
    Off = 0,
    /// Resident kernels may run, nothing is looked up on disk
    Pause = 1,
    /// Resident kernels may run without taking the lock
    Run = 2,
    /// Previously compiled libraries may be loaded from the cache directory
    Load = 3,
    /// Full compile-on-miss
    #[default]
    On = 4,
}

impl ControlLevel {
    /// All levels in ascending order
    pub const ALL: [ControlLevel; 5] = [
        ControlLevel::Off,
        ControlLevel::Pause,
        ControlLevel::Run,
        ControlLevel::Load,
        ControlLevel::On,
    ];

    /// Highest level this build allows
    pub const fn max_allowed() -> ControlLevel {
        if cfg!(feature = "jit") {
            ControlLevel::On
        } else {
            ControlLevel::Run
        }
    }

    /// `self` if this build allows it, otherwise
    /// [`JitError::InvalidControl`] naming the level it clamps to
    pub fn checked(self) -> Result<ControlLevel> {
        let allowed = self.min(ControlLevel::max_allowed());
        if allowed != self {
            return Err(JitError::InvalidControl {
                requested: self,
                allowed,
            });
        }
        Ok(self)
    }

    fn from_u8(v: u8) -> ControlLevel {
        match v {
            0 => ControlLevel::Off,
            1 => ControlLevel::Pause,
            2 => ControlLevel::Run,
            3 => ControlLevel::Load,
            _ => ControlLevel::On,
        }
    }

    /// Already-resident kernels may be served
    pub fn can_run(self) -> bool {
        self >= ControlLevel::Pause
    }

    /// Resident kernels may be served without the global lock
    pub fn allows_fast_path(self) -> bool {
        self >= ControlLevel::Run
    }

    /// Libraries may be opened from the cache directory
    pub fn can_load(self) -> bool {
        self >= ControlLevel::Load
    }

    /// New kernels may be compiled
    pub fn can_compile(self) -> bool {
        self == ControlLevel::On
    }
}

impl fmt::Display for ControlLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlLevel::Off => "OFF",
            ControlLevel::Pause => "PAUSE",
            ControlLevel::Run => "RUN",
            ControlLevel::Load => "LOAD",
            ControlLevel::On => "ON",
        };
        f.write_str(name)
    }
}

impl FromStr for ControlLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(ControlLevel::Off),
            "pause" => Ok(ControlLevel::Pause),
            "run" => Ok(ControlLevel::Run),
            "load" => Ok(ControlLevel::Load),
            "on" => Ok(ControlLevel::On),
            other => Err(format!("unknown control level '{}'", other)),
        }
    }
}

/// Process-wide control level.
///
/// Stored atomically so the lock-free fast path can read it; every write
/// happens while the context's state lock is held.
#[derive(Debug)]
pub struct ControlPolicy {
    level: AtomicU8,
}

impl ControlPolicy {
    /// Create a policy at `level`, clamped to what the build allows
    pub fn new(level: ControlLevel) -> Self {
        Self {
            level: AtomicU8::new(level.min(ControlLevel::max_allowed()) as u8),
        }
    }

    /// Current level
    pub fn get(&self) -> ControlLevel {
        ControlLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    /// Set the level from an explicit request, clamping it into the
    /// allowed range. Returns the level actually applied.
    pub fn set(&self, requested: ControlLevel) -> ControlLevel {
        let applied = match requested.checked() {
            Ok(level) => level,
            Err(e) => {
                warn!("jit: {}", e);
                ControlLevel::max_allowed()
            }
        };
        self.level.store(applied as u8, Ordering::Release);
        info!("jit: control set to {}", applied);
        applied
    }

    /// Lower the level to `to` after an internal failure.
    ///
    /// Never raises. Returns true if the level changed.
    pub fn lower(&self, to: ControlLevel, reason: &str) -> bool {
        let current = self.get();
        if to >= current {
            return false;
        }
        self.level.store(to as u8, Ordering::Release);
        warn!("jit: control lowered {} -> {} ({})", current, to, reason);
        true
    }
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self::new(ControlLevel::max_allowed())
    }
}
