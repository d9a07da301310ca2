//! Kernel error kinds (spec.md §7).
//!
//! Only [`EmuError::InitHang`] is ever surfaced to a caller as an `Err`; the
//! other variants describe conditions the dispatcher absorbs and logs via
//! `log::warn!` — "garbage in, best-effort audio out".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuError {
    /// INIT exceeded `CYCLELIMIT` without returning.
    InitHang,
    /// Both IRQ vectors were zero/dummy and `sid_play_addr` was also zero.
    MalformedIrqVectors,
    /// A timer-driven PLAY overran its slot and the next one too.
    TimerSlotOverrun,
    /// A raster-driven PLAY ran past the 60,000-cycle abandon threshold.
    RasterPlayRunaway,
}

impl fmt::Display for EmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmuError::InitHang => write!(f, "INIT routine did not return within CYCLELIMIT"),
            EmuError::MalformedIrqVectors => {
                write!(f, "PSID file has no usable IRQ vector or sid_play_addr")
            }
            EmuError::TimerSlotOverrun => {
                write!(f, "timer-driven PLAY overran its slot across two frames")
            }
            EmuError::RasterPlayRunaway => {
                write!(f, "raster-driven PLAY abandoned after 60,000 cycles")
            }
        }
    }
}

impl std::error::Error for EmuError {}
