//! System-wide timing constants.
//!
//! The PAL/NTSC clock rates and screen geometry are the reference's own
//! numbers (spec.md §4.3); `CYCLELIMIT` and the raster-PLAY runaway budget
//! are from spec.md §4.8/§4.6.

pub const PAL_CLOCK_HZ: u32 = 985_248;
pub const NTSC_CLOCK_HZ: u32 = 1_022_727;

/// VIC screen geometry: 312 raster lines * 63 cycles/line (PAL).
pub const PAL_CYCLES_PER_SCREEN: u32 = 312 * 63;
/// VIC screen geometry: 262 raster lines * 65 cycles/line (NTSC).
pub const NTSC_CYCLES_PER_SCREEN: u32 = 262 * 65;

/// Sentinel returned by `forward_to_next_interrupt` meaning "no interrupt
/// within the requested window". Chosen larger than any 16-bit counter so
/// that ordering comparisons (`waited < FAIL_MARKER`) are cheap and never
/// collide with a real cycle count.
pub const FAIL_MARKER: u32 = 0x01FF_FFFF;

/// Sentinel "running counter" for a timer that isn't started or is
/// suspended. Larger than `FAIL_MARKER` so `STOPPED` timers never win a
/// "who underflows first" comparison against an armed one.
pub const STOPPED: u32 = 0x01FF_FFFF;

/// INIT is given this many cycles to return before the kernel reports
/// [`crate::error::EmuError::InitHang`].
pub const CYCLELIMIT: u64 = 2_000_000;

/// A raster-driven PLAY that hasn't returned by the end of its frame gets
/// this many extra cycles before the dispatcher abandons it.
pub const RASTER_PLAY_OVERRUN_BUDGET: u32 = 60_000;

/// Scratch RAM address used to run INIT/PLAY "to completion": the
/// dispatcher writes `JSR target; JMP $0303` here and parks the CPU's PC at
/// it, detecting a return by watching for PC to reach `TRAMPOLINE_ADDR + 3`.
/// Chosen to match the teacher's own trampoline address — low enough to sit
/// in zero-page-adjacent RAM that PSID/RSID images essentially never load
/// over, since real tunes start at $0800+ or higher.
pub const TRAMPOLINE_ADDR: u16 = 0x0300;
pub const TRAMPOLINE_HALT_ADDR: u16 = TRAMPOLINE_ADDR + 3;
