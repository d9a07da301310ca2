//! CIA timer pair aggregate (spec.md §2 item 2, §4.1-§4.2).
//!
//! The predictive and polling-hack models are two always-live fields of
//! one `Cia`, not an enum — both are maintained on every write so that
//! whichever one the dispatcher needs at read time (decided by
//! `program_mode()`) is already up to date, per SPEC_FULL.md §9.

pub mod polling;
pub mod predictive;

use crate::cpu::ProgramMode;
use polling::PollingCia;
use predictive::PredictiveCia;

pub struct Cia {
    pub base_addr: u16,
    pub predictive: PredictiveCia,
    pub polling: PollingCia,
}

impl Cia {
    pub fn new(base_addr: u16) -> Self {
        Self {
            base_addr,
            predictive: PredictiveCia::new(),
            polling: PollingCia::default(),
        }
    }

    pub fn reset(&mut self) {
        self.predictive.reset();
        self.polling.reset();
    }

    pub fn is_active(&self) -> bool {
        self.predictive.is_active()
    }

    pub fn forward_to_next_interrupt(&mut self, limit: u32) -> u32 {
        self.predictive.forward_to_next_interrupt(limit)
    }

    pub fn signal_underflow(&mut self, timer_idx: u8) -> bool {
        self.predictive.signal_underflow(timer_idx)
    }

    /// Per-cycle tick driven by the dispatcher's main loop (spec.md §5).
    pub fn clock(&mut self) {
        self.predictive.clock();
    }

    pub fn irq_asserted(&self) -> bool {
        self.predictive.irq_asserted()
    }

    pub fn force_fake_irq(&mut self) {
        self.predictive.force_fake_irq();
    }

    pub fn update_tod(&mut self, song_speed: u8) {
        self.predictive.update_tod(song_speed);
    }

    /// The polling-hack model is mirrored on every write regardless of
    /// `program_mode()` (spec.md §4.2's `simWriteTimer` runs unconditionally
    /// in the reference) — only *reads* of it are gated to `MainLoop`, so a
    /// timer armed from inside an ISR is still visible once the main loop
    /// later polls `$xx0D`.
    pub fn write_mem(&mut self, addr: u16, data: u8, total_cycles: u64, _mode: ProgramMode) {
        self.predictive.write_mem(addr, data);

        match addr & 0x0F {
            0x04 => self.polling.timer_a.set_next_latch(self.predictive.timer_a.latch),
            0x06 => self.polling.timer_b.set_next_latch(self.predictive.timer_b.latch),
            0x0E => {
                if data & 0x01 != 0 {
                    self.polling.timer_a.start(total_cycles);
                } else {
                    self.polling.timer_a.stop(total_cycles, 1 << 1);
                }
            }
            0x0F => {
                if data & 0x01 != 0 {
                    self.polling.timer_b.start(total_cycles);
                } else {
                    self.polling.timer_b.stop(total_cycles, 1 << 2);
                }
            }
            _ => {}
        }
    }

    pub fn read_mem(&mut self, addr: u16, total_cycles: u64, mode: ProgramMode) -> u8 {
        if mode == ProgramMode::MainLoop {
            match addr & 0x0F {
                0x0D => return self.polling.read_icr(total_cycles),
                0x0E => return self.polling.timer_a.read_started(),
                0x0F => return self.polling.timer_b.read_started(),
                _ => {}
            }
        }
        self.predictive.read_mem(addr)
    }
}
