//! VIC-II raster stub (spec.md §2 item 3, §4.3).
//!
//! Only the raster counter and its IRQ-timing role are modeled; pixel
//! rendering, sprites, and bus-contention timing are out of scope
//! (spec.md §1). Grounded on the teacher's `c64_emu::vic_ii` module, cut
//! down to the subset the dispatcher actually needs.

use crate::constants::{NTSC_CYCLES_PER_SCREEN, PAL_CYCLES_PER_SCREEN};

pub struct Vic {
    pub is_ntsc: bool,
    pub cycles_per_screen: u32,
    pub raster_cycle: u32,
    pub raster_line: u16,
    pub raster_compare: u16,
    pub raster_irq_enabled: bool,
    /// Set for one dispatcher step when the raster counter matches
    /// `raster_compare`; the dispatcher is responsible for clearing it
    /// once it has acted on it.
    pub irq_pending: bool,
    /// Set for one dispatcher step on screen wrap (frame boundary).
    pub new_frame: bool,
    cycles_per_line: u32,
    lines_per_screen: u16,
}

impl Vic {
    pub fn new(is_ntsc: bool) -> Self {
        let (cycles_per_line, lines_per_screen) = if is_ntsc { (65, 262) } else { (63, 312) };
        let cycles_per_screen = if is_ntsc {
            NTSC_CYCLES_PER_SCREEN
        } else {
            PAL_CYCLES_PER_SCREEN
        };
        Self {
            is_ntsc,
            cycles_per_screen,
            raster_cycle: 0,
            raster_line: 0,
            raster_compare: 0,
            raster_irq_enabled: false,
            irq_pending: false,
            new_frame: false,
            cycles_per_line,
            lines_per_screen,
        }
    }

    pub fn reset(&mut self) {
        self.raster_cycle = 0;
        self.raster_line = 0;
        self.irq_pending = false;
        self.new_frame = false;
    }

    /// Advance one system cycle (spec.md §5: VIC clocks first, "it drives
    /// ϕ2").
    pub fn clock(&mut self) {
        self.raster_cycle += 1;
        if self.raster_cycle >= self.cycles_per_line {
            self.raster_cycle = 0;
            self.raster_line += 1;
            if self.raster_line >= self.lines_per_screen {
                self.raster_line = 0;
                self.new_frame = true;
            }
            if self.raster_irq_enabled && self.raster_line == self.raster_compare {
                self.irq_pending = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_end_of_screen() {
        let mut vic = Vic::new(false);
        for _ in 0..PAL_CYCLES_PER_SCREEN {
            vic.clock();
        }
        assert!(vic.new_frame);
        assert_eq!(vic.raster_line, 0);
    }

    #[test]
    fn raster_irq_fires_at_configured_line() {
        let mut vic = Vic::new(false);
        vic.raster_irq_enabled = true;
        vic.raster_compare = 100;
        for _ in 0..(100 * 63) {
            vic.clock();
        }
        assert!(vic.irq_pending);
    }
}
