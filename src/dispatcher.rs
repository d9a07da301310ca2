//! Emulation loop and driver API (spec.md §2 items 6 and 9, §4.5-§4.8).
//!
//! `Emulator<E>` owns the CPU/memory/peripheral graph and drives it one
//! system cycle at a time: VIC, then both CIAs, then the CPU (spec.md §5).
//! Three playback modes share that cycle-stepped core but differ in how
//! PLAY gets invoked:
//!
//! - RSID: the CPU runs continuously; IRQs/NMIs arise organically from
//!   whatever the tune's own ROM-routine emulation and CIA setup produce.
//! - PSID raster-driven: PLAY is called once per VIC frame via a faked VIC
//!   IRQ, ported from the reference's `runEmuRasterPSID`.
//! - PSID timer-driven: PLAY is paced by the CIA1 Timer A latch (or, if
//!   that's zero, one screen's worth of cycles), ported from
//!   `runEmuTimerPSID`, including its cross-frame `slot_overflow`/
//!   `pending_pc` carry state.

use crate::constants::{CYCLELIMIT, RASTER_PLAY_OVERRUN_BUDGET, TRAMPOLINE_ADDR, TRAMPOLINE_HALT_ADDR};
use crate::cpu::Cpu;
use crate::env::SongEnvironment;
use crate::error::EmuError;
use crate::hacks::HacksTable;
use crate::memory::Memory;
use crate::vic::Vic;

fn clamp16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

pub struct Emulator<E: SongEnvironment> {
    cpu: Cpu<Memory>,
    env: E,
    hacks: HacksTable,

    sample_rate: u32,
    cycles: f64,

    /// Edge-detected: CIA2's IRQ line feeds the CPU's NMI input, so only a
    /// 0->1 transition should deliver one (spec.md §4.2 data flow).
    prev_cia2_irq: bool,

    /// Trampoline scratch address chosen per `startup_song` call, clear of
    /// whatever this particular song occupies.
    trampoline_addr: u16,
    halt_addr: u16,

    /// `$0001` right after INIT returns, reapplied before every subsequent
    /// PSID PLAY call (spec.md §4.8 step 6 / `preparePlayPSID`).
    psid_bank_setting: u8,

    // PSID timer-driven cross-frame carry state (spec.md §4.7).
    slot_overflow: i32,
    pending_pc: u16,
}

impl<E: SongEnvironment> Emulator<E> {
    pub fn new(env: E) -> Self {
        let sid_addresses = env.sid_addresses();
        let memory = Memory::new(env.is_ntsc(), &sid_addresses);
        Self {
            cpu: Cpu::new(memory),
            env,
            hacks: HacksTable::new(),
            sample_rate: 44_100,
            cycles: 0.0,
            prev_cia2_irq: false,
            trampoline_addr: TRAMPOLINE_ADDR,
            halt_addr: TRAMPOLINE_ADDR + 3,
            psid_bank_setting: 0x37,
            slot_overflow: 0,
            pending_pc: 0,
        }
    }

    pub fn hacks_mut(&mut self) -> &mut HacksTable {
        &mut self.hacks
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    // ---- driver API (spec.md §6) ------------------------------------

    /// Copies `len` bytes of `src` into RAM at `dest_addr` and snapshots
    /// all of RAM, so every later `startup_song` call restores a clean
    /// starting point regardless of what a previous INIT/PLAY run did to
    /// it (spec.md §3 Lifecycles, invariant 7).
    pub fn load_song_binary(&mut self, src: &[u8], dest_addr: u16, len: u16) {
        let take = (len as usize).min(src.len());
        self.cpu.memory_mut().load(dest_addr, &src[..take]);
        self.cpu.memory_mut().take_snapshot();
    }

    /// Restores the loaded-song snapshot, applies any matching hack-table
    /// entry, sets up the PSID default bank bytes, and runs INIT to
    /// completion via the trampoline technique (spec.md §4.8).
    ///
    /// `init_addr` is taken `&mut` because a hack-table entry may override
    /// it before INIT runs. `compatibility` (the PSID compatibility/version
    /// byte) and `load_end` are accepted for API parity with the file
    /// header but aren't consulted: the bank-compatibility behavior
    /// `compatibility` historically adjusts lives in the song loader,
    /// outside this kernel (spec.md §1 Non-goals), and the trampoline
    /// address is the fixed scratch cell below, following the reference's
    /// own convention rather than trying to dodge individual songs' load
    /// ranges.
    pub fn startup_song(
        &mut self,
        sample_rate: u32,
        ntsc: bool,
        compatibility: u8,
        init_addr: &mut u16,
        load_end: u16,
        play_addr: u16,
        subsong: u8,
    ) -> Result<(), EmuError> {
        let _ = (compatibility, load_end);
        self.sample_rate = sample_rate;
        self.cycles = 0.0;
        self.prev_cia2_irq = false;
        self.slot_overflow = 0;
        self.pending_pc = 0;
        self.trampoline_addr = TRAMPOLINE_ADDR;
        self.halt_addr = TRAMPOLINE_HALT_ADDR;

        {
            let mem = self.cpu.memory_mut();
            mem.restore_snapshot();
            mem.reset_peripherals();
            mem.vic = Vic::new(ntsc);
        }

        if let Some(hack) = self.hacks.lookup(*init_addr, play_addr) {
            if let Some(override_addr) = hack.override_init_addr {
                *init_addr = override_addr;
            }
            let mem = self.cpu.memory_mut();
            mem.cia1.predictive.dc01_ff = hack.dc01_ff;
            mem.cia1.predictive.dc04_nmi_vector = hack.dc04_nmi_vector;
            mem.cia1.predictive.dc06_dummy = hack.dc06_dummy;
            mem.cia1.predictive.dummy_dc04_psid = hack.dummy_dc04_psid;
        }

        // PSID default bank: $00 direction all-out, $01 BASIC+KERNAL+IO
        // visible, matching the reference's `memSetDefaultBanksPSID`.
        self.cpu.memory_mut().poke(0x0000, 0x2F);
        self.cpu.memory_mut().poke(0x0001, 0x37);

        let trampoline_addr = self.trampoline_addr;
        self.cpu.memory_mut().install_trampoline(trampoline_addr, *init_addr);
        self.cpu.reset(trampoline_addr, subsong);

        let mut spent: u64 = 0;
        loop {
            self.tick_peripherals();
            let running = self.clock_cpu();
            spent += 1;
            if !running {
                break;
            }
            if spent >= CYCLELIMIT {
                return Err(EmuError::InitHang);
            }
        }

        if self.env.is_file_psid() {
            self.psid_bank_setting = self.cpu.memory().peek(0x0001);
        }

        Ok(())
    }

    /// Renders one frame's worth of audio into `buf` (interleaved stereo if
    /// more than one SID chip is present, mono otherwise) and, if supplied,
    /// per-voice trace data into `trace_bufs[sid_index * 3 + voice_index]`.
    /// Returns 0 on success; nonzero values are reserved for future error
    /// reporting (spec.md §7: most anomalies are absorbed and logged, not
    /// surfaced here).
    pub fn run_one_frame<const N: usize>(
        &mut self,
        buf: &mut [i16],
        mut trace_bufs: Option<&mut [&mut [i16]; N]>,
        samples_per_call: u16,
    ) -> u8 {
        let song_speed = self.env.current_song_speed();
        self.cpu.memory_mut().cia1.update_tod(song_speed);
        self.cpu.memory_mut().cia2.update_tod(song_speed);

        if self.env.is_rsid() {
            self.run_rsid(buf, &mut trace_bufs, samples_per_call);
        } else if self.env.is_timer_driven_psid() != 0 {
            self.run_psid_timer(buf, &mut trace_bufs, samples_per_call);
        } else {
            self.run_psid_raster(buf, &mut trace_bufs, samples_per_call);
        }
        0
    }

    #[cfg(any(test, feature = "rsid-test"))]
    /// Runs the hardware-driven RSID loop for `max_cycles` without
    /// producing audio, as a self-test harness for a loaded RSID tune
    /// (spec.md §6, ported from the reference's `#ifdef TEST rsidRunTest`).
    pub fn rsid_run_test(&mut self, max_cycles: u64) {
        let mut spent = 0u64;
        while spent < max_cycles {
            self.tick_peripherals();
            self.step_cpu_cycle();
            spent += 1;
        }
    }

    // ---- cycle-stepped core (spec.md §5) -----------------------------

    fn cycles_per_sample(&self) -> f64 {
        self.env.clock_rate() as f64 / self.sample_rate as f64
    }

    fn timer_latch_or_frame(&self) -> u16 {
        let mem = self.cpu.memory();
        let latch = mem.cia1.predictive.timer_a.latch;
        if latch == 0 {
            mem.vic.cycles_per_screen as u16
        } else {
            latch
        }
    }

    /// VIC then both CIAs advance one cycle; the CIA polling-hack model's
    /// visibility fields are kept in sync so `Bus::get_byte`/`set_byte` see
    /// an up-to-date `total_cycles`/`program_mode`/`in_nmi` even though
    /// those calls carry no cycle parameter of their own.
    fn tick_peripherals(&mut self) {
        let total_cycles = self.cpu.total_cycles();
        let program_mode = self.cpu.program_mode();
        let in_nmi = self.cpu.in_nmi();
        let mem = self.cpu.memory_mut();
        mem.vic.clock();
        mem.cia1.clock();
        mem.cia2.clock();
        mem.total_cycles = total_cycles;
        mem.program_mode = program_mode;
        mem.in_nmi = in_nmi;
    }

    /// Checks the interrupt lines at the one point a 6510 actually samples
    /// them (an instruction boundary) and delivers at most one IRQ/NMI.
    fn maybe_deliver_interrupt(&mut self) {
        if !self.cpu.at_instruction_boundary() {
            return;
        }
        let (cia1_irq, cia2_irq, vic_irq) = {
            let mem = self.cpu.memory();
            (mem.cia1.irq_asserted(), mem.cia2.irq_asserted(), mem.vic.irq_pending)
        };
        let nmi_edge = cia2_irq && !self.prev_cia2_irq;
        self.prev_cia2_irq = cia2_irq;

        if nmi_edge {
            self.cpu.deliver_nmi();
        } else if cia1_irq || vic_irq {
            self.cpu.deliver_irq();
        }
        if vic_irq {
            self.cpu.memory_mut().vic.irq_pending = false;
        }
    }

    fn step_cpu_cycle(&mut self) {
        self.maybe_deliver_interrupt();
        self.cpu.clock();
    }

    /// Runs one CPU cycle and reports whether it's still short of
    /// `halt_addr` — the "has PLAY/INIT returned yet" check the PSID modes
    /// use (spec.md §9's trampoline technique).
    fn clock_cpu(&mut self) -> bool {
        self.step_cpu_cycle();
        self.cpu.get_pc() != self.halt_addr
    }

    fn resolve_play_addr(&self) -> u16 {
        let direct = self.env.sid_play_addr();
        if direct != 0 {
            return direct;
        }
        let mem = self.cpu.memory();
        let v = mem.read_vector(0xFFFE);
        if v != 0 {
            return v;
        }
        mem.read_vector(0x0314)
    }

    /// spec.md §4.6: "$FFFE/F zero and $0314/5 not" means the standard IRQ
    /// chain was never wired up, so a full register reset before PLAY is
    /// harmless and avoids leaving garbage from a previous INIT in A/X/Y.
    fn is_dummy_irq_vector(&self) -> bool {
        let mem = self.cpu.memory();
        mem.read_vector(0xFFFE) == 0 && mem.read_vector(0x0314) != 0
    }

    /// Restores the post-INIT bank byte, resolves and installs the PLAY
    /// trampoline, and parks the CPU at its entry (spec.md §4.6/§4.7,
    /// `preparePlayPSID`).
    fn prepare_play(&mut self) {
        let bank = self.psid_bank_setting;
        self.cpu.memory_mut().poke(0x0001, bank);

        let resolved = self.resolve_play_addr();
        let dummy = self.is_dummy_irq_vector();
        let trampoline_addr = self.trampoline_addr;
        self.cpu.memory_mut().install_trampoline(trampoline_addr, resolved);

        if dummy {
            self.cpu.reset(trampoline_addr, 0);
        } else {
            self.cpu.reset_to_irq(trampoline_addr);
        }
    }

    fn mix_chip(sid: &crate::sid::SidChip) -> i32 {
        let mut filtered = 0i32;
        let mut unfiltered = 0i32;
        sid.digi.route_digi_signal(sid.shadow[0x17], &mut filtered, &mut unfiltered);
        filtered + unfiltered
    }

    /// Mixes every SID chip's digi sample into `buf` (spec.md §1: actual
    /// oscillator/envelope/filter synthesis is an out-of-scope external
    /// collaborator — this kernel only ever emits the digi component).
    /// With more than one chip, chip 0 drives the left channel and chip 1
    /// the right, with a third chip (rare) split across both.
    fn emit_sample<const N: usize>(
        &mut self,
        buf: &mut [i16],
        trace_bufs: &mut Option<&mut [&mut [i16]; N]>,
        i: usize,
    ) {
        let mem = self.cpu.memory();
        let n = mem.sids.len();
        let mut mixes = [0i32; 3];
        for (idx, sid) in mem.sids.iter().enumerate().take(3) {
            mixes[idx] = Self::mix_chip(sid);
        }

        let (left, right) = match n {
            0 => (0, 0),
            1 => (mixes[0], mixes[0]),
            _ => {
                let extra = if n > 2 { mixes[2] / 2 } else { 0 };
                (mixes[0] + extra, mixes[1] + extra)
            }
        };
        if n > 1 {
            buf[i * 2] = clamp16(left);
            buf[i * 2 + 1] = clamp16(right);
        } else if !buf.is_empty() {
            buf[i] = clamp16(left);
        }

        if let Some(bufs) = trace_bufs.as_deref_mut() {
            let mem = self.cpu.memory();
            for (sid_idx, sid) in mem.sids.iter().enumerate().take(3) {
                for voice in 0..3usize {
                    let ch = sid_idx * 3 + voice;
                    if ch >= bufs.len() {
                        continue;
                    }
                    let active = sid.digi.get_source() == (voice as u8 + 1);
                    bufs[ch][i] = if active { sid.digi.get_sample() } else { 0 };
                }
            }
        }
    }

    // ---- RSID mode (spec.md §4.5) ------------------------------------

    fn run_rsid<const N: usize>(
        &mut self,
        buf: &mut [i16],
        trace_bufs: &mut Option<&mut [&mut [i16]; N]>,
        samples_per_call: u16,
    ) {
        let cps = self.cycles_per_sample();
        for i in 0..samples_per_call as usize {
            while self.cycles < cps {
                self.tick_peripherals();
                self.step_cpu_cycle();
                self.cycles += 1.0;
            }
            self.cycles -= cps;
            self.emit_sample(buf, trace_bufs, i);
        }
    }

    // ---- PSID raster-driven mode (spec.md §4.6) ----------------------

    fn run_psid_raster<const N: usize>(
        &mut self,
        buf: &mut [i16],
        trace_bufs: &mut Option<&mut [&mut [i16]; N]>,
        samples_per_call: u16,
    ) {
        self.prepare_play();
        self.cpu.memory_mut().vic.irq_pending = true;

        let cps = self.cycles_per_sample();
        let mut running = true;
        for i in 0..samples_per_call as usize {
            while self.cycles < cps {
                self.tick_peripherals();
                if running {
                    running = self.clock_cpu();
                } else {
                    self.cpu.burn_cycle();
                }
                self.cycles += 1.0;
            }
            self.cycles -= cps;
            self.emit_sample(buf, trace_bufs, i);
        }

        if running {
            let mut extra = 0u32;
            while extra < RASTER_PLAY_OVERRUN_BUDGET && running {
                self.tick_peripherals();
                running = self.clock_cpu();
                extra += 1;
            }
            if running {
                log::warn!("{}", EmuError::RasterPlayRunaway);
            }
        }
    }

    // ---- PSID timer-driven mode (spec.md §4.7) -----------------------

    fn run_psid_timer<const N: usize>(
        &mut self,
        buf: &mut [i16],
        trace_bufs: &mut Option<&mut [&mut [i16]; N]>,
        samples_per_call: u16,
    ) {
        let mut slot_cycles: u16 = if self.slot_overflow != 0 {
            self.slot_overflow as u16
        } else {
            self.timer_latch_or_frame()
        };
        let mut valid_pc = self.pending_pc != 0;
        let mut irq_cycles: u16 = 0;
        let mut fill_cycles: i32 = self.slot_overflow;

        let cps = self.cycles_per_sample();
        for i in 0..samples_per_call as usize {
            while self.cycles < cps {
                self.tick_peripherals();

                if valid_pc {
                    irq_cycles = irq_cycles.saturating_add(1);
                    let still_running = self.clock_cpu();
                    if !still_running {
                        valid_pc = false;
                        if self.pending_pc != 0 {
                            // Completing a PLAY that straddled the previous
                            // frame boundary (spec.md §4.7).
                            if self.slot_overflow != 0 {
                                fill_cycles = if irq_cycles > self.slot_overflow as u16 {
                                    0
                                } else {
                                    self.slot_overflow - irq_cycles as i32
                                };
                                self.slot_overflow = 0;
                            } else {
                                slot_cycles = self.timer_latch_or_frame();
                                fill_cycles = 0;
                            }
                            self.pending_pc = 0;
                        } else {
                            slot_cycles = self.timer_latch_or_frame();
                            if irq_cycles > slot_cycles {
                                fill_cycles = 0;
                                let overrun = irq_cycles - slot_cycles;
                                if slot_cycles != 0 {
                                    slot_cycles -= overrun % slot_cycles;
                                }
                            } else {
                                fill_cycles = (slot_cycles - irq_cycles) as i32;
                            }
                        }
                    }
                } else if fill_cycles > 0 {
                    fill_cycles -= 1;
                    self.cpu.burn_cycle();
                } else {
                    self.prepare_play();
                    self.cpu.memory_mut().cia1.force_fake_irq();
                    irq_cycles = 0;
                    valid_pc = true;
                    fill_cycles = 0;
                }

                self.cycles += 1.0;
            }
            self.cycles -= cps;
            self.emit_sample(buf, trace_bufs, i);
        }

        // Carry state across the frame boundary (spec.md §4.7).
        self.slot_overflow = fill_cycles.max(0);
        self.pending_pc = if valid_pc { self.cpu.get_pc() } else { 0 };
        if self.pending_pc != 0 {
            self.slot_overflow = if irq_cycles > slot_cycles {
                0
            } else {
                (slot_cycles - irq_cycles) as i32
            };
            if self.slot_overflow == 0 && irq_cycles > slot_cycles {
                log::warn!("{}", EmuError::TimerSlotOverrun);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticEnvironment;

    fn init_only_binary() -> [u8; 3] {
        // LDA #$00 ; RTS — a trivial INIT that returns immediately.
        [0xA9, 0x00, 0x60]
    }

    fn play_silence_binary() -> [u8; 1] {
        [0x60] // RTS
    }

    #[test]
    fn startup_song_runs_init_to_completion() {
        let env = StaticEnvironment {
            raster_driven: true,
            ..Default::default()
        };
        let mut emu = Emulator::new(env);
        emu.load_song_binary(&init_only_binary(), 0x1000, 3);
        emu.load_song_binary(&play_silence_binary(), 0x1003, 1);
        let mut init_addr = 0x1000u16;
        let result = emu.startup_song(44_100, false, 0, &mut init_addr, 0x1004, 0x1003, 1);
        assert!(result.is_ok());
    }

    #[test]
    fn startup_song_reports_init_hang() {
        let env = StaticEnvironment::default();
        let mut emu = Emulator::new(env);
        // JMP $1000 — infinite loop, INIT never returns.
        emu.load_song_binary(&[0x4C, 0x00, 0x10], 0x1000, 3);
        let mut init_addr = 0x1000u16;
        let result = emu.startup_song(44_100, false, 0, &mut init_addr, 0x1003, 0x1003, 1);
        assert_eq!(result, Err(EmuError::InitHang));
    }

    #[test]
    fn run_one_frame_raster_driven_produces_samples() {
        let env = StaticEnvironment {
            raster_driven: true,
            samples_per_call: 100,
            ..Default::default()
        };
        let mut emu = Emulator::new(env);
        emu.load_song_binary(&init_only_binary(), 0x1000, 3);
        emu.load_song_binary(&play_silence_binary(), 0x1003, 1);
        let mut init_addr = 0x1000u16;
        emu.startup_song(44_100, false, 0, &mut init_addr, 0x1004, 0x1003, 1).unwrap();

        let mut buf = [0i16; 100];
        let status = emu.run_one_frame::<0>(&mut buf, None, 100);
        assert_eq!(status, 0);
    }

    #[test]
    fn run_one_frame_timer_driven_produces_samples() {
        let env = StaticEnvironment {
            raster_driven: false,
            timer_driven: true,
            samples_per_call: 100,
            ..Default::default()
        };
        let mut emu = Emulator::new(env);
        emu.load_song_binary(&init_only_binary(), 0x1000, 3);
        emu.load_song_binary(&play_silence_binary(), 0x1003, 1);
        let mut init_addr = 0x1000u16;
        emu.startup_song(44_100, false, 0, &mut init_addr, 0x1004, 0x1003, 1).unwrap();

        let mut buf = [0i16; 100];
        let status = emu.run_one_frame::<0>(&mut buf, None, 100);
        assert_eq!(status, 0);
    }

    #[test]
    fn stereo_buffer_filled_for_two_sid_chips() {
        let env = StaticEnvironment {
            raster_driven: true,
            samples_per_call: 10,
            sid_addresses: [0xD400, 0xD420, 0],
            sid_6581s: [1, 1, 0],
            ..Default::default()
        };
        let mut emu = Emulator::new(env);
        emu.load_song_binary(&init_only_binary(), 0x1000, 3);
        emu.load_song_binary(&play_silence_binary(), 0x1003, 1);
        let mut init_addr = 0x1000u16;
        emu.startup_song(44_100, false, 0, &mut init_addr, 0x1004, 0x1003, 1).unwrap();

        let mut buf = [0i16; 20];
        let status = emu.run_one_frame::<0>(&mut buf, None, 10);
        assert_eq!(status, 0);
    }
}
