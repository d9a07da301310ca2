//! "Digi" sample detector (spec.md §4.4).
//!
//! Classifies SID register write patterns in real time and extracts a PCM
//! stream from them. Each per-voice detector is a small state machine
//! (spec.md §9: "write them as `enum` + transition function") so the
//! state-exit timeouts are checkable in isolation.
//!
//! Open Question (a) (spec.md §9): the reference's exact cycle-count
//! thresholds for the FM/PWM timeout windows aren't reproduced here (they
//! weren't available to port); [`FM_DIGI_TIMEOUT_CYCLES`] and
//! [`PWM_DIGI_TIMEOUT_CYCLES`] are a documented best-effort choice — see
//! DESIGN.md.

pub const FM_DIGI_TIMEOUT_CYCLES: u64 = 32;
pub const PWM_DIGI_TIMEOUT_CYCLES: u64 = 64;
/// How long a voice holds exclusive rights to `last_sample`/`last_source`
/// after emitting, before another voice's writes are allowed to compete.
pub const SOURCE_LOCK_TIMEOUT_CYCLES: u64 = 2000;
/// Rolling window used to distinguish Mahoney (repeated non-NMI $D418
/// writes plus filter-register manipulation) from plain $D418 digi.
pub const MAHONEY_WINDOW_CYCLES: u64 = 2000;
pub const MAHONEY_WRITE_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigiType {
    None,
    D418Nmi,
    D418Mahoney,
    FreqMod,
    PulseMod,
    Swallow,
    IceGuys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreqState {
    Idle,
    Prep,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PulseState {
    Idle,
    Prep,
    Confirm,
    Prep2,
    Confirm2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PulseHalf {
    Lo,
    Hi,
}

#[derive(Debug, Clone, Copy)]
struct VoiceFreqDigi {
    state: FreqState,
    last_write_cycle: u64,
    pending_sample: u8,
}

impl VoiceFreqDigi {
    fn new() -> Self {
        Self {
            state: FreqState::Idle,
            last_write_cycle: 0,
            pending_sample: 0,
        }
    }

    fn expire_if_stale(&mut self, cycle: u64) {
        if self.state != FreqState::Idle && cycle.saturating_sub(self.last_write_cycle) > FM_DIGI_TIMEOUT_CYCLES {
            self.state = FreqState::Idle;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct VoicePulseDigi {
    state: PulseState,
    last_write_cycle: u64,
    baseline: u8,
    half: PulseHalf,
}

impl VoicePulseDigi {
    fn new() -> Self {
        Self {
            state: PulseState::Idle,
            last_write_cycle: 0,
            baseline: 0,
            half: PulseHalf::Lo,
        }
    }

    fn expire_if_stale(&mut self, cycle: u64) {
        if self.state != PulseState::Idle && cycle.saturating_sub(self.last_write_cycle) > PWM_DIGI_TIMEOUT_CYCLES {
            self.state = PulseState::Idle;
        }
    }
}

pub struct DigiDetector {
    freq: [VoiceFreqDigi; 3],
    ice: [VoiceFreqDigi; 3],
    pulse: [VoicePulseDigi; 3],
    swallow_acc: [u16; 3],
    swallow_have_lo: [bool; 3],

    pub last_sample: i16,
    /// 0 = $D418 digi, else voice number 1..=3.
    pub last_source: u8,
    pub last_type: DigiType,
    source_lock: Option<(u8, u64)>,

    d418_outside_nmi_count: u32,
    d418_window_start: u64,
    last_filter_write_cycle: u64,
}

impl DigiDetector {
    pub fn new() -> Self {
        Self {
            freq: [VoiceFreqDigi::new(); 3],
            ice: [VoiceFreqDigi::new(); 3],
            pulse: [VoicePulseDigi::new(); 3],
            swallow_acc: [0; 3],
            swallow_have_lo: [false; 3],
            last_sample: 0,
            last_source: 0,
            last_type: DigiType::None,
            source_lock: None,
            d418_outside_nmi_count: 0,
            d418_window_start: 0,
            last_filter_write_cycle: 0,
        }
    }

    pub fn get_sample(&self) -> i16 {
        self.last_sample
    }

    pub fn get_source(&self) -> u8 {
        self.last_source
    }

    /// Filter cutoff/resonance writes ($D415-$D417) feed the Mahoney
    /// detector's "specific filter-register manipulations" heuristic.
    pub fn note_filter_write(&mut self, cycle: u64) {
        self.last_filter_write_cycle = cycle;
    }

    /// Dispatches a SID register write. `offset` is relative to the SID
    /// chip's base address; `0x18` is $D418 regardless of voice layout.
    pub fn on_write(&mut self, offset: u16, value: u8, cycle: u64, in_nmi: bool) {
        if offset == 0x18 {
            self.handle_d418(value, cycle, in_nmi);
            return;
        }
        if offset >= 0x15 {
            return;
        }
        let voice = (offset / 7) as usize;
        let reg = offset % 7;
        if self.locked_out((voice + 1) as u8, cycle) {
            return;
        }

        match reg {
            1 => self.handle_freq_hi(voice, value, cycle),
            2 => self.handle_pulse(voice, PulseHalf::Lo, value, cycle),
            3 => self.handle_pulse(voice, PulseHalf::Hi, value, cycle),
            4 => self.handle_control(voice, value, cycle),
            _ => {}
        }
    }

    fn handle_d418(&mut self, value: u8, cycle: u64, in_nmi: bool) {
        if self.locked_out(0, cycle) {
            return;
        }
        let nibble = value & 0x0F;
        let sample = scale_nibble(nibble);

        if in_nmi {
            self.d418_outside_nmi_count = 0;
            self.emit(0, sample, cycle, DigiType::D418Nmi);
            return;
        }

        if cycle.saturating_sub(self.d418_window_start) > MAHONEY_WINDOW_CYCLES {
            self.d418_window_start = cycle;
            self.d418_outside_nmi_count = 0;
        }
        self.d418_outside_nmi_count += 1;

        let recent_filter_tweak =
            cycle.saturating_sub(self.last_filter_write_cycle) <= MAHONEY_WINDOW_CYCLES;
        let kind = if self.d418_outside_nmi_count >= MAHONEY_WRITE_THRESHOLD && recent_filter_tweak {
            DigiType::D418Mahoney
        } else {
            DigiType::D418Nmi
        };
        self.emit(0, sample, cycle, kind);
    }

    /// FM digi: Idle -(test-bit set)-> Prep -(freq-hi write)-> Set
    /// -(test-bit cleared)-> commit. Ice Guys: the mirror-image ordering,
    /// freq-hi first.
    fn handle_control(&mut self, voice: usize, value: u8, cycle: u64) {
        self.freq[voice].expire_if_stale(cycle);
        self.ice[voice].expire_if_stale(cycle);
        let test_bit = value & 0x08 != 0;

        match self.freq[voice].state {
            FreqState::Idle if test_bit => {
                self.freq[voice].state = FreqState::Prep;
                self.freq[voice].last_write_cycle = cycle;
            }
            FreqState::Set if !test_bit => {
                let sample = scale_byte(self.freq[voice].pending_sample);
                self.freq[voice].state = FreqState::Idle;
                self.emit((voice + 1) as u8, sample, cycle, DigiType::FreqMod);
                return;
            }
            _ => {}
        }

        // Ice Guys: second step of its own independent FSM.
        if self.ice[voice].state == FreqState::Prep && test_bit {
            self.ice[voice].state = FreqState::Set;
            self.ice[voice].last_write_cycle = cycle;
        } else if self.ice[voice].state == FreqState::Set && !test_bit {
            let sample = scale_byte(self.ice[voice].pending_sample);
            self.ice[voice].state = FreqState::Idle;
            self.emit((voice + 1) as u8, sample, cycle, DigiType::IceGuys);
        }
    }

    fn handle_freq_hi(&mut self, voice: usize, value: u8, cycle: u64) {
        self.freq[voice].expire_if_stale(cycle);
        self.ice[voice].expire_if_stale(cycle);

        if self.freq[voice].state == FreqState::Prep {
            self.freq[voice].state = FreqState::Set;
            self.freq[voice].pending_sample = value;
            self.freq[voice].last_write_cycle = cycle;
        }

        if self.ice[voice].state == FreqState::Idle {
            self.ice[voice].state = FreqState::Prep;
            self.ice[voice].pending_sample = value;
            self.ice[voice].last_write_cycle = cycle;
        }
    }

    /// PWM digi: repeated writes to the same pulse-width half within the
    /// timeout window; 8-bit delta against the running baseline is the
    /// sample. Swallow's accumulator is fed from whichever writes don't
    /// match that pattern (a lo/hi pair forming one 16-bit value).
    fn handle_pulse(&mut self, voice: usize, half: PulseHalf, value: u8, cycle: u64) {
        self.pulse[voice].expire_if_stale(cycle);
        let p = &mut self.pulse[voice];

        match p.state {
            PulseState::Idle => {
                p.state = PulseState::Prep;
                p.half = half;
                p.baseline = value;
                p.last_write_cycle = cycle;
                drop(p);
                self.swallow_feed(voice, half, value, cycle);
            }
            PulseState::Prep | PulseState::Confirm | PulseState::Prep2 | PulseState::Confirm2 => {
                if half == p.half {
                    let delta = value.wrapping_sub(p.baseline) as i8;
                    p.baseline = value;
                    p.last_write_cycle = cycle;
                    p.state = match p.state {
                        PulseState::Prep | PulseState::Confirm2 => PulseState::Confirm,
                        _ => PulseState::Prep2,
                    };
                    drop(p);
                    let sample = scale_delta(delta);
                    self.emit((voice + 1) as u8, sample, cycle, DigiType::PulseMod);
                } else {
                    p.state = PulseState::Idle;
                    drop(p);
                    self.swallow_feed(voice, half, value, cycle);
                }
            }
        }
    }

    fn swallow_feed(&mut self, voice: usize, half: PulseHalf, value: u8, cycle: u64) {
        match half {
            PulseHalf::Lo => {
                self.swallow_acc[voice] = (self.swallow_acc[voice] & 0xFF00) | value as u16;
                self.swallow_have_lo[voice] = true;
            }
            PulseHalf::Hi => {
                self.swallow_acc[voice] = (self.swallow_acc[voice] & 0x00FF) | ((value as u16 & 0x0F) << 8);
                if self.swallow_have_lo[voice] {
                    self.swallow_have_lo[voice] = false;
                    let sample = ((self.swallow_acc[voice] >> 4) as i16) - 128;
                    self.emit((voice + 1) as u8, sample * 256, cycle, DigiType::Swallow);
                }
            }
        }
    }

    fn locked_out(&self, source: u8, cycle: u64) -> bool {
        match self.source_lock {
            Some((locked, last_cycle)) if locked != source => {
                cycle.saturating_sub(last_cycle) < SOURCE_LOCK_TIMEOUT_CYCLES
            }
            _ => false,
        }
    }

    fn emit(&mut self, source: u8, sample: i16, cycle: u64, kind: DigiType) {
        self.last_sample = sample;
        self.last_source = source;
        self.last_type = kind;
        self.source_lock = Some((source, cycle));
    }

    /// Decides whether the digi sample is routed through the SID filter
    /// (spec.md §4.4's `route_digi_signal`). `filter_routing_bits` is the
    /// SID filter-resonance/routing register's low 3 bits (voice 1..3).
    pub fn route_digi_signal(
        &self,
        filter_routing_bits: u8,
        out_filtered: &mut i32,
        out_unfiltered: &mut i32,
    ) {
        if self.last_type == DigiType::None {
            return;
        }
        let routed = if self.last_source == 0 {
            true
        } else {
            filter_routing_bits & (1 << (self.last_source - 1)) != 0
        };
        if routed {
            *out_filtered += self.last_sample as i32;
        } else {
            *out_unfiltered += self.last_sample as i32;
        }
    }
}

impl Default for DigiDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn scale_nibble(nibble: u8) -> i16 {
    (nibble as i16 - 8) * 1024
}

fn scale_byte(value: u8) -> i16 {
    (value as i16 - 128) * 256
}

fn scale_delta(delta: i8) -> i16 {
    delta as i16 * 256
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S4.
    #[test]
    fn d418_digi_under_nmi_alternates_and_reports_source_zero() {
        let mut d = DigiDetector::new();
        d.on_write(0x18, 0x0F, 100, true);
        assert!(d.get_sample() > 0);
        assert_eq!(d.get_source(), 0);

        d.on_write(0x18, 0x00, 200, true);
        assert!(d.get_sample() < 0);
        assert_eq!(d.get_source(), 0);
    }

    /// Scenario S5.
    #[test]
    fn fm_digi_on_voice_one_commits_on_test_bit_release() {
        let mut d = DigiDetector::new();
        d.on_write(0x04, 0x09, 1000, false); // test+waveform
        d.on_write(0x01, 0x80, 1010, false); // freq-hi
        d.on_write(0x04, 0x01, 1020, false); // test bit released
        assert_eq!(d.get_sample(), scale_byte(0x80));
        assert_eq!(d.get_source(), 1);
    }

    #[test]
    fn fm_digi_times_out_without_committing() {
        let mut d = DigiDetector::new();
        d.on_write(0x04, 0x09, 0, false);
        d.on_write(0x01, 0x80, FM_DIGI_TIMEOUT_CYCLES + 100, false);
        // The Prep->Set transition itself expired before this write landed.
        d.on_write(0x04, 0x01, FM_DIGI_TIMEOUT_CYCLES + 110, false);
        assert_eq!(d.get_source(), 0);
        assert_eq!(d.last_type, DigiType::None);
    }

    #[test]
    fn source_lock_ignores_other_voices_until_timeout() {
        let mut d = DigiDetector::new();
        d.on_write(0x04, 0x09, 0, false);
        d.on_write(0x01, 0x80, 1, false);
        d.on_write(0x04, 0x01, 2, false);
        assert_eq!(d.get_source(), 1);

        // Voice 2 tries immediately — locked out.
        d.on_write(0x0B, 0x09, 3, false); // voice2 control (offset 11)
        d.on_write(0x08, 0x40, 4, false); // voice2 freq-hi (offset 8)
        d.on_write(0x0B, 0x01, 5, false);
        assert_eq!(d.get_source(), 1, "voice 2 should still be locked out");
    }

    #[test]
    fn pwm_digi_emits_delta_relative_to_baseline() {
        let mut d = DigiDetector::new();
        d.on_write(0x02, 0x40, 0, false); // PW-lo baseline
        d.on_write(0x02, 0x50, 10, false); // PW-lo again -> delta 0x10
        assert_eq!(d.last_type, DigiType::PulseMod);
        assert_eq!(d.get_sample(), scale_delta(0x10));
    }
}
