//! SID file environment facade (spec.md §6).
//!
//! The kernel never parses a SID file itself — that's a loader collaborator
//! (spec.md §1 Non-goals). It only consumes read-only accessors through
//! this trait, grounded on the field set of the teacher's own
//! `player::sid_file::SidHeader`.

pub trait SongEnvironment {
    fn is_rsid(&self) -> bool;
    fn is_file_psid(&self) -> bool {
        !self.is_rsid()
    }
    fn is_ntsc(&self) -> bool;
    fn is_sid_6581(&self) -> bool;

    /// Non-zero (truthy as `i8`) when this PSID is raster-driven (PLAY
    /// invoked once per VIC frame). Mutually exclusive with
    /// [`Self::is_timer_driven_psid`].
    fn is_raster_driven_psid(&self) -> i8;
    /// Non-zero when PLAY is invoked from the CIA1 Timer A latch instead.
    fn is_timer_driven_psid(&self) -> i8;

    fn sid_play_addr(&self) -> u16;
    /// Bit N set => subsong N is NTSC-speed (PSID "speed" field semantics);
    /// for RSID this is meaningless and the dispatcher doesn't consult it.
    fn current_song_speed(&self) -> u8;

    fn clock_rate(&self) -> u32;
    fn samples_per_call(&self) -> u16;

    /// Up to 3 SID base addresses; slot 0 is always $D400, slots 1/2 are 0
    /// when unused.
    fn sid_addresses(&self) -> [u16; 3];
    /// Per-slot chip model flag (`true` = 6581), parallel to
    /// [`Self::sid_addresses`].
    fn sid_6581s(&self) -> [u8; 3];
}

/// A plain-data implementation of [`SongEnvironment`] for tests and for
/// callers who already parsed a SID header themselves. Field names mirror
/// the teacher's `SidHeader` (`player/sid_file.rs`).
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    pub is_rsid: bool,
    pub is_ntsc: bool,
    pub is_sid_6581: bool,
    pub raster_driven: bool,
    pub timer_driven: bool,
    pub sid_play_addr: u16,
    pub song_speed: u8,
    pub clock_rate: u32,
    pub samples_per_call: u16,
    pub sid_addresses: [u16; 3],
    pub sid_6581s: [u8; 3],
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            is_rsid: false,
            is_ntsc: false,
            is_sid_6581: true,
            raster_driven: true,
            timer_driven: false,
            sid_play_addr: 0,
            song_speed: 0,
            clock_rate: crate::constants::PAL_CLOCK_HZ,
            samples_per_call: 882,
            sid_addresses: [0xD400, 0, 0],
            sid_6581s: [1, 0, 0],
        }
    }
}

impl SongEnvironment for StaticEnvironment {
    fn is_rsid(&self) -> bool {
        self.is_rsid
    }
    fn is_ntsc(&self) -> bool {
        self.is_ntsc
    }
    fn is_sid_6581(&self) -> bool {
        self.is_sid_6581
    }
    fn is_raster_driven_psid(&self) -> i8 {
        self.raster_driven as i8
    }
    fn is_timer_driven_psid(&self) -> i8 {
        self.timer_driven as i8
    }
    fn sid_play_addr(&self) -> u16 {
        self.sid_play_addr
    }
    fn current_song_speed(&self) -> u8 {
        self.song_speed
    }
    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }
    fn samples_per_call(&self) -> u16 {
        self.samples_per_call
    }
    fn sid_addresses(&self) -> [u16; 3] {
        self.sid_addresses
    }
    fn sid_6581s(&self) -> [u8; 3] {
        self.sid_6581s
    }
}
