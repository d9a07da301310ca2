//! System memory map (spec.md §2 item 2, SPEC_FULL.md §4.8).
//!
//! Flat 64 KiB RAM with an I/O overlay at $D000-$DFFF routing to VIC / color
//! RAM / SID / CIA1 / CIA2. Full PLA bank switching (BASIC/KERNAL/char ROM
//! visibility toggling via the processor port) is out of scope (spec.md
//! §1); `$0000`/`$0001` are modeled as plain memory cells that get
//! snapshotted and restored the way the reference's `memSetDefaultBanksPSID`
//! does, without changing what addresses actually route to.

use mos6502::memory::Bus;

use crate::cia::Cia;
use crate::cpu::ProgramMode;
use crate::sid::SidChip;
use crate::vic::Vic;

pub struct Memory {
    ram: [u8; 65536],
    snapshot: Option<Box<[u8; 65536]>>,
    pub color_ram: [u8; 1024],
    pub vic: Vic,
    pub cia1: Cia,
    pub cia2: Cia,
    pub sids: Vec<SidChip>,
    pub program_mode: ProgramMode,
    pub in_nmi: bool,
    /// Synced by the dispatcher to `cpu.total_cycles()` before each
    /// instruction boundary (see `cpu::Cpu::at_instruction_boundary`), so
    /// the CIA polling-hack model (spec.md §4.2) can diff against it from
    /// inside `Bus::get_byte`/`set_byte`, which have no cycle parameter of
    /// their own.
    pub total_cycles: u64,
}

impl Memory {
    pub fn new(is_ntsc: bool, sid_addresses: &[u16]) -> Self {
        let sids = sid_addresses
            .iter()
            .copied()
            .filter(|&a| a != 0)
            .map(SidChip::new)
            .collect();
        Self {
            ram: [0; 65536],
            snapshot: None,
            color_ram: [0; 1024],
            vic: Vic::new(is_ntsc),
            cia1: Cia::new(0xDC00),
            cia2: Cia::new(0xDD00),
            sids,
            program_mode: ProgramMode::MainLoop,
            in_nmi: false,
            total_cycles: 0,
        }
    }

    pub fn load(&mut self, addr: u16, data: &[u8]) {
        let start = addr as usize;
        let end = (start + data.len()).min(65536);
        self.ram[start..end].copy_from_slice(&data[..end - start]);
    }

    pub fn install_trampoline(&mut self, at: u16, target: u16) {
        let a = at as usize;
        self.ram[a] = 0x20; // JSR
        self.ram[a + 1] = (target & 0xFF) as u8;
        self.ram[a + 2] = (target >> 8) as u8;
        self.ram[a + 3] = 0x4C; // JMP
        self.ram[a + 4] = ((at + 3) & 0xFF) as u8;
        self.ram[a + 5] = ((at + 3) >> 8) as u8;
    }

    pub fn set_vector(&mut self, addr: u16, value: u16) {
        self.ram[addr as usize] = (value & 0xFF) as u8;
        self.ram[addr as usize + 1] = (value >> 8) as u8;
    }

    pub fn read_vector(&self, addr: u16) -> u16 {
        self.ram[addr as usize] as u16 | ((self.ram[addr as usize + 1] as u16) << 8)
    }

    /// Takes a full 64 KiB snapshot of RAM, as `load_song_binary` does right
    /// after copying the song into place (spec.md §6). Restored before
    /// every song start so a corrupted INIT run from a previous start
    /// cannot poison the next one (spec.md §3 Lifecycles, invariant 7).
    pub fn take_snapshot(&mut self) {
        let mut snap = Box::new([0u8; 65536]);
        snap.copy_from_slice(&self.ram);
        self.snapshot = Some(snap);
    }

    /// Restores all of RAM from the snapshot taken at load time (spec.md
    /// §4.8 step 2). A no-op if no snapshot has been taken yet.
    pub fn restore_snapshot(&mut self) {
        if let Some(ref snap) = self.snapshot {
            self.ram.copy_from_slice(snap.as_slice());
        }
    }

    /// Raw RAM access bypassing the I/O overlay — used for the handful of
    /// plain-memory-cell reads/writes the dispatcher needs (PSID bank byte
    /// `$0001`, IRQ vector peeks) that are never routed to VIC/SID/CIA.
    pub fn peek(&self, addr: u16) -> u8 {
        self.ram[addr as usize]
    }

    pub fn poke(&mut self, addr: u16, value: u8) {
        self.ram[addr as usize] = value;
    }

    pub fn reset_peripherals(&mut self) {
        self.vic.reset();
        self.cia1.reset();
        self.cia2.reset();
        for sid in &mut self.sids {
            sid.reset();
        }
    }

    fn sid_for(&mut self, addr: u16) -> Option<&mut SidChip> {
        self.sids.iter_mut().find(|s| (addr & 0xFFE0) == (s.base_addr & 0xFFE0))
    }

    fn sid_for_ref(&self, addr: u16) -> Option<&SidChip> {
        self.sids.iter().find(|s| (addr & 0xFFE0) == (s.base_addr & 0xFFE0))
    }
}

impl Bus for Memory {
    fn get_byte(&mut self, address: u16) -> u8 {
        match address {
            0xD000..=0xD3FF => 0,
            0xD400..=0xD7FF => self.sid_for_ref(address).map(|s| s.read(address)).unwrap_or(0),
            0xD800..=0xDBFF => self.color_ram[(address - 0xD800) as usize] & 0x0F,
            0xDC00..=0xDCFF => self.cia1.read_mem(address, self.total_cycles, self.program_mode),
            0xDD00..=0xDDFF => self.cia2.read_mem(address, self.total_cycles, self.program_mode),
            _ => self.ram[address as usize],
        }
    }

    fn set_byte(&mut self, address: u16, value: u8) {
        match address {
            0xD000..=0xD3FF => {
                match address & 0x3F {
                    0x11 => {
                        self.vic.raster_compare = (self.vic.raster_compare & 0x00FF)
                            | (((value & 0x80) as u16) << 1);
                        self.vic.raster_irq_enabled = true;
                    }
                    0x12 => {
                        self.vic.raster_compare = (self.vic.raster_compare & 0xFF00) | value as u16;
                    }
                    0x1A => self.vic.raster_irq_enabled = value & 0x01 != 0,
                    _ => {}
                }
            }
            0xD400..=0xD7FF => {
                let (cycles, in_nmi) = (self.total_cycles, self.in_nmi);
                if let Some(sid) = self.sid_for(address) {
                    sid.write(address, value, cycles, in_nmi);
                }
            }
            0xD800..=0xDBFF => self.color_ram[(address - 0xD800) as usize] = value & 0x0F,
            0xDC00..=0xDCFF => self.cia1.write_mem(address, value, self.total_cycles, self.program_mode),
            0xDD00..=0xDDFF => self.cia2.write_mem(address, value, self.total_cycles, self.program_mode),
            _ => self.ram[address as usize] = value,
        }
    }
}
