// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MEI register block.

use bitfield::bitfield;

/// The four word-sized registers of the MEI MMIO window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Reg {
    /// Host circular buffer write window.
    HostCbWw = 0x00,
    /// Host control/status.
    HostCsr = 0x04,
    /// ME circular buffer read window.
    MeCbRw = 0x08,
    /// ME control/status, host read access.
    MeCsrHa = 0x0c,
}

impl Reg {
    pub fn offset(self) -> usize {
        self as usize
    }
}

/// Access to the MEI register block.
///
/// Writes to [`Reg::HostCbWw`] push one word into the circular buffer and
/// advance the hardware write pointer.
pub trait MeiRegs {
    fn read(&self, reg: Reg) -> u32;
    fn write(&mut self, reg: Reg, value: u32);
}

bitfield! {
    /// Host control/status register.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct HostCsr(u32);
    impl Debug;
    pub interrupt_enable, set_interrupt_enable: 0;
    pub interrupt_status, set_interrupt_status: 1;
    pub interrupt_generate, set_interrupt_generate: 2;
    pub ready, set_ready: 3;
    pub reset, set_reset: 4;
    pub u8, read_ptr, set_read_ptr: 15, 8;
    pub u8, write_ptr, set_write_ptr: 23, 16;
    pub u8, depth, set_depth: 31, 24;
}

impl HostCsr {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Words that can still be written before the buffer is full. Hardware
    /// keeps `write_ptr <= depth`; a violating value reads as no room.
    pub fn free_slots(&self) -> usize {
        usize::from(self.depth().saturating_sub(self.write_ptr()))
    }

    /// The link carries messages only when ready and out of reset.
    pub fn link_usable(&self) -> bool {
        self.ready() && !self.reset()
    }
}

/// Memory-mapped MEI registers.
pub struct MmioMei {
    base: usize,
}

impl MmioMei {
    /// # Safety
    ///
    /// `base` must be the MEI BAR, mapped for uncached access, and nothing
    /// else may be driving the host side of the link.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl MeiRegs for MmioMei {
    fn read(&self, reg: Reg) -> u32 {
        let p = (self.base + reg.offset()) as *const u32;
        unsafe { p.read_volatile() }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        let p = (self.base + reg.offset()) as *mut u32;
        unsafe { p.write_volatile(value) }
    }
}
