// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash protected-range programming for the PCH SPI controller.
//!
//! The controller has a small set of `PRx` registers, each describing a 4 KiB
//! granular window of the flash in which reads and/or writes are refused.
//! Once the lock-down bit in `HSFS` is set, neither the ranges nor the lock
//! can be changed again until the next platform reset, so everything here is
//! a one-shot operation.

#![cfg_attr(not(test), no_std)]

use bitfield::bitfield;
use ringbuf::{ringbuf, ringbuf_entry};

/// Register offsets from the SPI controller base.
pub mod reg {
    /// Hardware sequencing flash status (16 bits).
    pub const HSFS: u16 = 0x04;
    /// Protected range 0.
    pub const PR0: u16 = 0x74;
    /// Protected range 1.
    pub const PR1: u16 = 0x78;
}

/// Flash configuration lock-down. Setting this enables enforcement of the
/// protected ranges and freezes them.
pub const HSFS_FLOCKDN: u16 = 1 << 15;

/// Highest flash size a `PRx` register can describe (25 address bits).
pub const MAX_FLASH_SIZE: u32 = 1 << 25;

const PAGE_SHIFT: u32 = 12;
const PAGE_MASK: u32 = (1 << PAGE_SHIFT) - 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtectError {
    /// A base, size or flash size was not 4 KiB aligned.
    Misaligned,
    /// The protected region is empty or does not fit the flash.
    OutOfRange,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Ranges { pr0: u32, pr1: u32 },
    Locked { hsfs: u16 },
}

ringbuf!(Trace, 8, Trace::None);

bitfield! {
    /// Value of one `PRx` register.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct ProtectedRange(u32);
    impl Debug;
    /// Address bits 24:12 of the first protected byte.
    pub u16, base_field, set_base_field: 12, 0;
    pub read_protect, set_read_protect: 15;
    /// Address bits 24:12 of the last protected byte.
    pub u16, limit_field, set_limit_field: 28, 16;
    pub write_protect, set_write_protect: 31;
}

impl ProtectedRange {
    pub const DISABLED: Self = Self(0);

    /// A write-protected window covering `first..=last`, at 4 KiB
    /// granularity.
    pub fn write_protected(first: u32, last: u32) -> Self {
        let mut r = Self(0);
        r.set_base_field((first >> PAGE_SHIFT) as u16);
        r.set_limit_field((last >> PAGE_SHIFT) as u16);
        r.set_write_protect(true);
        r
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_enabled(&self) -> bool {
        self.read_protect() || self.write_protect()
    }

    /// First protected address.
    pub fn base(&self) -> u32 {
        u32::from(self.base_field()) << PAGE_SHIFT
    }

    /// First address past the protected window.
    pub fn end(&self) -> u32 {
        (u32::from(self.limit_field()) + 1) << PAGE_SHIFT
    }
}

/// Computes the two `PRx` values that write-protect everything outside the
/// non-volatile region `nv_base..nv_base + nv_size` of a `flash_size` byte
/// flash: `PR0` below it, `PR1` above it. A side with nothing to protect is
/// left disabled.
pub fn compute_ranges(
    nv_base: u32,
    nv_size: u32,
    flash_size: u32,
) -> Result<[ProtectedRange; 2], ProtectError> {
    if (nv_base | nv_size | flash_size) & PAGE_MASK != 0 {
        return Err(ProtectError::Misaligned);
    }
    let nv_end = nv_base
        .checked_add(nv_size)
        .ok_or(ProtectError::OutOfRange)?;
    if nv_size == 0 || nv_end > flash_size || flash_size > MAX_FLASH_SIZE {
        return Err(ProtectError::OutOfRange);
    }

    let below = if nv_base == 0 {
        ProtectedRange::DISABLED
    } else {
        ProtectedRange::write_protected(0, nv_base - 1)
    };
    let above = if nv_end == flash_size {
        ProtectedRange::DISABLED
    } else {
        ProtectedRange::write_protected(nv_end, flash_size - 1)
    };
    Ok([below, above])
}

/// Access to the SPI controller's register block.
pub trait SpiControllerRegs {
    fn read16(&self, offset: u16) -> u16;
    fn write16(&mut self, offset: u16, value: u16);
    fn write32(&mut self, offset: u16, value: u32);
}

/// Writes `ranges` into `PR0`/`PR1` and then sets the lock-down bit. This
/// cannot be undone before the next platform reset.
pub fn program(
    regs: &mut impl SpiControllerRegs,
    ranges: &[ProtectedRange; 2],
) {
    let [pr0, pr1] = *ranges;
    ringbuf_entry!(Trace::Ranges {
        pr0: pr0.bits(),
        pr1: pr1.bits()
    });
    regs.write32(reg::PR0, pr0.bits());
    regs.write32(reg::PR1, pr1.bits());

    let hsfs = regs.read16(reg::HSFS) | HSFS_FLOCKDN;
    regs.write16(reg::HSFS, hsfs);
    ringbuf_entry!(Trace::Locked { hsfs });
}

/// Memory-mapped SPI controller registers.
pub struct MmioSpiController {
    base: usize,
}

impl MmioSpiController {
    /// # Safety
    ///
    /// `base` must be the address of the PCH SPI controller register block,
    /// mapped for uncached access, and nothing else may be driving it.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl SpiControllerRegs for MmioSpiController {
    fn read16(&self, offset: u16) -> u16 {
        let p = (self.base + usize::from(offset)) as *const u16;
        unsafe { p.read_volatile() }
    }

    fn write16(&mut self, offset: u16, value: u16) {
        let p = (self.base + usize::from(offset)) as *mut u16;
        unsafe { p.write_volatile(value) }
    }

    fn write32(&mut self, offset: u16, value: u32) {
        let p = (self.base + usize::from(offset)) as *mut u32;
        unsafe { p.write_volatile(value) }
    }
}
