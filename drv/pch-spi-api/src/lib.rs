// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the PCH SPI flash transaction provider.
//!
//! The provider itself (the firmware's SPI protocol instance) lives outside
//! this workspace; this crate describes the one operation the boot gate
//! needs from it, a bounded flash cycle, so that drivers can be written and
//! tested against it without hardware.

#![cfg_attr(not(test), no_std)]

/// Errors that can be produced by a flash transaction provider.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpiError {
    DeviceError = 1,
    InvalidParameter,
    AccessDenied,
    Timeout,
}

/// Flash regions as understood by the PCH SPI controller. Addresses passed
/// with a region are relative to the start of that region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SpiRegionType {
    All = 0,
    Bios = 1,
    Me = 2,
    GbE = 3,
    /// The descriptor region starts at flash offset 0, so addresses in this
    /// region are flash-linear.
    Descriptor = 4,
    PlatformData = 5,
}

/// Index of the read opcode in the controller's opcode menu.
pub const OPCODE_INDEX_READ: u8 = 1;

/// One flash cycle, minus its data buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SpiCycle {
    /// Index into the controller's opcode menu.
    pub opcode_index: u8,
    /// Index into the prefix opcode table (write enable and friends).
    pub prefix_index: u8,
    /// Whether the cycle has a data phase.
    pub has_data: bool,
    /// Whether the prefix and opcode are issued as one atomic sequence.
    pub atomic: bool,
    /// Data direction; `true` shifts `data` out to the flash.
    pub shift_out: bool,
    pub address: u32,
    pub region: SpiRegionType,
}

impl SpiCycle {
    /// A data read of `data.len()` bytes at `address` in `region`.
    pub const fn read(address: u32, region: SpiRegionType) -> Self {
        Self {
            opcode_index: OPCODE_INDEX_READ,
            prefix_index: 0,
            has_data: true,
            atomic: true,
            shift_out: false,
            address,
            region,
        }
    }
}

/// A flash transaction provider.
pub trait SpiFlash {
    /// Runs one flash cycle. The byte count of the cycle is `data.len()`;
    /// for reads, `data` receives the bytes read.
    fn execute(
        &mut self,
        cycle: &SpiCycle,
        data: &mut [u8],
    ) -> Result<(), SpiError>;
}

impl<T: SpiFlash + ?Sized> SpiFlash for &mut T {
    fn execute(
        &mut self,
        cycle: &SpiCycle,
        data: &mut [u8],
    ) -> Result<(), SpiError> {
        (**self).execute(cycle, data)
    }
}
