// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reference checksum retrieval and comparison.

use drv_pch_spi_api::{SpiCycle, SpiError, SpiFlash, SpiRegionType};

/// Reads the little-endian reference checksum stored at `offset`.
pub fn read_reference(
    flash: &mut impl SpiFlash,
    offset: u32,
    region: SpiRegionType,
) -> Result<u32, SpiError> {
    let mut buf = [0u8; 4];
    flash.execute(&SpiCycle::read(offset, region), &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// A 32-bit checksum over the whole image buffer.
pub trait Checksum {
    fn checksum(&self, data: &[u8]) -> u32;
}

impl<F: Fn(&[u8]) -> u32 + ?Sized> Checksum for F {
    fn checksum(&self, data: &[u8]) -> u32 {
        self(data)
    }
}

/// CRC-32/ISO-HDLC, the CRC-32 of Ethernet and zlib, and what firmware
/// `CalculateCrc32` services compute.
#[derive(Copy, Clone, Debug, Default)]
pub struct Crc32;

static CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

impl Checksum for Crc32 {
    fn checksum(&self, data: &[u8]) -> u32 {
        CRC32.checksum(data)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Match { checksum: u32 },
    Mismatch { reference: u32, computed: u32 },
}

impl Verdict {
    pub fn compare(reference: u32, computed: u32) -> Self {
        if reference == computed {
            Verdict::Match { checksum: computed }
        } else {
            Verdict::Mismatch {
                reference,
                computed,
            }
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Match { .. })
    }

    /// The checksum of the image as read.
    pub fn computed(&self) -> u32 {
        match *self {
            Verdict::Match { checksum } => checksum,
            Verdict::Mismatch { computed, .. } => computed,
        }
    }
}
