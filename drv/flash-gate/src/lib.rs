// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-time flash integrity gate.
//!
//! Before handing control to the boot firmware, the whole flash image is read
//! into memory (skipping spans that change at runtime), checksummed and
//! compared against the reference value stored in the image. Along the way
//! the management engine is told to disable its optional capability and the
//! SPI controller is locked so that only the non-volatile variable store
//! stays writable. A mismatch halts the machine.
//!
//! The pieces are usable on their own:
//!
//! - [`layout`]: the region map and which bytes are covered;
//! - [`reader`]: the chunked flash read into the image buffer;
//! - [`verify`]: reference checksum and comparison;
//! - [`platform`]: PCI discovery of register blocks, and halting;
//! - [`gate`]: the sequence tying it together.

#![cfg_attr(not(test), no_std)]

use drv_mei::MeiError;
use drv_pch_spi_api::SpiError;
use ringbuf::ringbuf;

pub mod gate;
pub mod layout;
pub mod platform;
pub mod reader;
pub mod verify;

pub use gate::{enforce, gate_main, run, GateConfig, GateError, GateReport};
pub use layout::{FlashLayout, LayoutError, Region, RegionKind, Span};
pub use reader::{read_image, ReadError, ReadReport};
pub use verify::{read_reference, Checksum, Crc32, Verdict};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Start,
    BadBuffer { expected: usize, actual: usize },
    ChunkFailed { offset: u32, error: SpiError },
    ProviderFailed { index: usize, error: SpiError },
    ProviderSelected { index: usize, reference: u32 },
    ReadDone { chunks: u32, failed: u32 },
    Computed(u32),
    NotifyFailed(MeiError),
    Verdict(Verdict),
    Failed(GateError),
}

ringbuf!(Trace, 32, Trace::None);
