// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The gate sequence.

use core::fmt;

use drv_mei::{capability_disable, Mei, MeiError, MeiRegs, MmioMei};
use drv_pch_spi_api::{SpiFlash, SpiRegionType};
use drv_pch_spi_protect::{
    compute_ranges, program, MmioSpiController, ProtectError,
    ProtectedRange, SpiControllerRegs,
};
use ringbuf::ringbuf_entry_root;

use crate::layout::{
    FlashLayout, LayoutError, DEFAULT_LAYOUT, REFERENCE_OFFSET,
};
use crate::platform::{
    mei_base, spi_controller_base, Bdf, ConfigSpace, CpuHalt, Halt, LPC_BDF,
    MEI_BDF,
};
use crate::reader::{read_image, ReadError, ReadReport};
use crate::verify::{read_reference, Checksum, Crc32, Verdict};
use crate::Trace;

#[derive(Copy, Clone, Debug)]
pub struct GateConfig {
    pub layout: FlashLayout,
    /// Flash offset of the stored reference checksum.
    pub reference_offset: u32,
    /// Region all flash cycles are issued against. The descriptor region
    /// starts at flash offset 0, so its addresses are flash-linear.
    pub read_region: SpiRegionType,
    pub mei_poll_budget: u32,
    pub mei_bdf: Bdf,
    pub lpc_bdf: Bdf,
}

impl GateConfig {
    pub const DEFAULT: Self = Self {
        layout: DEFAULT_LAYOUT,
        reference_offset: REFERENCE_OFFSET,
        read_region: SpiRegionType::Descriptor,
        mei_poll_budget: drv_mei::POLL_BUDGET,
        mei_bdf: MEI_BDF,
        lpc_bdf: LPC_BDF,
    };
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GateError {
    Layout(LayoutError),
    Protect(ProtectError),
    Read(ReadError),
    /// Every provider failed to read the reference checksum.
    NoFlashProvider,
}

impl From<LayoutError> for GateError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

impl From<ProtectError> for GateError {
    fn from(e: ProtectError) -> Self {
        Self::Protect(e)
    }
}

impl From<ReadError> for GateError {
    fn from(e: ReadError) -> Self {
        Self::Read(e)
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Layout(e) | Self::Read(ReadError::Layout(e)) => {
                write!(f, "bad flash layout: {e:?}")
            }
            Self::Protect(e) => write!(f, "bad protected range: {e:?}"),
            Self::Read(ReadError::BadBuffer { expected, actual }) => {
                write!(f, "image buffer is {actual} bytes, expected {expected}")
            }
            Self::NoFlashProvider => write!(f, "no flash provider available"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GateReport {
    pub verdict: Verdict,
    pub read: ReadReport,
    /// Outcome of the capability-disable notification. Never fatal.
    pub notify: Result<(), MeiError>,
    /// What was programmed into `PR0`/`PR1`.
    pub protection: [ProtectedRange; 2],
}

/// Runs the gate sequence up to, but not including, the boot decision.
///
/// The first provider able to read the reference checksum is used for the
/// whole pass. Protection is programmed whatever the verdict, once the
/// image has been read.
pub fn run<I, C, R, S, W>(
    config: &GateConfig,
    providers: I,
    image: &mut [u8],
    checksum: &C,
    mei: &mut Mei<R>,
    spi: &mut S,
    console: &mut W,
) -> Result<GateReport, GateError>
where
    I: IntoIterator,
    I::Item: SpiFlash,
    C: Checksum + ?Sized,
    R: MeiRegs,
    S: SpiControllerRegs,
    W: fmt::Write,
{
    ringbuf_entry_root!(Trace::Start);
    let layout = &config.layout;
    let nv = layout.validate()?;
    let protection = compute_ranges(nv.base, nv.size, layout.size)?;

    // Console output is best effort.
    let _ = writeln!(console, "Calculating image checksum...");

    let mut selected = None;
    for (index, mut flash) in providers.into_iter().enumerate() {
        match read_reference(
            &mut flash,
            config.reference_offset,
            config.read_region,
        ) {
            Ok(reference) => {
                ringbuf_entry_root!(Trace::ProviderSelected {
                    index,
                    reference
                });
                selected = Some((flash, reference));
                break;
            }
            Err(error) => {
                ringbuf_entry_root!(Trace::ProviderFailed { index, error });
            }
        }
    }
    let (mut flash, reference) =
        selected.ok_or(GateError::NoFlashProvider)?;

    let read = read_image(&mut flash, layout, config.read_region, image)?;
    ringbuf_entry_root!(Trace::ReadDone {
        chunks: read.chunks,
        failed: read.failed_chunks
    });

    let computed = checksum.checksum(image);
    ringbuf_entry_root!(Trace::Computed(computed));

    let notify = mei.send(&capability_disable());
    if let Err(e) = notify {
        ringbuf_entry_root!(Trace::NotifyFailed(e));
    }

    program(spi, &protection);

    let verdict = Verdict::compare(reference, computed);
    ringbuf_entry_root!(Trace::Verdict(verdict));

    Ok(GateReport {
        verdict,
        read,
        notify,
        protection,
    })
}

/// Makes the boot decision: returns the report if the image checked out,
/// otherwise reports on `console` and never returns.
pub fn enforce(
    result: Result<GateReport, GateError>,
    console: &mut impl fmt::Write,
    halt: &mut impl Halt,
) -> GateReport {
    match result {
        Ok(report) => match report.verdict {
            Verdict::Match { checksum } => {
                let _ = writeln!(
                    console,
                    "Image checksum is good ({checksum:#010x})! Loading..."
                );
                report
            }
            Verdict::Mismatch { computed, .. } => {
                let _ = writeln!(
                    console,
                    "Bad image checksum ({computed:#010x})! System halted!"
                );
                halt.halt()
            }
        },
        Err(e) => {
            ringbuf_entry_root!(Trace::Failed(e));
            let _ = writeln!(
                console,
                "Image verification failed ({e})! System halted!"
            );
            halt.halt()
        }
    }
}

/// Runs the gate against the real hardware: discovers the MEI and SPI
/// controller register blocks through `cfg`, verifies with CRC-32, and
/// halts the CPU unless the image is good.
///
/// # Safety
///
/// Must run single-threaded during boot with the MEI BAR and root complex
/// register block mapped uncached, and with nothing else driving the MEI
/// link or the SPI controller.
pub unsafe fn gate_main<I, W>(
    config: &GateConfig,
    cfg: &impl ConfigSpace,
    providers: I,
    image: &mut [u8],
    console: &mut W,
) -> GateReport
where
    I: IntoIterator,
    I::Item: SpiFlash,
    W: fmt::Write,
{
    let regs = unsafe { MmioMei::new(mei_base(cfg, config.mei_bdf)) };
    let mut mei = Mei::new(regs, config.mei_poll_budget);
    let mut spi = unsafe {
        MmioSpiController::new(spi_controller_base(cfg, config.lpc_bdf))
    };

    let result =
        run(config, providers, image, &Crc32, &mut mei, &mut spi, console);
    enforce(result, console, &mut CpuHalt)
}
