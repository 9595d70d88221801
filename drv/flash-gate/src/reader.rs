// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Segmented reader: fills the image buffer from flash, one chunk per
//! flash cycle, leaving excluded spans zeroed.

use drv_pch_spi_api::{SpiCycle, SpiError, SpiFlash, SpiRegionType};
use ringbuf::ringbuf_entry_root;

use crate::layout::{FlashLayout, LayoutError};
use crate::Trace;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// The layout failed validation; nothing was read.
    Layout(LayoutError),
    /// The image buffer is not the size of the layout.
    BadBuffer { expected: usize, actual: usize },
}

impl From<LayoutError> for ReadError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChunkFailure {
    pub offset: u32,
    pub error: SpiError,
}

/// Outcome of one pass over the flash.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadReport {
    /// Flash cycles issued.
    pub chunks: u32,
    /// Bytes successfully read.
    pub bytes: u32,
    pub failed_chunks: u32,
    pub first_failure: Option<ChunkFailure>,
}

impl ReadReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks == 0
    }
}

/// Reads every covered byte of `layout` into `image`.
///
/// The layout is validated first. Chunks that fail are zeroed and counted,
/// and the pass carries on; the resulting checksum then will not match.
pub fn read_image(
    flash: &mut impl SpiFlash,
    layout: &FlashLayout,
    region: SpiRegionType,
    image: &mut [u8],
) -> Result<ReadReport, ReadError> {
    layout.validate()?;

    let expected = layout.size as usize;
    if image.len() != expected {
        ringbuf_entry_root!(Trace::BadBuffer {
            expected,
            actual: image.len()
        });
        return Err(ReadError::BadBuffer {
            expected,
            actual: image.len(),
        });
    }

    image.fill(0);

    let mut report = ReadReport::default();
    for seg in layout.segments() {
        let actual = image.len();
        let buf = image.get_mut(seg.range()).ok_or(ReadError::BadBuffer {
            expected: seg.range().end,
            actual,
        })?;

        report.chunks += 1;
        match flash.execute(&SpiCycle::read(seg.offset, region), buf) {
            Ok(()) => report.bytes += seg.len,
            Err(error) => {
                ringbuf_entry_root!(Trace::ChunkFailed {
                    offset: seg.offset,
                    error
                });
                buf.fill(0);
                report.failed_chunks += 1;
                report.first_failure.get_or_insert(ChunkFailure {
                    offset: seg.offset,
                    error,
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Region, RegionKind, Span, DEFAULT_LAYOUT};

    /// A flash whose byte at `a` is `a as u8 ^ 0x5a`. Reads at `fail_at`
    /// deposit garbage and fail.
    struct PatternFlash {
        fail_at: Option<u32>,
        cycles: Vec<(u32, usize)>,
    }

    impl PatternFlash {
        fn new() -> Self {
            Self {
                fail_at: None,
                cycles: Vec::new(),
            }
        }
    }

    impl SpiFlash for PatternFlash {
        fn execute(
            &mut self,
            cycle: &SpiCycle,
            data: &mut [u8],
        ) -> Result<(), SpiError> {
            assert_eq!(cycle.region, SpiRegionType::Descriptor);
            assert!(!cycle.shift_out);
            self.cycles.push((cycle.address, data.len()));
            if self.fail_at == Some(cycle.address) {
                data.fill(0xee);
                return Err(SpiError::DeviceError);
            }
            for (i, b) in data.iter_mut().enumerate() {
                *b = (cycle.address as usize + i) as u8 ^ 0x5a;
            }
            Ok(())
        }
    }

    static SMALL_REGIONS: [Region; 2] = [
        Region {
            name: "head",
            kind: RegionKind::NonVolatile,
            span: Span::new(0, 0x40),
            read_chunk: 0x18,
            excluded: &[Span::new(0x10, 0x8)],
        },
        Region {
            name: "tail",
            kind: RegionKind::Boot,
            span: Span::new(0x40, 0x40),
            read_chunk: 0x40,
            excluded: &[],
        },
    ];

    static SMALL: FlashLayout = FlashLayout {
        size: 0x80,
        regions: &SMALL_REGIONS,
    };

    #[test]
    fn reads_covered_bytes_only() {
        let mut flash = PatternFlash::new();
        let mut image = [0xffu8; 0x80];

        let report = read_image(
            &mut flash,
            &SMALL,
            SpiRegionType::Descriptor,
            &mut image,
        )
        .unwrap();

        assert_eq!(
            flash.cycles,
            [(0x00, 0x10), (0x18, 0x18), (0x30, 0x10), (0x40, 0x40)]
        );
        assert_eq!(report.chunks, 4);
        assert_eq!(report.bytes, 0x78);
        assert!(report.is_complete());

        for (a, b) in image.iter().enumerate() {
            if (0x10..0x18).contains(&a) {
                assert_eq!(*b, 0, "excluded byte {a:#x}");
            } else {
                assert_eq!(*b, a as u8 ^ 0x5a, "byte {a:#x}");
            }
        }
    }

    #[test]
    fn failed_chunk_is_zeroed_and_counted() {
        let mut flash = PatternFlash::new();
        flash.fail_at = Some(0x18);
        let mut image = [0u8; 0x80];

        let report = read_image(
            &mut flash,
            &SMALL,
            SpiRegionType::Descriptor,
            &mut image,
        )
        .unwrap();

        // The pass carried on past the failure.
        assert_eq!(report.chunks, 4);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(report.bytes, 0x78 - 0x18);
        assert_eq!(
            report.first_failure,
            Some(ChunkFailure {
                offset: 0x18,
                error: SpiError::DeviceError
            })
        );
        assert!(image[0x18..0x30].iter().all(|&b| b == 0));
        assert_eq!(image[0x30], 0x30 ^ 0x5a);
        assert!(crate::__RINGBUF.lock().contains(Trace::ChunkFailed {
            offset: 0x18,
            error: SpiError::DeviceError
        }));
    }

    #[test]
    fn wrong_buffer_size_reads_nothing() {
        let mut flash = PatternFlash::new();
        let mut image = [0u8; 0x7f];
        assert_eq!(
            read_image(
                &mut flash,
                &SMALL,
                SpiRegionType::Descriptor,
                &mut image
            ),
            Err(ReadError::BadBuffer {
                expected: 0x80,
                actual: 0x7f
            })
        );
        assert!(flash.cycles.is_empty());
    }

    #[test]
    fn unvalidated_layout_reads_nothing() {
        // The second region wraps past the end of the address space.
        static WRAPPING: [Region; 2] = [
            Region {
                name: "head",
                kind: RegionKind::NonVolatile,
                span: Span::new(0, 0x100),
                read_chunk: 0x40,
                excluded: &[],
            },
            Region {
                name: "wrap",
                kind: RegionKind::Boot,
                span: Span::new(0x100, 0xffff_ff80),
                read_chunk: 0x40,
                excluded: &[],
            },
        ];
        let layout = FlashLayout {
            size: 0x100,
            regions: &WRAPPING,
        };
        let mut flash = PatternFlash::new();
        let mut image = [0u8; 0x100];

        assert_eq!(
            read_image(
                &mut flash,
                &layout,
                SpiRegionType::Descriptor,
                &mut image
            ),
            Err(ReadError::Layout(LayoutError::SizeMismatch { region: 1 }))
        );
        assert!(flash.cycles.is_empty());
    }

    #[test]
    fn default_layout_pass() {
        let mut flash = PatternFlash::new();
        let mut image = vec![0xffu8; DEFAULT_LAYOUT.size as usize];

        let report = read_image(
            &mut flash,
            &DEFAULT_LAYOUT,
            SpiRegionType::Descriptor,
            &mut image,
        )
        .unwrap();

        assert_eq!(report.chunks as usize, DEFAULT_LAYOUT.segments().count());
        assert!(flash.cycles.iter().all(|&(_, len)| len <= 256));
        // The stored checksum and the runtime areas read back as zero.
        assert_eq!(&image[0x2ffc..0x3000], &[0, 0, 0, 0]);
        assert!(image[0x33c0..0xe6000].iter().all(|&b| b == 0));
        assert!(image[0x58_0000..0x5c_0000].iter().all(|&b| b == 0));
        assert_eq!(image[0x5c_0000], 0x5a);
    }
}
