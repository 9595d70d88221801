// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash region map and checksum coverage.
//!
//! The image is partitioned into contiguous regions. Within each region some
//! spans can be excluded from checksum coverage (data that legitimately
//! changes at runtime, or the stored checksum itself); everything else is
//! read in `read_chunk` sized pieces.

use static_assertions::const_assert;

/// A half-open byte range `[base, base + size)` of the flash.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Span {
    pub base: u32,
    pub size: u32,
}

impl Span {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// One past the last byte. Callers with untrusted spans should check
    /// for overflow with [`Span::checked_end`] first.
    pub const fn end(&self) -> u32 {
        self.base + self.size
    }

    pub const fn checked_end(&self) -> Option<u32> {
        self.base.checked_add(self.size)
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    Descriptor,
    Network,
    Controller,
    NonVolatile,
    Boot,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub name: &'static str,
    pub kind: RegionKind,
    pub span: Span,
    /// Bytes per flash read inside this region.
    pub read_chunk: u32,
    /// Spans left out of checksum coverage, ascending.
    pub excluded: &'static [Span],
}

impl Region {
    /// The covered parts of this region, between its excluded spans.
    pub fn readable(&self) -> impl Iterator<Item = Span> + '_ {
        let end = self.span.end();
        let mut cursor = self.span.base;
        self.excluded
            .iter()
            .map(Some)
            .chain(core::iter::once(None))
            .filter_map(move |ex| {
                let stop = ex.map_or(end, |e| e.base);
                let s = Span::new(cursor, stop.saturating_sub(cursor));
                if let Some(e) = ex {
                    cursor = e.end();
                }
                (s.size != 0).then_some(s)
            })
    }
}

/// One flash read issued by the segmented reader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub offset: u32,
    pub len: u32,
}

impl Segment {
    pub fn range(&self) -> core::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.len as usize
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LayoutError {
    /// No regions at all.
    Empty,
    /// The region starts after the end of the previous one (or after 0).
    Gap { region: usize },
    /// The region starts before the end of the previous one.
    Overlap { region: usize },
    EmptyRegion { region: usize },
    ZeroChunk { region: usize },
    /// An excluded span is empty or sticks out of its region.
    ExclusionOutsideRegion { region: usize },
    /// Excluded spans of the region are out of order or overlap.
    ExclusionOverlap { region: usize },
    /// The regions do not end exactly at the image size.
    SizeMismatch { region: usize },
    NoNonVolatileRegion,
    MultipleNonVolatileRegions { region: usize },
}

/// A flash image partitioned into regions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FlashLayout {
    pub size: u32,
    pub regions: &'static [Region],
}

impl FlashLayout {
    /// Checks the layout invariants: regions cover `0..size` exactly and in
    /// order, every region and exclusion is well formed, and exactly one
    /// region is non-volatile. Returns that region's span, which is what
    /// flash protection is derived from.
    pub fn validate(&self) -> Result<Span, LayoutError> {
        if self.regions.is_empty() {
            return Err(LayoutError::Empty);
        }

        let mut expected = 0u32;
        let mut nv = None;
        for (i, r) in self.regions.iter().enumerate() {
            if r.span.base > expected {
                return Err(LayoutError::Gap { region: i });
            }
            if r.span.base < expected {
                return Err(LayoutError::Overlap { region: i });
            }
            if r.span.size == 0 {
                return Err(LayoutError::EmptyRegion { region: i });
            }
            if r.read_chunk == 0 {
                return Err(LayoutError::ZeroChunk { region: i });
            }
            let end = match r.span.checked_end() {
                Some(end) if end <= self.size => end,
                _ => return Err(LayoutError::SizeMismatch { region: i }),
            };

            let mut floor = r.span.base;
            for ex in r.excluded {
                let inside = |e: &u32| {
                    ex.size != 0 && ex.base >= r.span.base && *e <= end
                };
                let ex_end = ex
                    .checked_end()
                    .filter(inside)
                    .ok_or(LayoutError::ExclusionOutsideRegion { region: i })?;
                if ex.base < floor {
                    return Err(LayoutError::ExclusionOverlap { region: i });
                }
                floor = ex_end;
            }

            if r.kind == RegionKind::NonVolatile {
                if nv.is_some() {
                    return Err(LayoutError::MultipleNonVolatileRegions {
                        region: i,
                    });
                }
                nv = Some(r.span);
            }
            expected = end;
        }

        if expected != self.size {
            return Err(LayoutError::SizeMismatch {
                region: self.regions.len() - 1,
            });
        }
        nv.ok_or(LayoutError::NoNonVolatileRegion)
    }

    /// The flash reads covering this layout, ascending. Only meaningful for
    /// a layout that passes [`FlashLayout::validate`].
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.regions.iter().flat_map(|r| {
            let chunk = r.read_chunk.max(1);
            r.readable().flat_map(move |span| {
                let end = span.end();
                (span.base..end).step_by(chunk as usize).map(move |offset| {
                    Segment {
                        offset,
                        len: chunk.min(end - offset),
                    }
                })
            })
        })
    }

    /// Whether `addr` is covered by the checksum.
    pub fn is_covered(&self, addr: u32) -> bool {
        self.regions.iter().any(|r| {
            r.span.contains(addr)
                && !r.excluded.iter().any(|e| e.contains(addr))
        })
    }

    pub fn region_of(&self, addr: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.span.contains(addr))
    }
}

/// Size of the default image, 8 MiB.
pub const IMAGE_SIZE: u32 = 0x80_0000;

/// Where the reference checksum is stored, little-endian.
pub const REFERENCE_OFFSET: u32 = 0x2ffc;

const READ_CHUNK: u32 = 256;

const DESCRIPTOR: Span = Span::new(0x00_0000, 0x00_1000);
const GBE: Span = Span::new(0x00_1000, 0x00_2000);
const ME: Span = Span::new(0x00_3000, 0x57_d000);
const NVRAM: Span = Span::new(0x58_0000, 0x04_0000);
const BIOS: Span = Span::new(0x5c_0000, 0x24_0000);

/// The part of the ME region rewritten at runtime.
const ME_VOLATILE: Span = Span::new(0x00_33c0, 0x0e_2c40);

const_assert!(GBE.base == DESCRIPTOR.end());
const_assert!(ME.base == GBE.end());
const_assert!(NVRAM.base == ME.end());
const_assert!(BIOS.base == NVRAM.end());
const_assert!(BIOS.end() == IMAGE_SIZE);
const_assert!(ME_VOLATILE.base > ME.base && ME_VOLATILE.end() < ME.end());
const_assert!(NVRAM.base % 0x1000 == 0 && NVRAM.size % 0x1000 == 0);
// The stored checksum is not part of its own coverage.
const_assert!(
    REFERENCE_OFFSET >= GBE.base && REFERENCE_OFFSET + 4 <= GBE.end()
);

pub const DEFAULT_LAYOUT: FlashLayout = FlashLayout {
    size: IMAGE_SIZE,
    regions: &[
        Region {
            name: "descriptor",
            kind: RegionKind::Descriptor,
            span: DESCRIPTOR,
            read_chunk: READ_CHUNK,
            excluded: &[],
        },
        Region {
            name: "gbe",
            kind: RegionKind::Network,
            span: GBE,
            read_chunk: READ_CHUNK,
            excluded: &[GBE],
        },
        Region {
            name: "me",
            kind: RegionKind::Controller,
            span: ME,
            read_chunk: READ_CHUNK,
            excluded: &[ME_VOLATILE],
        },
        Region {
            name: "nvram",
            kind: RegionKind::NonVolatile,
            span: NVRAM,
            read_chunk: READ_CHUNK,
            excluded: &[NVRAM],
        },
        Region {
            name: "bios",
            kind: RegionKind::Boot,
            span: BIOS,
            read_chunk: READ_CHUNK,
            excluded: &[],
        },
    ],
};
