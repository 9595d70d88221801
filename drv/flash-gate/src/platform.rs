// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform plumbing: PCI configuration reads used to locate the MEI and
//! SPI controller register blocks, and halting the CPU.

use cfg_if::cfg_if;

/// A PCI function address on segment 0.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Bdf {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Bdf {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    /// Configuration mechanism #1 address for the dword holding `offset`.
    pub fn config_address(self, offset: u8) -> u32 {
        0x8000_0000
            | u32::from(self.bus) << 16
            | u32::from(self.device & 0x1f) << 11
            | u32::from(self.function & 0x7) << 8
            | u32::from(offset & 0xfc)
    }
}

pub trait ConfigSpace {
    fn read32(&self, bdf: Bdf, offset: u8) -> u32;
}

/// HECI function of the PCH.
pub const MEI_BDF: Bdf = Bdf::new(0, 22, 0);
/// LPC bridge, which holds the root complex base address.
pub const LPC_BDF: Bdf = Bdf::new(0, 31, 0);

pub const BAR0: u8 = 0x10;
pub const RCBA: u8 = 0xf0;

const BAR_MEM_MASK: u32 = 0xffff_fff0;
/// RCBA is 16 KiB aligned; bit 0 is the enable bit.
const RCBA_MASK: u32 = 0xffff_c000;
/// SPI controller register block within the root complex.
pub const SPI_OFFSET: usize = 0x3800;

/// Base of the MEI registers, from the HECI function's memory BAR.
pub fn mei_base(cfg: &impl ConfigSpace, bdf: Bdf) -> usize {
    (cfg.read32(bdf, BAR0) & BAR_MEM_MASK) as usize
}

/// Base of the SPI controller registers, inside the root complex register
/// block.
pub fn spi_controller_base(cfg: &impl ConfigSpace, bdf: Bdf) -> usize {
    (cfg.read32(bdf, RCBA) & RCBA_MASK) as usize + SPI_OFFSET
}

/// Stops the machine for good.
pub trait Halt {
    fn halt(&mut self) -> !;
}

/// Masks interrupts and parks the CPU.
#[derive(Copy, Clone, Debug, Default)]
pub struct CpuHalt;

cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        use core::arch::asm;

        impl Halt for CpuHalt {
            fn halt(&mut self) -> ! {
                unsafe { asm!("cli", options(nomem, nostack)) };
                loop {
                    unsafe { asm!("hlt", options(nomem, nostack)) };
                }
            }
        }

        const CONFIG_ADDRESS: u16 = 0xcf8;
        const CONFIG_DATA: u16 = 0xcfc;

        /// PCI configuration mechanism #1 through I/O ports.
        pub struct PortConfigSpace {
            _private: (),
        }

        impl PortConfigSpace {
            /// # Safety
            ///
            /// The caller must have I/O privilege, and nothing else may use
            /// the configuration ports concurrently.
            pub unsafe fn new() -> Self {
                Self { _private: () }
            }
        }

        impl ConfigSpace for PortConfigSpace {
            fn read32(&self, bdf: Bdf, offset: u8) -> u32 {
                let value: u32;
                unsafe {
                    asm!(
                        "out dx, eax",
                        in("dx") CONFIG_ADDRESS,
                        in("eax") bdf.config_address(offset),
                        options(nomem, nostack, preserves_flags),
                    );
                    asm!(
                        "in eax, dx",
                        in("dx") CONFIG_DATA,
                        out("eax") value,
                        options(nomem, nostack, preserves_flags),
                    );
                }
                value
            }
        }
    } else {
        impl Halt for CpuHalt {
            fn halt(&mut self) -> ! {
                loop {
                    core::hint::spin_loop();
                }
            }
        }
    }
}
