// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host side of the MEI (HECI) circular buffer link to the management
//! engine.
//!
//! Only what the boot gate needs is here: bringing the link to ready,
//! resetting it when the host buffer is too full, and pushing one
//! single-frame message into the host circular buffer. Nothing is ever read
//! back from the ME.

#![cfg_attr(not(test), no_std)]

use ringbuf::{ringbuf, ringbuf_entry};

pub mod msg;
pub mod regs;

pub use msg::{capability_disable, MeiHeader, MeiMessage, MkhiHeader};
pub use regs::{HostCsr, MeiRegs, MmioMei, Reg};

/// Default number of register polls before a wait is abandoned.
pub const POLL_BUDGET: u32 = 1_000_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeiError {
    /// The link did not report ready within the poll budget.
    LinkTimeout,
    /// The host buffer cannot hold the message, even after a reset.
    NoRoom { needed: usize, free: usize },
    /// The message length does not fit the header's length field.
    MessageTooLarge,
}

/// Last known state of the link, for diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    LinkDown,
    LinkReady,
    Resetting,
    MessageInFlight,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    ReadyTimeout { csr: u32 },
    Reset,
    NoRoom { needed: usize, free: usize },
    Sent { words: usize },
}

ringbuf!(Trace, 16, Trace::None);

/// Calls `predicate` up to `max_attempts` times, stopping at the first
/// `true`. Returns whether it ever held.
pub fn poll(mut predicate: impl FnMut() -> bool, max_attempts: u32) -> bool {
    (0..max_attempts).any(|_| predicate())
}

pub struct Mei<R: MeiRegs> {
    regs: R,
    budget: u32,
    state: LinkState,
}

impl<R: MeiRegs> Mei<R> {
    pub fn new(regs: R, budget: u32) -> Self {
        Self {
            regs,
            budget,
            state: LinkState::LinkDown,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn into_inner(self) -> R {
        self.regs
    }

    fn csr(&self) -> HostCsr {
        HostCsr::from_bits(self.regs.read(Reg::HostCsr))
    }

    fn update_csr(&mut self, f: impl FnOnce(&mut HostCsr)) {
        let mut csr = self.csr();
        f(&mut csr);
        self.regs.write(Reg::HostCsr, csr.bits());
    }

    fn poll_csr(&self, f: impl Fn(&HostCsr) -> bool) -> Result<(), MeiError> {
        let regs = &self.regs;
        let check = || f(&HostCsr::from_bits(regs.read(Reg::HostCsr)));
        if poll(check, self.budget) {
            Ok(())
        } else {
            ringbuf_entry!(Trace::ReadyTimeout {
                csr: self.csr().bits()
            });
            Err(MeiError::LinkTimeout)
        }
    }

    /// Waits for the host side of the link to report ready and out of
    /// reset.
    pub fn wait_ready(&mut self) -> Result<(), MeiError> {
        match self.poll_csr(HostCsr::link_usable) {
            Ok(()) => {
                self.state = LinkState::LinkReady;
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::LinkDown;
                Err(e)
            }
        }
    }

    /// Resets the link, which empties the host circular buffer.
    pub fn reset(&mut self) -> Result<(), MeiError> {
        ringbuf_entry!(Trace::Reset);
        self.wait_ready()?;

        self.state = LinkState::Resetting;
        self.update_csr(|csr| {
            csr.set_reset(true);
            csr.set_interrupt_generate(true);
        });

        // The reset bit is still ours to clear, so only ready counts here.
        if let Err(e) = self.poll_csr(HostCsr::ready) {
            self.state = LinkState::LinkDown;
            return Err(e);
        }

        self.update_csr(|csr| {
            csr.set_interrupt_generate(true);
            csr.set_ready(true);
            csr.set_reset(false);
        });
        self.state = LinkState::LinkReady;
        Ok(())
    }

    /// Writes `msg` into the host circular buffer and signals the ME.
    ///
    /// Nothing is written unless the link is usable. If the buffer is too
    /// full the link is reset once; a message that still does not fit is
    /// refused without writing anything.
    pub fn send(&mut self, msg: &MeiMessage<'_>) -> Result<(), MeiError> {
        let needed = msg.word_count();
        self.wait_ready()?;

        let mut free = self.csr().free_slots();
        if free < needed {
            ringbuf_entry!(Trace::NoRoom { needed, free });
            self.reset()?;
            free = self.csr().free_slots();
        }
        if free < needed {
            ringbuf_entry!(Trace::NoRoom { needed, free });
            return Err(MeiError::NoRoom { needed, free });
        }

        self.state = LinkState::MessageInFlight;
        for word in msg.words() {
            self.regs.write(Reg::HostCbWw, word);
        }
        self.update_csr(|csr| csr.set_interrupt_generate(true));
        ringbuf_entry!(Trace::Sent { words: needed });

        self.wait_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// A host CSR and circular buffer. `ready_after` is the number of CSR
    /// reads before ready is reported; `None` is never.
    struct FakeMe {
        depth: u8,
        write_ptr: u8,
        ready_after: Option<u32>,
        reset_reclaims: bool,
        /// Ready drops for as long as the reset bit is held.
        unready_in_reset: bool,
        reads: Cell<u32>,
        in_reset: bool,
        words: Vec<u32>,
        csr_writes: Vec<HostCsr>,
    }

    impl FakeMe {
        fn new(depth: u8, write_ptr: u8) -> Self {
            Self {
                depth,
                write_ptr,
                ready_after: Some(0),
                reset_reclaims: true,
                unready_in_reset: false,
                reads: Cell::new(0),
                in_reset: false,
                words: Vec::new(),
                csr_writes: Vec::new(),
            }
        }

        fn resets(&self) -> usize {
            self.csr_writes.iter().filter(|c| c.reset()).count()
        }
    }

    impl MeiRegs for FakeMe {
        fn read(&self, reg: Reg) -> u32 {
            assert_eq!(reg, Reg::HostCsr);
            let n = self.reads.get();
            self.reads.set(n + 1);

            let mut csr = HostCsr::from_bits(0);
            csr.set_depth(self.depth);
            csr.set_write_ptr(self.write_ptr);
            csr.set_ready(
                self.ready_after.is_some_and(|r| n >= r)
                    && !(self.in_reset && self.unready_in_reset),
            );
            csr.set_reset(self.in_reset);
            csr.bits()
        }

        fn write(&mut self, reg: Reg, value: u32) {
            match reg {
                Reg::HostCbWw => {
                    assert!(
                        self.write_ptr < self.depth,
                        "circular buffer overflow"
                    );
                    self.words.push(value);
                    self.write_ptr += 1;
                }
                Reg::HostCsr => {
                    let csr = HostCsr::from_bits(value);
                    if csr.reset() && self.reset_reclaims {
                        self.write_ptr = 0;
                    }
                    self.in_reset = csr.reset();
                    self.csr_writes.push(csr);
                }
                r => panic!("unexpected write to {r:?}"),
            }
        }
    }

    fn eight_word_message(payload: &[u32; 6]) -> MeiMessage<'_> {
        MeiMessage::new(7, 0, MkhiHeader::request(1, 1), payload).unwrap()
    }

    #[test]
    fn poll_stops_at_first_success() {
        let mut calls = 0;
        assert!(poll(
            || {
                calls += 1;
                calls == 3
            },
            10
        ));
        assert_eq!(calls, 3);
    }

    #[test]
    fn poll_gives_up_after_budget() {
        let mut calls = 0;
        assert!(!poll(
            || {
                calls += 1;
                false
            },
            5
        ));
        assert_eq!(calls, 5);
        assert!(!poll(|| true, 0));
    }

    #[test]
    fn send_with_room() {
        let mut mei = Mei::new(FakeMe::new(64, 0), 10);
        assert_eq!(mei.state(), LinkState::LinkDown);

        mei.send(&capability_disable()).unwrap();
        assert_eq!(mei.state(), LinkState::LinkReady);

        let fake = mei.into_inner();
        assert_eq!(fake.words, [0x8008_0007, 0x0000_0303, 6]);
        assert_eq!(fake.write_ptr, 3);
        assert_eq!(fake.resets(), 0);
        let last = fake.csr_writes.last().unwrap();
        assert!(last.interrupt_generate());
        assert_eq!(fake.csr_writes.len(), 1);
    }

    #[test]
    fn short_buffer_is_reset_then_sent() {
        let payload = [1, 2, 3, 4, 5, 6];
        let mut mei = Mei::new(FakeMe::new(64, 60), 10);

        mei.send(&eight_word_message(&payload)).unwrap();

        let fake = mei.into_inner();
        assert_eq!(fake.resets(), 1);
        assert_eq!(fake.words.len(), 8);
        assert_eq!(&fake.words[2..], &payload);
        assert_eq!(fake.write_ptr, 8);
    }

    #[test]
    fn reset_without_reclaim_is_no_room() {
        let payload = [0; 6];
        let mut fake = FakeMe::new(64, 60);
        fake.reset_reclaims = false;
        let mut mei = Mei::new(fake, 10);

        assert_eq!(
            mei.send(&eight_word_message(&payload)),
            Err(MeiError::NoRoom { needed: 8, free: 4 })
        );

        let fake = mei.into_inner();
        assert_eq!(fake.resets(), 1);
        assert!(fake.words.is_empty());
        assert!(__RINGBUF
            .lock()
            .contains(Trace::NoRoom { needed: 8, free: 4 }));
    }

    #[test]
    fn message_deeper_than_buffer_never_fits() {
        let payload = [0; 6];
        let mut mei = Mei::new(FakeMe::new(4, 0), 10);
        assert_eq!(
            mei.send(&eight_word_message(&payload)),
            Err(MeiError::NoRoom { needed: 8, free: 4 })
        );
        assert!(mei.regs().words.is_empty());
    }

    #[test]
    fn reset_sequence() {
        let mut mei = Mei::new(FakeMe::new(64, 10), 10);
        mei.reset().unwrap();
        assert_eq!(mei.state(), LinkState::LinkReady);

        let writes = &mei.regs().csr_writes;
        assert_eq!(writes.len(), 2);
        assert!(writes[0].reset() && writes[0].interrupt_generate());
        assert!(!writes[1].reset());
        assert!(writes[1].ready() && writes[1].interrupt_generate());
        let csr = HostCsr::from_bits(mei.regs().read(Reg::HostCsr));
        assert!(csr.link_usable());
    }

    #[test]
    fn ready_after_a_few_polls() {
        let mut fake = FakeMe::new(64, 0);
        fake.ready_after = Some(5);
        let mut mei = Mei::new(fake, 10);
        mei.wait_ready().unwrap();
        assert_eq!(mei.regs().reads.get(), 6);
    }

    #[test]
    fn never_ready_writes_nothing() {
        let mut fake = FakeMe::new(64, 0);
        fake.ready_after = None;
        let mut mei = Mei::new(fake, 100);

        assert_eq!(
            mei.send(&capability_disable()),
            Err(MeiError::LinkTimeout)
        );
        assert_eq!(mei.state(), LinkState::LinkDown);
        // The poll budget, then the trace entry.
        assert_eq!(mei.regs().reads.get(), 100 + 1);
        assert!(mei.regs().words.is_empty());
        assert!(mei.regs().csr_writes.is_empty());
    }

    #[test]
    fn link_held_in_reset_is_not_usable() {
        let mut fake = FakeMe::new(64, 0);
        fake.in_reset = true;
        let mut mei = Mei::new(fake, 10);

        assert_eq!(
            mei.send(&capability_disable()),
            Err(MeiError::LinkTimeout)
        );
        assert!(mei.regs().words.is_empty());
    }

    #[test]
    fn ready_lost_during_reset_abandons_it() {
        let mut fake = FakeMe::new(64, 10);
        fake.unready_in_reset = true;
        let mut mei = Mei::new(fake, 10);

        assert_eq!(mei.reset(), Err(MeiError::LinkTimeout));
        assert_eq!(mei.state(), LinkState::LinkDown);

        // Only the write asserting reset; it is never released.
        let writes = &mei.regs().csr_writes;
        assert_eq!(writes.len(), 1);
        assert!(writes[0].reset());
    }

    #[test]
    fn exact_fit_is_sent_without_reset() {
        let mut mei = Mei::new(FakeMe::new(64, 61), 10);

        mei.send(&capability_disable()).unwrap();

        let fake = mei.into_inner();
        assert_eq!(fake.resets(), 0);
        assert_eq!(fake.words, [0x8008_0007, 0x0000_0303, 6]);
        assert_eq!(fake.write_ptr, 64);
    }

    #[test]
    fn never_ready_abandons_reset() {
        let payload = [0; 6];
        let mut fake = FakeMe::new(64, 60);
        fake.ready_after = None;
        let mut mei = Mei::new(fake, 100);

        assert_eq!(
            mei.send(&eight_word_message(&payload)),
            Err(MeiError::LinkTimeout)
        );
        let fake = mei.into_inner();
        assert!(fake.csr_writes.is_empty());
        assert!(fake.words.is_empty());
    }
}
