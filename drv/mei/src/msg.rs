// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MEI message framing and the MKHI notifications built on it.

use bitfield::bitfield;
use static_assertions::const_assert;

use crate::MeiError;

bitfield! {
    /// Transport header, the first word of every message.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct MeiHeader(u32);
    impl Debug;
    pub u8, client_address, set_client_address: 7, 0;
    pub u8, host_address, set_host_address: 15, 8;
    /// Bytes following this header.
    pub u16, length, set_length: 24, 16;
    pub is_complete, set_is_complete: 31;
}

impl MeiHeader {
    pub const MAX_LENGTH: u16 = 0x1ff;

    pub fn bits(&self) -> u32 {
        self.0
    }
}

bitfield! {
    /// Management engine kernel host interface header.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct MkhiHeader(u32);
    impl Debug;
    pub u8, group_id, set_group_id: 7, 0;
    pub u8, command, set_command: 14, 8;
    pub is_response, set_is_response: 15;
    pub u8, result, set_result: 31, 24;
}

impl MkhiHeader {
    /// A request header; `is_response` and `result` are zero.
    pub fn request(group_id: u8, command: u8) -> Self {
        let mut h = Self(0);
        h.set_group_id(group_id);
        h.set_command(command);
        h
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Size of the MKHI header in bytes.
pub const MKHI_HEADER_LEN: usize = 4;

/// ME address of the MKHI client.
pub const MKHI_CLIENT: u8 = 7;
/// Host address used for fire-and-forget requests.
pub const HOST_ADDRESS: u8 = 0;

pub const MKHI_GROUP_FWCAPS: u8 = 3;
pub const MKHI_FWCAPS_SET_STATE: u8 = 3;
/// Capability selector carried by [`capability_disable`].
pub const FWCAPS_DISABLE_SELECTOR: u32 = 6;

const CAPABILITY_DISABLE_PAYLOAD: [u32; 1] = [FWCAPS_DISABLE_SELECTOR];

const_assert!(
    MKHI_HEADER_LEN + 4 * CAPABILITY_DISABLE_PAYLOAD.len()
        <= MeiHeader::MAX_LENGTH as usize
);

/// One single-frame message: MEI header, MKHI header, then payload words.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeiMessage<'a> {
    header: MeiHeader,
    mkhi: MkhiHeader,
    payload: &'a [u32],
}

impl<'a> MeiMessage<'a> {
    pub fn new(
        client: u8,
        host: u8,
        mkhi: MkhiHeader,
        payload: &'a [u32],
    ) -> Result<Self, MeiError> {
        let length = payload
            .len()
            .checked_mul(4)
            .and_then(|n| n.checked_add(MKHI_HEADER_LEN))
            .filter(|&n| n <= usize::from(MeiHeader::MAX_LENGTH))
            .ok_or(MeiError::MessageTooLarge)?;

        let mut header = MeiHeader(0);
        header.set_client_address(client);
        header.set_host_address(host);
        header.set_length(length as u16);
        header.set_is_complete(true);

        Ok(Self {
            header,
            mkhi,
            payload,
        })
    }

    pub fn header(&self) -> MeiHeader {
        self.header
    }

    pub fn mkhi(&self) -> MkhiHeader {
        self.mkhi
    }

    /// Circular buffer slots the message occupies, header included.
    pub fn word_count(&self) -> usize {
        1 + usize::from(self.header.length()).div_ceil(4)
    }

    /// The words to write, in order.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        [self.header.bits(), self.mkhi.bits()]
            .into_iter()
            .chain(self.payload.iter().copied())
    }
}

/// The fixed notification asking the ME to disable its optional
/// capability. No response is expected.
pub fn capability_disable() -> MeiMessage<'static> {
    let mkhi = MkhiHeader::request(MKHI_GROUP_FWCAPS, MKHI_FWCAPS_SET_STATE);
    let mut header = MeiHeader(0);
    header.set_client_address(MKHI_CLIENT);
    header.set_host_address(HOST_ADDRESS);
    header.set_length(
        (MKHI_HEADER_LEN + 4 * CAPABILITY_DISABLE_PAYLOAD.len()) as u16,
    );
    header.set_is_complete(true);
    MeiMessage {
        header,
        mkhi,
        payload: &CAPABILITY_DISABLE_PAYLOAD,
    }
}
