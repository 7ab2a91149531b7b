//! Active Format Description packets (SMPTE 2016-3)

use crate::ancillary::{build_packet, pack_v210};

pub const AFD_DID: u8 = 0x41;
pub const AFD_SDID: u8 = 0x05;

/// AFD codes with a defined meaning
pub const VALID_AFD_CODES: [u8; 11] = [0, 2, 3, 4, 8, 9, 10, 11, 13, 14, 15];

pub fn is_valid_afd(code: u8) -> bool {
    VALID_AFD_CODES.contains(&code)
}

/// The 8 user data words: AFD byte, two reserved, bar data flags and two
/// 16-bit bar values, all bar fields zero.
pub fn afd_user_data(afd: u8, aspect_ratio: u8) -> [u8; 8] {
    let mut udw = [0u8; 8];
    udw[0] = ((afd & 0x0f) << 3) | ((aspect_ratio & 0x01) << 2);
    udw
}

/// Encode an AFD packet as packed v210 words
pub fn encode_afd(afd: u8, aspect_ratio: u8) -> Vec<u32> {
    pack_v210(&afd_words(afd, aspect_ratio))
}

/// The unpacked 10-bit words of an AFD packet
pub fn afd_words(afd: u8, aspect_ratio: u8) -> Vec<u16> {
    build_packet(AFD_DID, AFD_SDID, &afd_user_data(afd, aspect_ratio))
}
