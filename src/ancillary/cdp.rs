//! CEA-708 Caption Distribution Packets (SMPTE 334)
//!
//! The only stateful piece of ancillary encoding: every CDP carries a
//! 16-bit sequence counter, repeated in header and footer, that wraps.

use crate::ancillary::{build_packet, pack_v210};
use crate::constants::MAX_CC_TRIPLETS;

pub const CDP_DID: u8 = 0x61;
pub const CDP_SDID: u8 = 0x01;

const CDP_HEADER_ID: [u8; 2] = [0x96, 0x69];
const CDP_FOOTER_ID: u8 = 0x74;
const CCDATA_ID: u8 = 0x72;
/// cc_data_present | caption_service_active | reserved
const CDP_FLAGS: u8 = 0x43;

/// CDP frame rate code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdpFrameRate {
    Fps23_976 = 1,
    Fps24 = 2,
    Fps25 = 3,
    Fps29_97 = 4,
    Fps30 = 5,
    Fps50 = 6,
    Fps59_94 = 7,
    Fps60 = 8,
}

impl CdpFrameRate {
    /// Rate for a frame lasting `frame_duration / timescale` seconds
    pub fn from_timescale(timescale: u64, frame_duration: u64) -> Option<Self> {
        if timescale == 0 || frame_duration == 0 {
            return None;
        }
        let g = gcd(timescale, frame_duration);
        match (timescale / g, frame_duration / g) {
            (24000, 1001) => Some(Self::Fps23_976),
            (24, 1) => Some(Self::Fps24),
            (25, 1) => Some(Self::Fps25),
            (30000, 1001) => Some(Self::Fps29_97),
            (30, 1) => Some(Self::Fps30),
            (50, 1) => Some(Self::Fps50),
            (60000, 1001) => Some(Self::Fps59_94),
            (60, 1) => Some(Self::Fps60),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// CDP encoder carrying the packet sequence counter across frames
#[derive(Debug, Default)]
pub struct CdpEncoder {
    sequence: u16,
}

impl CdpEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter the next packet will carry
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Build the CDP bytes for `cc_data` (3-byte triplets, at most
    /// [`MAX_CC_TRIPLETS`] used). Returns `None` when there is nothing to
    /// carry or the rate has no CDP code.
    pub fn cdp_bytes(&mut self, cc_data: &[u8], rate: Option<CdpFrameRate>) -> Option<Vec<u8>> {
        let count = (cc_data.len() / 3).min(MAX_CC_TRIPLETS);
        if count == 0 {
            return None;
        }
        let Some(rate) = rate else {
            tracing::debug!("No CDP frame rate code, omitting captions");
            return None;
        };

        // header 9 + triplets + footer 4 (id, counter, checksum)
        let cdp_len = 9 + 3 * count + 4;
        let [seq_hi, seq_lo] = self.sequence.to_be_bytes();

        let mut cdp = Vec::with_capacity(cdp_len);
        cdp.extend_from_slice(&CDP_HEADER_ID);
        cdp.push(cdp_len as u8);
        cdp.push((rate.code() << 4) | 0x0f);
        cdp.push(CDP_FLAGS);
        cdp.extend_from_slice(&[seq_hi, seq_lo]);
        cdp.push(CCDATA_ID);
        cdp.push(0xe0 | count as u8);
        cdp.extend_from_slice(&cc_data[..3 * count]);
        cdp.extend_from_slice(&[CDP_FOOTER_ID, seq_hi, seq_lo]);

        let sum = cdp.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        cdp.push(sum.wrapping_neg());

        self.sequence = self.sequence.wrapping_add(1);
        Some(cdp)
    }

    /// The unpacked 10-bit words of a caption packet
    pub fn encode_words(&mut self, cc_data: &[u8], rate: Option<CdpFrameRate>) -> Option<Vec<u16>> {
        let cdp = self.cdp_bytes(cc_data, rate)?;
        Some(build_packet(CDP_DID, CDP_SDID, &cdp))
    }

    /// Encode a caption packet as packed v210 words
    pub fn encode(&mut self, cc_data: &[u8], rate: Option<CdpFrameRate>) -> Option<Vec<u32>> {
        self.encode_words(cc_data, rate).map(|w| pack_v210(&w))
    }
}
