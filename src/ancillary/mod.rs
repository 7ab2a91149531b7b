//! Ancillary data (VANC) packets
//!
//! Builds SMPTE 291 style packets as 10-bit words and packs them into the
//! v210 layout expected in a vertical blanking line:
//!
//! ```text
//!  ADF 000 3FF 3FF | DID | SDID | DC | UDW ... | CS | 040 filler...
//!                  └──── parity marked ─────┘
//! ```
//!
//! Six 10-bit words go into four little-endian 32-bit words, the words
//! landing in the luma positions of a 4:2:2 group.

pub mod afd;
pub mod cdp;

pub use afd::encode_afd;
pub use cdp::{CdpEncoder, CdpFrameRate};

/// Ancillary data flag opening every packet
pub const ADF: [u16; 3] = [0x000, 0x3ff, 0x3ff];

/// Word used to pad a packet to a whole v210 group
pub const FILLER: u16 = 0x040;

/// Source words per v210 group
pub const GROUP_WORDS: usize = 6;

/// Mark bit 8 on odd parity of the low byte, bit 9 on even parity
pub fn with_parity(word: u16) -> u16 {
    let data = word & 0xff;
    if data.count_ones() % 2 == 1 {
        data | 0x100
    } else {
        data | 0x200
    }
}

/// Checksum word over parity-marked words
///
/// 9-bit sum, with bit 9 set to the inverse of bit 8.
pub fn checksum(words: &[u16]) -> u16 {
    let sum = words.iter().fold(0u16, |acc, w| (acc + (w & 0x1ff)) & 0x1ff);
    sum | ((!sum & 0x100) << 1)
}

/// Assemble a complete packet: ADF, parity-marked header and user data,
/// checksum, then filler up to a multiple of [`GROUP_WORDS`].
pub fn build_packet(did: u8, sdid: u8, user_data: &[u8]) -> Vec<u16> {
    let len = ADF.len() + 3 + user_data.len() + 1;
    let mut words = Vec::with_capacity(len.div_ceil(GROUP_WORDS) * GROUP_WORDS);
    words.extend_from_slice(&ADF);

    words.push(with_parity(did as u16));
    words.push(with_parity(sdid as u16));
    words.push(with_parity(user_data.len() as u16));
    words.extend(user_data.iter().map(|&b| with_parity(b as u16)));
    words.push(checksum(&words[ADF.len()..]));

    words.resize(len.div_ceil(GROUP_WORDS) * GROUP_WORDS, FILLER);
    words
}

/// Pack 10-bit words into v210 groups. A trailing partial group is padded
/// with filler.
pub fn pack_v210(words: &[u16]) -> Vec<u32> {
    words
        .chunks(GROUP_WORDS)
        .flat_map(|chunk| {
            let mut g = [FILLER; GROUP_WORDS];
            g[..chunk.len()].copy_from_slice(chunk);
            let w = g.map(|v| (v & 0x3ff) as u32);
            [w[0] << 10, w[1] | (w[2] << 20), w[3] << 10, w[4] | (w[5] << 20)]
        })
        .collect()
}

/// Recover the words of [`pack_v210`]
pub fn unpack_v210(packed: &[u32]) -> Vec<u16> {
    packed
        .chunks_exact(4)
        .flat_map(|g| {
            [
                (g[0] >> 10) & 0x3ff,
                g[1] & 0x3ff,
                (g[1] >> 20) & 0x3ff,
                (g[2] >> 10) & 0x3ff,
                g[3] & 0x3ff,
                (g[3] >> 20) & 0x3ff,
            ]
        })
        .map(|v| v as u16)
        .collect()
}

/// Write packed words into a line buffer as little-endian bytes.
///
/// Returns the bytes written; a short line truncates the packet.
pub fn write_line(packed: &[u32], line: &mut [u8]) -> usize {
    let mut written = 0;
    for (word, dst) in packed.iter().zip(line.chunks_exact_mut(4)) {
        dst.copy_from_slice(&word.to_le_bytes());
        written += 4;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_markers() {
        assert_eq!(with_parity(0x00), 0x200);
        assert_eq!(with_parity(0x01), 0x101);
        assert_eq!(with_parity(0x41), 0x241);
        assert_eq!(with_parity(0x05), 0x205);
        assert_eq!(with_parity(0x08), 0x108);
    }

    #[test]
    fn test_checksum_marker() {
        assert_eq!(checksum(&[0x0ff]), 0x2ff);
        assert_eq!(checksum(&[0x1ff]), 0x1ff);
        assert_eq!(checksum(&[0x1ff, 0x002]), 0x201);
    }

    #[test]
    fn test_packet_layout() {
        let words = build_packet(0x61, 0x01, &[0xaa]);
        assert_eq!(words.len(), 12);
        assert_eq!(&words[..3], &ADF);
        assert_eq!(words[5], with_parity(1));
        assert_eq!(words[6], with_parity(0xaa));
        assert_eq!(words[7], checksum(&words[3..7]));
        assert!(words[8..].iter().all(|&w| w == FILLER));
    }

    #[test]
    fn test_v210_group_layout() {
        let packed = pack_v210(&[0x000, 0x3ff, 0x3ff, 0x241, 0x205, 0x108]);
        assert_eq!(
            packed,
            vec![0, 0x3ff | (0x3ff << 20), 0x241 << 10, 0x205 | (0x108 << 20)]
        );
        assert_eq!(
            unpack_v210(&packed),
            vec![0x000, 0x3ff, 0x3ff, 0x241, 0x205, 0x108]
        );
    }

    #[test]
    fn test_write_line_truncates() {
        let mut line = [0u8; 6];
        assert_eq!(write_line(&[0x0403_0201, 0xffff_ffff], &mut line), 4);
        assert_eq!(line, [1, 2, 3, 4, 0, 0]);
    }
}
