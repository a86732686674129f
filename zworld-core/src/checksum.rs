//! N64 header checksum.
//!
//! The boot chip (CIC) is identified from a CRC32 of the bootcode, which
//! selects the seed and the final mixing step. The two resulting words are
//! stored big-endian at 0x10 and 0x14.

use byteorder::{BigEndian, ByteOrder};
use flate2::Crc;

const HEADER_SIZE: usize = 0x40;
const BOOTCODE_SIZE: usize = 0x1000 - HEADER_SIZE;
const CRC1_OFFSET: usize = 0x10;
const CRC2_OFFSET: usize = 0x14;
const CHECKSUM_START: usize = 0x1000;
const CHECKSUM_LENGTH: usize = 0x0010_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cic {
    Cic6101,
    Cic6102,
    Cic6103,
    Cic6105,
    Cic6106,
}

impl Cic {
    fn seed(self) -> u32 {
        match self {
            Cic::Cic6101 | Cic::Cic6102 => 0xF8CA_4DDC,
            Cic::Cic6103 => 0xA388_6759,
            Cic::Cic6105 => 0xDF26_F436,
            Cic::Cic6106 => 0x1FEA_617A,
        }
    }
}

/// Identify the boot chip from the bootcode. `None` for unknown bootcode or
/// an image too short to hold one.
pub fn identify_cic(rom: &[u8]) -> Option<Cic> {
    let bootcode = rom.get(HEADER_SIZE..HEADER_SIZE + BOOTCODE_SIZE)?;
    cic_for_crc(crc32(bootcode))
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(bytes);
    crc.sum()
}

fn cic_for_crc(sum: u32) -> Option<Cic> {
    match sum {
        0x6170_A4A1 => Some(Cic::Cic6101),
        0x90BB_6CB5 => Some(Cic::Cic6102),
        0x0B05_0EE0 => Some(Cic::Cic6103),
        0x98BC_2C86 => Some(Cic::Cic6105),
        0xACC8_580A => Some(Cic::Cic6106),
        _ => None,
    }
}

/// Compute both checksum words for `cic`. `None` if the image is shorter
/// than the checksummed region.
pub fn calculate(rom: &[u8], cic: Cic) -> Option<[u32; 2]> {
    if rom.len() < CHECKSUM_START + CHECKSUM_LENGTH {
        return None;
    }

    let seed = cic.seed();
    let (mut t1, mut t2, mut t3, mut t4, mut t5, mut t6) = (seed, seed, seed, seed, seed, seed);

    for i in (CHECKSUM_START..CHECKSUM_START + CHECKSUM_LENGTH).step_by(4) {
        let d = BigEndian::read_u32(&rom[i..i + 4]);
        if t6.wrapping_add(d) < t6 {
            t4 = t4.wrapping_add(1);
        }
        t6 = t6.wrapping_add(d);
        t3 ^= d;
        let r = d.rotate_left(d & 0x1F);
        t5 = t5.wrapping_add(r);
        if t2 > d {
            t2 ^= r;
        } else {
            t2 ^= t6 ^ d;
        }

        if cic == Cic::Cic6105 {
            let k = HEADER_SIZE + 0x0710 + (i & 0xFF);
            t1 = t1.wrapping_add(BigEndian::read_u32(&rom[k..k + 4]) ^ d);
        } else {
            t1 = t1.wrapping_add(t5 ^ d);
        }
    }

    Some(match cic {
        Cic::Cic6103 => [(t6 ^ t4).wrapping_add(t3), (t5 ^ t2).wrapping_add(t1)],
        Cic::Cic6106 => [
            t6.wrapping_mul(t4).wrapping_add(t3),
            t5.wrapping_mul(t2).wrapping_add(t1),
        ],
        _ => [t6 ^ t4 ^ t3, t5 ^ t2 ^ t1],
    })
}

/// Rewrite the header checksum in place. Unknown bootcode leaves the image
/// untouched and returns `None`.
pub fn recompute(rom: &mut [u8]) -> Option<Cic> {
    let cic = identify_cic(rom)?;
    let [crc1, crc2] = calculate(rom, cic)?;
    BigEndian::write_u32(&mut rom[CRC1_OFFSET..CRC1_OFFSET + 4], crc1);
    BigEndian::write_u32(&mut rom[CRC2_OFFSET..CRC2_OFFSET + 4], crc2);
    Some(cic)
}
