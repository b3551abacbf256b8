use crate::platform::{AlignedOps, AlignedWriteOps, align_ceil};
use alloc::vec;
use bytemuck::{Pod, Zeroable};
use core::mem::size_of;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
#[cfg(feature = "defmt")]
use defmt::trace;

/// Checksums, versions and the tail of single records are programmed as half-words.
pub(crate) const HALF_WORD: usize = 2;

/// Chunk payloads are padded to whole words.
pub(crate) const CHUNK_ALIGNMENT: usize = 4;

/// Tag of a chunk header on erased flash.
pub(crate) const BLANK_TAG: u32 = u32::MAX;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct ChunkHeader {
    pub(crate) tag: u32,
    pub(crate) size: u16,
    pub(crate) checksum: u16,
    pub(crate) _pad: [u16; 2],
}

const _: () = assert!(size_of::<ChunkHeader>() == 12);

impl ChunkHeader {
    pub(crate) fn new(tag: u32, size: u16, checksum: u16) -> Self {
        Self {
            tag,
            size,
            checksum,
            _pad: [u16::MAX; 2],
        }
    }
}

/// Byte offset of the trailing half-words (checksum, version) behind a payload of `size` bytes.
#[inline(always)]
pub(crate) const fn trailer_offset(size: usize) -> usize {
    align_ceil(size, HALF_WORD)
}

/// Programs `bytes` at an arbitrary offset. Partial write units at either end are padded with
/// 0xFF, which leaves the neighbouring bits of NOR flash untouched.
#[inline(always)]
pub(crate) fn program<F: NorFlash>(
    hal: &mut F,
    offset: u32,
    bytes: &[u8],
) -> Result<(), F::Error> {
    #[cfg(feature = "defmt")]
    trace!("program @{:#08x}: [{}]", offset, bytes.len());

    if bytes.is_empty() {
        return Ok(());
    }

    let start = F::align_write_floor(offset as usize);
    let lead = offset as usize - start;

    if lead == 0 && bytes.len().is_multiple_of(F::WRITE_SIZE) {
        return hal.write(offset, bytes);
    }

    if lead == 0 {
        let pivot = F::align_write_floor(bytes.len());
        let header = &bytes[..pivot];
        let trailer = &bytes[pivot..];
        if !header.is_empty() {
            hal.write(offset, header)?;
        }

        // an all-ones trailer equals erased flash and needs no write
        if trailer.iter().any(|&e| e != 0xFF) {
            let mut buf = vec![0xFFu8; F::WRITE_SIZE];
            buf[..trailer.len()].copy_from_slice(trailer);
            hal.write(offset + pivot as u32, &buf)?;
        }
        return Ok(());
    }

    let mut buf = vec![0xFFu8; F::align_write_ceil(lead + bytes.len())];
    buf[lead..lead + bytes.len()].copy_from_slice(bytes);
    if buf.iter().all(|&e| e == 0xFF) {
        return Ok(());
    }
    hal.write(start as u32, &buf)
}

/// Reads `bytes.len()` bytes at an arbitrary offset, widening the access to `READ_SIZE` units.
pub(crate) fn read<F: ReadNorFlash>(
    hal: &mut F,
    offset: u32,
    bytes: &mut [u8],
) -> Result<(), F::Error> {
    let start = F::align_read_floor(offset as usize);
    let lead = offset as usize - start;

    if lead == 0 && bytes.len().is_multiple_of(F::READ_SIZE) {
        return hal.read(offset, bytes);
    }

    let mut buf = vec![0u8; F::align_read_ceil(lead + bytes.len())];
    hal.read(start as u32, &mut buf)?;
    bytes.copy_from_slice(&buf[lead..lead + bytes.len()]);
    Ok(())
}

/// Erases every page of `from..to`, one page per call so a failing page can be located.
pub(crate) fn erase_pages<F: NorFlash>(hal: &mut F, from: u32, to: u32) -> Result<(), F::Error> {
    let mut address = from;
    while address < to {
        #[cfg(feature = "defmt")]
        trace!("erase_page @{:#08x}", address);

        hal.erase(address, address + F::ERASE_SIZE as u32)?;
        address += F::ERASE_SIZE as u32;
    }
    Ok(())
}

pub(crate) fn read_u16<F: ReadNorFlash>(hal: &mut F, offset: u32) -> Result<u16, F::Error> {
    let mut buf = [0u8; HALF_WORD];
    read(hal, offset, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}
