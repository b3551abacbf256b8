//! Versioned, append-only storage of a single record ("parsimonious" storage).
//!
//! Erasing a page for every save wears out the flash quickly when the record is small and saved
//! often. Instead, each save appends a block to the next free slot of the reserved region:
//!
//! ```text
//! [payload | checksum: u16 | version: u16]   slot 0
//! [payload | checksum: u16 | version: u16]   slot 1
//! ...                                        until the region is full, then erase all and
//!                                            restart at slot 0 with version 0
//! ```
//!
//! Pages are erased lazily, the first time a block reaches into them. With 16-byte records on
//! 1 KiB pages this needs one erase per 51 saves instead of one per save.
//!
//! The version of a block equals its slot index. Loading scans the slots from the end of the region
//! and returns the first block whose checksum and version both match, so a torn or stale block is
//! rejected even if its checksum happens to collide. This relies on a single writer advancing
//! strictly slot by slot; the region must not be shared with other data.

use crate::checksum::byte_sum;
use crate::error::Error;
use crate::platform::AlignedWriteOps;
use crate::raw::{self, HALF_WORD, trailer_offset};
use alloc::vec;
use bytemuck::Pod;
use core::cmp;
use core::mem::size_of;
use embedded_storage::nor_flash::NorFlash;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

pub struct BlockStorage<F: NorFlash> {
    hal: F,
    base_address: u32,
    end_address: u32,
}

impl<F: NorFlash> BlockStorage<F> {
    /// Reserves the last `pages` pages before `end_address`.
    pub fn new(hal: F, end_address: u32, pages: u16) -> Result<Self, Error> {
        let size = F::ERASE_SIZE as u32 * pages as u32;
        if pages == 0
            || F::align_erase_floor(end_address as usize) != end_address as usize
            || end_address < size
        {
            return Err(Error::InvalidRegion);
        }

        Ok(Self {
            hal,
            base_address: end_address - size,
            end_address,
        })
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn end_address(&self) -> u32 {
        self.end_address
    }

    /// Size of a slot holding a `T`: the payload padded to an even size, checksum and version.
    pub const fn block_size<T>() -> usize {
        trailer_offset(size_of::<T>()) + 2 * HALF_WORD
    }

    /// Number of slots for blocks of `T`. Limited to `u16::MAX` so every slot index fits into the
    /// 16-bit version and the token one past the last slot still does.
    pub fn capacity<T>(&self) -> usize {
        let region = (self.end_address - self.base_address) as usize;
        cmp::min(region / Self::block_size::<T>(), u16::MAX as usize)
    }

    /// Appends `data` at the slot given by `version_token` and advances the token.
    ///
    /// If the region is full, it is erased entirely and the token restarts at 0. Otherwise only the
    /// pages the new block reaches into for the first time are erased. A slot that still holds the
    /// remains of a torn save is skipped.
    pub fn save<T: Pod>(&mut self, data: &T, version_token: &mut u16) -> Result<(), Error> {
        let capacity = self.capacity::<T>();
        if capacity == 0 {
            return Err(Error::RegionTooSmall);
        }

        let block_size = Self::block_size::<T>();
        let base = self.base_address as usize;

        loop {
            if *version_token as usize >= capacity {
                #[cfg(feature = "defmt")]
                warn!(
                    "save: region full, erasing {:#08x}..{:#08x}",
                    self.base_address,
                    self.end_address
                );

                #[cfg(feature = "debug-logs")]
                println!("  BlockStorage: wrap around");

                raw::erase_pages(&mut self.hal, self.base_address, self.end_address)
                    .map_err(|_| Error::FlashError)?;
                *version_token = 0;
                break;
            }

            let start = base + block_size * *version_token as usize;
            let first_new_page = if start == base {
                base
            } else {
                F::align_erase_floor(start - 1) + F::ERASE_SIZE
            };
            let last_page = F::align_erase_floor(start + block_size - 1);
            if first_new_page <= last_page {
                raw::erase_pages(
                    &mut self.hal,
                    first_new_page as u32,
                    (last_page + F::ERASE_SIZE) as u32,
                )
                .map_err(|_| Error::FlashError)?;
            }

            if self.is_blank(start as u32, block_size)? {
                break;
            }

            // torn by an earlier save, the version keeps matching the slot index
            #[cfg(feature = "defmt")]
            warn!("save: slot {} is not blank, skipping", *version_token);

            *version_token += 1;
        }

        let start = (base + block_size * *version_token as usize) as u32;

        #[cfg(feature = "defmt")]
        trace!("save: version {} @{:#08x}", *version_token, start);

        let bytes = bytemuck::bytes_of(data);
        let trailer = start + trailer_offset(bytes.len()) as u32;
        raw::program(&mut self.hal, start, bytes).map_err(|_| Error::FlashError)?;
        raw::program(&mut self.hal, trailer, &byte_sum(bytes).to_le_bytes())
            .map_err(|_| Error::FlashError)?;
        // the version is written last, it commits the block
        raw::program(
            &mut self.hal,
            trailer + HALF_WORD as u32,
            &version_token.to_le_bytes(),
        )
        .map_err(|_| Error::FlashError)?;

        *version_token += 1;
        Ok(())
    }

    /// Recovers the most recent block and sets `version_token` to the slot after it.
    ///
    /// Fails with [`Error::NoValidBlock`] and resets the token to 0 if the region is blank or
    /// fully corrupted.
    pub fn load<T: Pod>(&mut self, version_token: &mut u16) -> Result<T, Error> {
        let block_size = Self::block_size::<T>();
        let payload_size = size_of::<T>();
        let trailer = trailer_offset(payload_size);
        let mut buf = vec![0u8; block_size];

        for candidate in (0..self.capacity::<T>()).rev() {
            let start = self.base_address as usize + candidate * block_size;
            raw::read(&mut self.hal, start as u32, &mut buf).map_err(|_| Error::FlashError)?;

            let checksum = u16::from_le_bytes([buf[trailer], buf[trailer + 1]]);
            let version = u16::from_le_bytes([buf[trailer + 2], buf[trailer + 3]]);
            let payload = &buf[..payload_size];

            if checksum == byte_sum(payload) && version as usize == candidate {
                #[cfg(feature = "defmt")]
                trace!("load: version {} @{:#08x}", version, start);

                *version_token = version + 1;
                return Ok(bytemuck::pod_read_unaligned(payload));
            }
        }

        #[cfg(feature = "defmt")]
        warn!("load: no valid block");

        *version_token = 0;
        Err(Error::NoValidBlock)
    }

    pub fn flash(&self) -> &F {
        &self.hal
    }

    /// Direct access to the device. Writing to the managed region bypasses all bookkeeping.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.hal
    }

    pub fn release(self) -> F {
        self.hal
    }

    fn is_blank(&mut self, address: u32, len: usize) -> Result<bool, Error> {
        let mut buf = vec![0u8; len];
        raw::read(&mut self.hal, address, &mut buf).map_err(|_| Error::FlashError)?;
        Ok(buf.iter().all(|&e| e == 0xFF))
    }
}
