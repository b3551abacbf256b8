//! Blocking single-record storage: one record per page, rewritten in place.
//!
//! Page layout: `payload | padding to an even size | checksum: u16`, where the checksum is the
//! plain byte sum of the payload. [`NonBlockingStorage`](crate::NonBlockingStorage) uses the very
//! same layout, so a record saved by either one can be loaded by the other.
//!
//! Every save costs an erase cycle, which is fine for calibration data but not for state that
//! changes every second. See [`BlockStorage`](crate::BlockStorage) for that.

use crate::checksum::byte_sum;
use crate::error::Error;
use crate::platform::AlignedWriteOps;
use crate::raw::{self, HALF_WORD, trailer_offset};
use bytemuck::Pod;
use core::mem::size_of;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Bytes occupied by a record of type `T` including its checksum.
pub(crate) const fn record_footprint<T>() -> usize {
    trailer_offset(size_of::<T>()) + HALF_WORD
}

pub(crate) fn load_record<F: ReadNorFlash, T: Pod>(hal: &mut F, base: u32) -> Result<T, Error> {
    let mut data = T::zeroed();
    raw::read(hal, base, bytemuck::bytes_of_mut(&mut data)).map_err(|_| Error::FlashError)?;
    let checksum = raw::read_u16(hal, base + trailer_offset(size_of::<T>()) as u32)
        .map_err(|_| Error::FlashError)?;

    if checksum != byte_sum(bytemuck::bytes_of(&data)) {
        #[cfg(feature = "defmt")]
        warn!("load_record: checksum mismatch @{:#08x}", base);

        return Err(Error::ChecksumMismatch);
    }
    Ok(data)
}

pub struct PageStorage<F: NorFlash> {
    hal: F,
    base_address: u32,
    pages: u16,
}

impl<F: NorFlash> PageStorage<F> {
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
            pages,
        })
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn pages(&self) -> u16 {
        self.pages
    }

    /// Saves `data` to the first page.
    pub fn save<T: Pod>(&mut self, data: &T) -> Result<(), Error> {
        self.save_to(data, 0)
    }

    /// Erases page `page_index` and writes `data` followed by its checksum.
    pub fn save_to<T: Pod>(&mut self, data: &T, page_index: u16) -> Result<(), Error> {
        let base = self.page_address::<T>(page_index)?;

        #[cfg(feature = "defmt")]
        trace!("save_to: page {} @{:#08x}", page_index, base);

        let bytes = bytemuck::bytes_of(data);
        raw::erase_pages(&mut self.hal, base, base + F::ERASE_SIZE as u32)
            .map_err(|_| Error::FlashError)?;
        raw::program(&mut self.hal, base, bytes).map_err(|_| Error::FlashError)?;
        raw::program(
            &mut self.hal,
            base + trailer_offset(bytes.len()) as u32,
            &byte_sum(bytes).to_le_bytes(),
        )
        .map_err(|_| Error::FlashError)
    }

    /// Loads the record from the first page.
    pub fn load<T: Pod>(&mut self) -> Result<T, Error> {
        self.load_from(0)
    }

    /// Loads the record from page `page_index`. Fails with [`Error::ChecksumMismatch`] if the page
    /// is blank or corrupted, in which case the caller should fall back to defaults.
    pub fn load_from<T: Pod>(&mut self, page_index: u16) -> Result<T, Error> {
        let base = self.page_address::<T>(page_index)?;
        load_record(&mut self.hal, base)
    }

    pub fn release(self) -> F {
        self.hal
    }

    fn page_address<T>(&self, page_index: u16) -> Result<u32, Error> {
        if page_index >= self.pages {
            return Err(Error::InvalidRegion);
        }
        if record_footprint::<T>() > F::ERASE_SIZE {
            return Err(Error::RegionTooSmall);
        }
        Ok(self.base_address + page_index as u32 * F::ERASE_SIZE as u32)
    }
}
