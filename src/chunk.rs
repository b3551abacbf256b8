//! Calibration and state data sharing one sector.
//!
//! Data is stored as a sequence of chunks, each one a 12-byte header followed by the payload
//! padded to whole words:
//!
//! ```text
//! +------+------------------+------+--------------+------+--------------+------+--
//! | HEAD | PERSISTENT CHUNK | HEAD | STATE CHUNK1 | HEAD | STATE CHUNK2 | HEAD | ..
//! +------+------------------+------+--------------+------+--------------+------+--
//! ```
//!
//! Chunk 0 holds the rarely changing persistent data like calibration or presets. Updating it
//! erases the whole sector. The following chunks hold successive revisions of the frequently
//! changing state. Saving the state appends a chunk until the sector is full, then the sector is
//! erased and rewritten with the persistent data and the current state.
//!
//! The header stores the type tag, the payload size and the inverted byte sum of the payload. A
//! slot whose header does not match exactly, be it blank, torn or of another type, is rejected.

use crate::checksum::inverted_byte_sum;
use crate::error::Error;
use crate::platform::{AlignedWriteOps, align_ceil};
use crate::raw::{self, BLANK_TAG, CHUNK_ALIGNMENT, ChunkHeader};
use alloc::vec;
use bytemuck::Pod;
use core::cmp;
use core::mem::size_of;
use embedded_storage::nor_flash::NorFlash;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// A record type that can be stored as a chunk. The tag identifies the type on flash and must
/// differ from `u32::MAX`, the value read from erased flash.
///
/// Changing the layout of a record should go along with a new tag, otherwise stale data of the
/// old layout might be accepted as long as its size happens to match.
pub trait Tagged: Pod {
    const TAG: u32;
}

pub struct ChunkStorage<F: NorFlash, P: Tagged, S: Tagged> {
    hal: F,
    start: u32,
    end: u32,
    persistent: P,
    state: S,
    next_state_chunk_index: u16,
    // the slot at next_state_chunk_index holds a torn write and cannot be programmed
    slot_dirty: bool,
}

impl<F: NorFlash, P: Tagged, S: Tagged> ChunkStorage<F, P, S> {
    /// Manages the sector `start..end`. `persistent` and `state` are the values written by
    /// [`Self::init`] when the sector turns out to be blank or corrupted.
    ///
    /// Fails with [`Error::InvalidRegion`] if the sector holds `u16::MAX` or more state chunks.
    ///
    /// Nothing is read or written until [`Self::init`] is called.
    pub fn new(hal: F, start: u32, end: u32, persistent: P, state: S) -> Result<Self, Error> {
        if start >= end
            || F::align_erase_floor(start as usize) != start as usize
            || F::align_erase_floor(end as usize) != end as usize
        {
            return Err(Error::InvalidRegion);
        }

        if P::TAG == BLANK_TAG || S::TAG == BLANK_TAG {
            return Err(Error::InvalidTag);
        }

        if size_of::<P>() > u16::MAX as usize || size_of::<S>() > u16::MAX as usize {
            return Err(Error::RegionTooSmall);
        }

        let storage = Self {
            hal,
            start,
            end,
            persistent,
            state,
            next_state_chunk_index: 1,
            slot_dirty: false,
        };

        if !storage.fits(1) {
            return Err(Error::RegionTooSmall);
        }

        // the index one past the last state chunk has to fit as well
        if storage.state_chunk_capacity() >= u16::MAX as usize {
            return Err(Error::InvalidRegion);
        }

        Ok(storage)
    }

    /// Loads the persistent data and the latest state revision.
    ///
    /// Returns `Ok(false)` if the sector was blank or corrupted, or held no state revision. The
    /// sector is formatted in that case, using the loaded persistent data if it was valid and the
    /// initial values otherwise.
    pub fn init(&mut self) -> Result<bool, Error> {
        match self.read_chunk::<P>(0) {
            Ok(persistent) => {
                self.persistent = persistent;

                let mut index = 1;
                while self.fits(index) {
                    match self.read_chunk::<S>(index) {
                        Ok(state) => self.state = state,
                        Err(Error::FlashError) => return Err(Error::FlashError),
                        Err(_) => break,
                    }
                    index += 1;
                }
                self.next_state_chunk_index = index;
                self.slot_dirty = self.fits(index) && !self.is_blank(index)?;

                #[cfg(feature = "defmt")]
                trace!("init: next state chunk {}, dirty: {}", index, self.slot_dirty);

                if index != 1 {
                    return Ok(true);
                }
            }
            Err(Error::FlashError) => return Err(Error::FlashError),
            Err(_) => {}
        }

        #[cfg(feature = "defmt")]
        warn!("init: no valid data found, formatting");

        self.format()?;
        Ok(false)
    }

    /// Appends the current state as a new chunk, or formats the sector if it is full.
    ///
    /// The sector is also formatted if [`Self::init`] stopped at a torn chunk or a previous save
    /// failed, since programming over the torn slot would produce another unreadable chunk and
    /// hide every later revision.
    pub fn save_state(&mut self) -> Result<(), Error> {
        if self.slot_dirty || !self.fits(self.next_state_chunk_index) {
            return self.format();
        }

        let state = self.state;
        if let Err(e) = self.write_chunk(self.next_state_chunk_index, &state) {
            // parts of the chunk may have been programmed
            self.slot_dirty = true;
            return Err(e);
        }
        self.next_state_chunk_index += 1;
        Ok(())
    }

    /// The persistent chunk is never appended, so saving it always formats the sector.
    pub fn save_persistent_data(&mut self) -> Result<(), Error> {
        self.format()
    }

    /// Erases the sector and writes the persistent data to chunk 0 and the state to chunk 1.
    pub fn format(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("format: {:#08x}..{:#08x}", self.start, self.end);

        #[cfg(feature = "debug-logs")]
        println!("  ChunkStorage: format");

        // stays set if formatting fails, so the next save starts over
        self.slot_dirty = true;
        raw::erase_pages(&mut self.hal, self.start, self.end).map_err(|_| Error::FlashError)?;

        let persistent = self.persistent;
        let state = self.state;
        self.write_chunk(0, &persistent)?;
        self.write_chunk(1, &state)?;
        self.next_state_chunk_index = 2;
        self.slot_dirty = false;
        Ok(())
    }

    /// Reads chunk `index` as `T`. The header must carry the tag and size of `T` and the checksum
    /// of the payload.
    pub fn read_chunk<T: Tagged>(&mut self, index: u16) -> Result<T, Error> {
        let address = self.chunk_address(index);
        if address + Self::chunk_size::<T>() > self.end as usize {
            return Err(Error::InvalidRegion);
        }

        let mut buf = [0u8; size_of::<ChunkHeader>()];
        raw::read(&mut self.hal, address as u32, &mut buf).map_err(|_| Error::FlashError)?;
        let header: ChunkHeader = bytemuck::pod_read_unaligned(&buf);

        if header.tag != T::TAG {
            return Err(Error::TagMismatch(header.tag));
        }
        if header.size as usize != size_of::<T>() {
            return Err(Error::SizeMismatch(header.size));
        }

        let mut data = T::zeroed();
        raw::read(
            &mut self.hal,
            (address + size_of::<ChunkHeader>()) as u32,
            bytemuck::bytes_of_mut(&mut data),
        )
        .map_err(|_| Error::FlashError)?;

        if inverted_byte_sum(bytemuck::bytes_of(&data)) != header.checksum {
            return Err(Error::ChecksumMismatch);
        }
        Ok(data)
    }

    /// Programs the header and then the payload of chunk `index`. The slot must be erased.
    pub fn write_chunk<T: Tagged>(&mut self, index: u16, data: &T) -> Result<(), Error> {
        if size_of::<T>() > u16::MAX as usize {
            return Err(Error::RegionTooSmall);
        }

        let address = self.chunk_address(index);
        if address + Self::chunk_size::<T>() > self.end as usize {
            return Err(Error::InvalidRegion);
        }

        #[cfg(feature = "defmt")]
        trace!("write_chunk: {} @{:#08x}", index, address);

        let bytes = bytemuck::bytes_of(data);
        let header = ChunkHeader::new(T::TAG, bytes.len() as u16, inverted_byte_sum(bytes));

        raw::program(&mut self.hal, address as u32, bytemuck::bytes_of(&header))
            .map_err(|_| Error::FlashError)?;
        raw::program(
            &mut self.hal,
            (address + size_of::<ChunkHeader>()) as u32,
            bytes,
        )
        .map_err(|_| Error::FlashError)
    }

    pub fn persistent(&self) -> &P {
        &self.persistent
    }

    /// Changes are written by the next [`Self::save_persistent_data`], or by any format.
    pub fn persistent_mut(&mut self) -> &mut P {
        &mut self.persistent
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Changes are written by the next [`Self::save_state`].
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Index of the chunk the next state revision is written to.
    pub fn next_state_chunk_index(&self) -> u16 {
        self.next_state_chunk_index
    }

    /// Number of state revisions the sector holds before it has to be formatted.
    pub fn state_chunk_capacity(&self) -> usize {
        (self.end as usize - self.chunk_address(1)) / Self::chunk_size::<S>()
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

    fn chunk_size<T>() -> usize {
        let alignment = cmp::max(CHUNK_ALIGNMENT, F::WRITE_SIZE);
        size_of::<ChunkHeader>() + align_ceil(size_of::<T>(), alignment)
    }

    fn chunk_address(&self, index: u16) -> usize {
        let start = self.start as usize;
        if index == 0 {
            start
        } else {
            start + Self::chunk_size::<P>() + Self::chunk_size::<S>() * (index as usize - 1)
        }
    }

    fn is_blank(&mut self, index: u16) -> Result<bool, Error> {
        let address = self.chunk_address(index) as u32;
        let mut buf = vec![0u8; Self::chunk_size::<S>()];
        raw::read(&mut self.hal, address, &mut buf).map_err(|_| Error::FlashError)?;
        Ok(buf.iter().all(|&e| e == 0xFF))
    }

    /// Whether chunk `index` ends within the sector.
    fn fits(&self, index: u16) -> bool {
        self.chunk_address(index) + Self::chunk_size::<S>() <= self.end as usize
    }
}
