use crate::checksum::byte_sum;
use crate::error::Error;
use crate::page::{load_record, record_footprint};
use crate::platform::{FlashController, align_floor};
use crate::raw::trailer_offset;
use crate::writer::{Config, FlashWriter};
use bytemuck::Pod;

/// Single-record storage on the last page before `end_address` whose saves are executed by a
/// [`FlashWriter`] in the background. Uses the same page layout as
/// [`PageStorage`](crate::PageStorage).
///
/// Loads read the flash directly and do not wait for pending jobs; call [`Self::flush`] first
/// to observe a save that is still in flight.
pub struct NonBlockingStorage<F: FlashController> {
    writer: FlashWriter<F>,
    base_address: u32,
}

impl<F: FlashController> NonBlockingStorage<F> {
    pub fn new(controller: F, end_address: u32) -> Result<Self, Error> {
        Self::with_config(controller, end_address, Config::default())
    }

    pub fn with_config(controller: F, end_address: u32, config: Config) -> Result<Self, Error> {
        let page_size = F::PAGE_SIZE as u32;
        if align_floor(end_address as usize, F::PAGE_SIZE) != end_address as usize
            || end_address < page_size
        {
            return Err(Error::InvalidRegion);
        }

        Ok(Self {
            writer: FlashWriter::with_config(controller, config),
            base_address: end_address - page_size,
        })
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Queues an erase of the page, a copy of `data` and its checksum. Returns immediately; the
    /// data is captured so the caller may keep modifying it.
    pub fn save<T: Pod>(&mut self, data: &T) -> Result<(), Error> {
        if record_footprint::<T>() > F::PAGE_SIZE {
            return Err(Error::RegionTooSmall);
        }

        let bytes = bytemuck::bytes_of(data);
        self.writer.erase_page(self.base_address);
        self.writer.copy(self.base_address, bytes);
        self.writer.write_half_word(
            self.base_address + trailer_offset(bytes.len()) as u32,
            byte_sum(bytes),
        );
        Ok(())
    }

    /// Reads the record synchronously and validates its checksum.
    pub fn load<T: Pod>(&mut self) -> Result<T, Error> {
        if record_footprint::<T>() > F::PAGE_SIZE {
            return Err(Error::RegionTooSmall);
        }
        load_record(self.writer.controller_mut(), self.base_address)
    }

    pub fn process(&mut self) -> Result<(), Error> {
        self.writer.process()
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()
    }

    pub fn writer(&self) -> &FlashWriter<F> {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut FlashWriter<F> {
        &mut self.writer
    }

    pub fn release(self) -> F {
        self.writer.release()
    }
}
