use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};

/// Status register of a flash controller as seen by the polled writer.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashStatus {
    /// An erase or program operation is still running.
    Busy,
    /// The last operation finished and the controller accepts a new one.
    Complete,
    /// The last operation failed, e.g. because of a write protection or programming error.
    Error,
}

/// Split-phase access to a flash controller: every operation is started, then polled with
/// `status` until the controller is no longer busy, and finally acknowledged with the matching
/// `end_*` call which clears the erase- or program-enable condition.
///
/// Addresses are offsets into the device, the same as for [`ReadNorFlash`].
pub trait FlashController: ReadNorFlash {
    /// Erase granularity in bytes.
    const PAGE_SIZE: usize;

    fn status(&mut self) -> FlashStatus;

    fn start_page_erase(&mut self, address: u32);

    fn end_page_erase(&mut self);

    fn start_half_word_program(&mut self, address: u32, half_word: u16);

    fn end_half_word_program(&mut self);
}

impl<T: FlashController> FlashController for &mut T {
    const PAGE_SIZE: usize = T::PAGE_SIZE;

    fn status(&mut self) -> FlashStatus {
        T::status(self)
    }

    fn start_page_erase(&mut self, address: u32) {
        T::start_page_erase(self, address)
    }

    fn end_page_erase(&mut self) {
        T::end_page_erase(self)
    }

    fn start_half_word_program(&mut self, address: u32, half_word: u16) {
        T::start_half_word_program(self, address, half_word)
    }

    fn end_half_word_program(&mut self) {
        T::end_half_word_program(self)
    }
}

/// Drives any blocking [`NorFlash`] through the [`FlashController`] interface. Each operation runs
/// to completion inside its `start_*` call, so the controller is never busy and the status
/// reflects the outcome of the last operation.
pub struct BlockingController<F> {
    inner: F,
    status: FlashStatus,
}

impl<F: NorFlash> BlockingController<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            status: FlashStatus::Complete,
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn release(self) -> F {
        self.inner
    }
}

impl<F: NorFlash> ErrorType for BlockingController<F> {
    type Error = F::Error;
}

impl<F: NorFlash> ReadNorFlash for BlockingController<F> {
    const READ_SIZE: usize = F::READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.inner.read(offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<F: NorFlash> FlashController for BlockingController<F> {
    const PAGE_SIZE: usize = F::ERASE_SIZE;

    fn status(&mut self) -> FlashStatus {
        self.status
    }

    fn start_page_erase(&mut self, address: u32) {
        let from = align_floor(address as usize, F::ERASE_SIZE) as u32;
        self.status = match self.inner.erase(from, from + F::ERASE_SIZE as u32) {
            Ok(()) => FlashStatus::Complete,
            Err(_) => FlashStatus::Error,
        };
    }

    fn end_page_erase(&mut self) {
        self.status = FlashStatus::Complete;
    }

    fn start_half_word_program(&mut self, address: u32, half_word: u16) {
        self.status = match crate::raw::program(&mut self.inner, address, &half_word.to_le_bytes())
        {
            Ok(()) => FlashStatus::Complete,
            Err(_) => FlashStatus::Error,
        };
    }

    fn end_half_word_program(&mut self) {
        self.status = FlashStatus::Complete;
    }
}

pub trait AlignedOps: ReadNorFlash {
    fn align_read_ceil(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_read_floor(size: usize) -> usize {
        align_floor(size, Self::READ_SIZE)
    }
}

impl<T: ReadNorFlash> AlignedOps for T {}

pub trait AlignedWriteOps: NorFlash {
    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }

    fn align_erase_floor(size: usize) -> usize {
        align_floor(size, Self::ERASE_SIZE)
    }
}

impl<T: NorFlash> AlignedWriteOps for T {}

#[inline(always)]
pub(crate) const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
pub(crate) const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::BlockingController;

    /// The SPI flash of the ESP32 family is driven through ROM routines that block until the
    /// operation is done, hence it is polled through the blocking adapter.
    pub type EspController<'d> = BlockingController<FlashStorage<'d>>;
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
pub use chip::*;
