#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use nvm_store::platform::{FlashController, FlashStatus};

pub const PAGE_SIZE: usize = 1024;
pub const WORD_SIZE: usize = 4;
pub const HALF_WORD: usize = 2;

/// Half-word programmable flash with 1 KiB pages, like the STM32F1 family.
pub type Flash = MockFlash<HALF_WORD, PAGE_SIZE>;

/// Word programmable flash.
pub type WordFlash = MockFlash<WORD_SIZE, PAGE_SIZE>;

/// Flash with 16-byte pages to exercise page boundaries with few records.
pub type TinyFlash = MockFlash<HALF_WORD, 16>;

#[derive(Default)]
pub struct MockFlash<const W: usize, const P: usize> {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,

    // polled controller simulation
    /// Number of `status` polls reporting busy after an operation was started.
    pub latency: usize,
    pub remaining_busy: usize,
    /// Reports busy forever.
    pub stuck: bool,
    /// The next `status` call reports an error.
    pub fail_next_status: bool,
    /// Started operations report an error once they are done.
    pub fail_operations: bool,
    pub operation_failed: bool,
    pub erase_enabled: bool,
    pub program_enabled: bool,
    pub status_polls: usize,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl<const W: usize, const P: usize> MockFlash<W, P> {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xffu8; P * pages],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(pages: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; P * pages],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn new_with_latency(pages: usize, latency: usize) -> Self {
        Self {
            buf: vec![0xffu8; P * pages],
            fail_after_operation: usize::MAX,
            latency,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn clear_reads(&mut self) {
        self.operations
            .retain(|op| !matches!(op, Operation::Read { .. }));
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn program(&mut self, offset: usize, bytes: &[u8]) {
        for (i, &val) in bytes.iter().enumerate() {
            // flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl<const W: usize, const P: usize> ErrorType for MockFlash<W, P> {
    type Error = FlashError;
}

impl<const W: usize, const P: usize> ReadNorFlash for MockFlash<W, P> {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl<const W: usize, const P: usize> NorFlash for MockFlash<W, P> {
    const WRITE_SIZE: usize = W;

    const ERASE_SIZE: usize = P;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(from < to);

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        self.program(offset as usize, bytes);
        Ok(())
    }
}

impl<const W: usize, const P: usize> FlashController for MockFlash<W, P> {
    const PAGE_SIZE: usize = P;

    fn status(&mut self) -> FlashStatus {
        self.status_polls += 1;

        if self.fail_next_status {
            self.fail_next_status = false;
            return FlashStatus::Error;
        }
        if self.stuck {
            return FlashStatus::Busy;
        }
        if self.remaining_busy > 0 {
            self.remaining_busy -= 1;
            return FlashStatus::Busy;
        }
        if self.operation_failed {
            return FlashStatus::Error;
        }
        FlashStatus::Complete
    }

    fn start_page_erase(&mut self, address: u32) {
        assert!(!self.erase_enabled && !self.program_enabled);
        assert_eq!(self.remaining_busy, 0);

        let from = address - address % P as u32;
        self.operations.push(Operation::Erase {
            offset: from,
            len: P,
        });
        if self.fail_operations {
            self.operation_failed = true;
        } else {
            self.buf[from as usize..from as usize + P].fill(0xff);
        }

        self.erase_enabled = true;
        self.remaining_busy = self.latency;
    }

    fn end_page_erase(&mut self) {
        assert!(self.erase_enabled);
        self.erase_enabled = false;
        self.operation_failed = false;
    }

    fn start_half_word_program(&mut self, address: u32, half_word: u16) {
        assert!(!self.erase_enabled && !self.program_enabled);
        assert_eq!(self.remaining_busy, 0);
        assert!(address.is_multiple_of(HALF_WORD as _));

        self.operations.push(Operation::Write {
            offset: address,
            len: HALF_WORD,
        });
        if self.fail_operations {
            self.operation_failed = true;
        } else {
            self.program(address as usize, &half_word.to_le_bytes());
        }

        self.program_enabled = true;
        self.remaining_busy = self.latency;
    }

    fn end_half_word_program(&mut self) {
        assert!(self.program_enabled);
        self.program_enabled = false;
        self.operation_failed = false;
    }
}
