//! Non-blocking flash writer.
//!
//! Erase and program requests are queued as [`Job`]s and executed by [`FlashWriter::process`], one
//! hardware step per call. A main loop or periodic interrupt keeps calling `process` while the
//! control code continues to run; [`FlashWriter::flush`] drains everything for callers that must
//! know the data is persisted, e.g. before powering down.

use crate::error::Error;
use crate::platform::{FlashController, FlashStatus};
use crate::queue::JobQueue;
use crate::raw::HALF_WORD;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Tuning knobs of the [`FlashWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Number of queued jobs before the oldest one gets dropped.
    pub queue_capacity: usize,
    /// Number of consecutive `process` calls a single step may observe a busy controller before it
    /// is reported as [`Error::Timeout`].
    pub max_busy_polls: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            max_busy_polls: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Erase the page containing `address`.
    ErasePage { address: u32 },
    /// Program a 32-bit word as two half-words, low half first.
    WriteWord { address: u32, word: u32 },
    WriteHalfWord { address: u32, half_word: u16 },
    /// Program `bytes` starting at `address`. An odd trailing byte is padded with 0xFF.
    Copy { address: u32, bytes: Vec<u8> },
}

impl Job {
    pub fn address(&self) -> u32 {
        match self {
            Job::ErasePage { address }
            | Job::WriteWord { address, .. }
            | Job::WriteHalfWord { address, .. }
            | Job::Copy { address, .. } => *address,
        }
    }

    fn half_word_count(&self) -> usize {
        match self {
            Job::ErasePage { .. } => 0,
            Job::WriteWord { .. } => 2,
            Job::WriteHalfWord { .. } => 1,
            Job::Copy { bytes, .. } => bytes.len().div_ceil(HALF_WORD),
        }
    }

    fn half_word(&self, index: usize) -> u16 {
        match self {
            Job::ErasePage { .. } => u16::MAX,
            Job::WriteWord { word, .. } => (word >> (16 * index)) as u16,
            Job::WriteHalfWord { half_word, .. } => *half_word,
            Job::Copy { bytes, .. } => {
                let low = bytes[index * HALF_WORD];
                let high = bytes.get(index * HALF_WORD + 1).copied().unwrap_or(0xFF);
                u16::from_le_bytes([low, high])
            }
        }
    }
}

#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriterState {
    Ready,
    ErasingPage,
    WaitingForPageErase,
    Writing,
    WaitingForWrite,
}

/// Owns the flash controller. Not `Clone`: copying the state machine in the middle of a job would
/// issue its remaining steps twice.
pub struct FlashWriter<F: FlashController> {
    controller: F,
    config: Config,
    state: WriterState,
    jobs: JobQueue<Job>,
    job: Option<Job>,
    // half-words of the current job that are already programmed
    cursor: usize,
    busy_polls: u32,
    dropped_jobs: u32,
    aborted_jobs: u32,
}

impl<F: FlashController> FlashWriter<F> {
    pub fn new(controller: F) -> Self {
        Self::with_config(controller, Config::default())
    }

    pub fn with_config(controller: F, config: Config) -> Self {
        Self {
            controller,
            config,
            state: WriterState::Ready,
            jobs: JobQueue::new(config.queue_capacity),
            job: None,
            cursor: 0,
            busy_polls: 0,
            dropped_jobs: 0,
            aborted_jobs: 0,
        }
    }

    /// Queues a job. If the queue is full, the oldest pending job is dropped.
    pub fn push(&mut self, job: Job) {
        #[cfg(feature = "defmt")]
        trace!("push: @{:#08x}", job.address());

        if let Some(_dropped) = self.jobs.overwrite(job) {
            #[cfg(feature = "defmt")]
            warn!("queue full, dropped job @{:#08x}", _dropped.address());

            #[cfg(feature = "debug-logs")]
            println!("  FlashWriter: queue full, dropped {_dropped:?}");

            self.dropped_jobs += 1;
        }
    }

    pub fn erase_page(&mut self, address: u32) {
        self.push(Job::ErasePage { address });
    }

    pub fn write_word(&mut self, address: u32, word: u32) {
        self.push(Job::WriteWord { address, word });
    }

    pub fn write_half_word(&mut self, address: u32, half_word: u16) {
        self.push(Job::WriteHalfWord { address, half_word });
    }

    /// Queues a copy of `bytes`. The bytes are captured, the caller is free to modify its buffer
    /// right away.
    pub fn copy(&mut self, address: u32, bytes: &[u8]) {
        self.push(Job::Copy {
            address,
            bytes: bytes.to_vec(),
        });
    }

    /// Advances the state machine by a single step without blocking.
    ///
    /// Errors refer to the job in progress and do not stop the writer: after
    /// [`Error::JobAborted`] or a timeout before an operation was issued, the job is dropped and
    /// the next `process` call picks up the following one. An operation that was already issued
    /// cannot be cancelled, so a timeout while waiting for it keeps the writer waiting.
    pub fn process(&mut self) -> Result<(), Error> {
        match self.state {
            WriterState::Ready => {
                if let Some(job) = self.jobs.pop() {
                    self.cursor = 0;
                    self.busy_polls = 0;
                    self.state = match job {
                        Job::ErasePage { .. } => WriterState::ErasingPage,
                        _ if job.half_word_count() == 0 => WriterState::Ready,
                        _ => WriterState::Writing,
                    };
                    self.job = Some(job);
                }
                Ok(())
            }
            WriterState::ErasingPage => match self.controller.status() {
                FlashStatus::Busy => self.wait_before_issue(),
                FlashStatus::Complete => {
                    let address = self.job.as_ref().map_or(0, Job::address);

                    #[cfg(feature = "defmt")]
                    trace!("start_page_erase: @{:#08x}", address);

                    self.controller.start_page_erase(address);
                    self.enter(WriterState::WaitingForPageErase);
                    Ok(())
                }
                FlashStatus::Error => self.abort(Error::JobAborted),
            },
            WriterState::WaitingForPageErase => match self.controller.status() {
                FlashStatus::Busy => self.wait_for_completion(),
                status => {
                    self.controller.end_page_erase();
                    if status == FlashStatus::Error {
                        return self.abort(Error::JobAborted);
                    }
                    self.finish();
                    Ok(())
                }
            },
            WriterState::Writing => match self.controller.status() {
                FlashStatus::Busy => self.wait_before_issue(),
                FlashStatus::Complete => {
                    let Some(job) = self.job.as_ref() else {
                        self.finish();
                        return Ok(());
                    };
                    let address = job.address() + (self.cursor * HALF_WORD) as u32;
                    let half_word = job.half_word(self.cursor);

                    #[cfg(feature = "defmt")]
                    trace!("start_half_word_program: @{:#08x} {:#06x}", address, half_word);

                    self.controller.start_half_word_program(address, half_word);
                    self.enter(WriterState::WaitingForWrite);
                    Ok(())
                }
                FlashStatus::Error => self.abort(Error::JobAborted),
            },
            WriterState::WaitingForWrite => match self.controller.status() {
                FlashStatus::Busy => self.wait_for_completion(),
                FlashStatus::Complete => {
                    self.controller.end_half_word_program();
                    self.cursor += 1;
                    let remaining = self
                        .job
                        .as_ref()
                        .is_some_and(|job| self.cursor < job.half_word_count());
                    if remaining {
                        self.enter(WriterState::Writing);
                    } else {
                        self.finish();
                    }
                    Ok(())
                }
                FlashStatus::Error => {
                    self.controller.end_half_word_program();
                    self.abort(Error::JobAborted)
                }
            },
        }
    }

    /// Blocks until every queued job has been executed.
    ///
    /// Jobs that fail are dropped and the remaining ones are still executed; the first error is
    /// returned afterwards. Returns [`Error::Timeout`] right away if an issued operation does not
    /// complete within the poll budget, leaving the writer waiting for it.
    pub fn flush(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        while !self.is_idle() {
            match self.process() {
                Ok(()) => {}
                Err(Error::Timeout) if self.is_waiting() => return Err(Error::Timeout),
                Err(e) => {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// No job in progress and none queued.
    pub fn is_idle(&self) -> bool {
        self.state == WriterState::Ready && self.jobs.is_empty()
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Number of jobs dropped because the queue was full.
    pub fn dropped_jobs(&self) -> u32 {
        self.dropped_jobs
    }

    /// Number of jobs dropped because of a hardware error or timeout.
    pub fn aborted_jobs(&self) -> u32 {
        self.aborted_jobs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &F {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut F {
        &mut self.controller
    }

    /// Returns the controller. Queued jobs are discarded.
    pub fn release(self) -> F {
        self.controller
    }

    fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            WriterState::WaitingForPageErase | WriterState::WaitingForWrite
        )
    }

    fn enter(&mut self, state: WriterState) {
        self.state = state;
        self.busy_polls = 0;
    }

    fn finish(&mut self) {
        self.job = None;
        self.enter(WriterState::Ready);
    }

    fn wait_before_issue(&mut self) -> Result<(), Error> {
        self.busy_polls = self.busy_polls.saturating_add(1);
        if self.busy_polls > self.config.max_busy_polls {
            return self.abort(Error::Timeout);
        }
        Ok(())
    }

    fn wait_for_completion(&mut self) -> Result<(), Error> {
        self.busy_polls = self.busy_polls.saturating_add(1);
        if self.busy_polls > self.config.max_busy_polls {
            #[cfg(feature = "defmt")]
            warn!("flash still busy after {} polls", self.busy_polls);

            return Err(Error::Timeout);
        }
        Ok(())
    }

    fn abort(&mut self, error: Error) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        warn!(
            "aborting job @{:#08x} in state {}: {}",
            self.job.as_ref().map_or(0, Job::address),
            self.state,
            error
        );

        #[cfg(feature = "debug-logs")]
        println!("  FlashWriter: aborting {:?} in {}: {error}", self.job, self.state);

        self.aborted_jobs += 1;
        self.finish();
        Err(error)
    }
}
