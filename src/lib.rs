#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

extern crate alloc;

mod block;
pub mod checksum;
mod chunk;
pub mod error;
mod non_blocking;
mod page;
pub mod platform;
mod queue;
mod raw;
pub mod writer;

pub use block::BlockStorage;
pub use chunk::{ChunkStorage, Tagged};
pub use non_blocking::NonBlockingStorage;
pub use page::PageStorage;
pub use queue::JobQueue;
pub use writer::{FlashWriter, Job, WriterState};
