use crate::common::Operation::{Erase, Write};
use crate::common::{Flash, PAGE_SIZE, WordFlash};
use bytemuck::{Pod, Zeroable};
use nvm_store::PageStorage;
use nvm_store::checksum::byte_sum;
use nvm_store::error::Error;
use pretty_assertions::assert_eq;

mod common;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct Calibration {
    gain: u32,
    offset: i32,
    trim: [u8; 8],
}

const CALIBRATION: Calibration = Calibration {
    gain: 0x0001_2345,
    offset: -42,
    trim: [1, 2, 3, 4, 5, 6, 7, 8],
};

#[test]
fn save_and_load() {
    let mut flash = Flash::new(4);
    let mut storage = PageStorage::new(&mut flash, 4 * PAGE_SIZE as u32, 3).unwrap();
    assert_eq!(storage.base_address(), PAGE_SIZE as u32);
    assert_eq!(storage.pages(), 3);

    storage.save(&CALIBRATION).unwrap();
    assert_eq!(storage.load::<Calibration>(), Ok(CALIBRATION));
    drop(storage);

    flash.clear_reads();
    assert_eq!(
        flash.operations,
        vec![
            Erase {
                offset: PAGE_SIZE as _,
                len: PAGE_SIZE
            },
            Write {
                offset: PAGE_SIZE as _,
                len: 16
            },
            Write {
                offset: PAGE_SIZE as u32 + 16,
                len: 2
            },
        ]
    );

    let base = PAGE_SIZE;
    assert_eq!(
        flash.buf[base..base + 16],
        *bytemuck::bytes_of(&CALIBRATION)
    );
    let checksum = byte_sum(bytemuck::bytes_of(&CALIBRATION));
    assert_eq!(flash.buf[base + 16..base + 18], checksum.to_le_bytes());
    assert!(flash.buf[base + 18..base + PAGE_SIZE].iter().all(|&b| b == 0xFF));
}

#[test]
fn pages_are_independent() {
    let mut flash = Flash::new(3);
    let mut storage = PageStorage::new(&mut flash, 3 * PAGE_SIZE as u32, 3).unwrap();

    let other = Calibration {
        gain: 7,
        ..CALIBRATION
    };
    storage.save_to(&CALIBRATION, 0).unwrap();
    storage.save_to(&other, 2).unwrap();

    assert_eq!(storage.load_from::<Calibration>(0), Ok(CALIBRATION));
    assert_eq!(
        storage.load_from::<Calibration>(1),
        Err(Error::ChecksumMismatch)
    );
    assert_eq!(storage.load_from::<Calibration>(2), Ok(other));

    // saving again replaces the record of that page only
    storage.save_to(&other, 0).unwrap();
    assert_eq!(storage.load_from::<Calibration>(0), Ok(other));
    assert_eq!(storage.load_from::<Calibration>(2), Ok(other));
}

#[test]
fn page_index_out_of_range() {
    let mut flash = Flash::new(2);
    let mut storage = PageStorage::new(&mut flash, 2 * PAGE_SIZE as u32, 2).unwrap();

    assert_eq!(
        storage.save_to(&CALIBRATION, 2),
        Err(Error::InvalidRegion)
    );
    assert_eq!(
        storage.load_from::<Calibration>(2),
        Err(Error::InvalidRegion)
    );
    drop(storage);

    assert_eq!(flash.operations, vec![]);
}

#[test]
fn blank_page_is_rejected() {
    let mut flash = Flash::new(1);
    let mut storage = PageStorage::new(&mut flash, PAGE_SIZE as u32, 1).unwrap();

    assert_eq!(storage.load::<Calibration>(), Err(Error::ChecksumMismatch));
}

#[test]
fn any_corrupted_byte_is_detected() {
    let mut flash = Flash::new(1);
    PageStorage::new(&mut flash, PAGE_SIZE as u32, 1)
        .unwrap()
        .save(&CALIBRATION)
        .unwrap();

    // payload and checksum
    for i in 0..18 {
        let mut corrupted = Flash::new(1);
        corrupted.buf.copy_from_slice(&flash.buf);
        corrupted.buf[i] ^= 0x10;

        let mut storage = PageStorage::new(&mut corrupted, PAGE_SIZE as u32, 1).unwrap();
        assert_eq!(
            storage.load::<Calibration>(),
            Err(Error::ChecksumMismatch),
            "byte {i}"
        );
    }
}

#[test]
fn interrupted_save_is_detected() {
    let mut flash = Flash::new(1);
    let mut storage = PageStorage::new(&mut flash, PAGE_SIZE as u32, 1).unwrap();
    storage.save(&CALIBRATION).unwrap();
    drop(storage);

    // erase and payload succeed, the checksum is never written
    let operations = flash.operations.len();
    flash.fail_after_operation = operations + 2;
    let mut storage = PageStorage::new(&mut flash, PAGE_SIZE as u32, 1).unwrap();
    assert_eq!(
        storage.save(&Calibration {
            gain: 1,
            ..CALIBRATION
        }),
        Err(Error::FlashError)
    );
    drop(storage);

    flash.disable_faults();
    let mut storage = PageStorage::new(&mut flash, PAGE_SIZE as u32, 1).unwrap();
    assert_eq!(storage.load::<Calibration>(), Err(Error::ChecksumMismatch));
}

#[test]
fn invalid_regions() {
    let mut flash = Flash::new(2);

    // not page aligned
    assert_eq!(
        PageStorage::new(&mut flash, 1000, 1).err(),
        Some(Error::InvalidRegion)
    );
    // reaches below address 0
    assert_eq!(
        PageStorage::new(&mut flash, PAGE_SIZE as u32, 2).err(),
        Some(Error::InvalidRegion)
    );
    assert_eq!(
        PageStorage::new(&mut flash, PAGE_SIZE as u32, 0).err(),
        Some(Error::InvalidRegion)
    );
}

#[test]
fn record_must_fit_into_a_page() {
    let mut flash = Flash::new(1);
    let mut storage = PageStorage::new(&mut flash, PAGE_SIZE as u32, 1).unwrap();

    // the checksum does not fit behind the payload anymore
    assert_eq!(storage.save(&[0u8; 1024]), Err(Error::RegionTooSmall));
    assert_eq!(storage.load::<[u8; 1024]>(), Err(Error::RegionTooSmall));
    drop(storage);

    assert_eq!(flash.operations, vec![]);
}

#[test]
fn odd_record_on_word_flash() {
    let mut flash = WordFlash::new(1);
    let mut storage = PageStorage::new(&mut flash, PAGE_SIZE as u32, 1).unwrap();

    let record = [1u8, 2, 3, 4, 5];
    storage.save(&record).unwrap();
    assert_eq!(storage.load::<[u8; 5]>(), Ok(record));
    drop(storage);

    // the checksum sits behind the payload padded to an even size
    assert_eq!(flash.buf[0..8], [1, 2, 3, 4, 5, 0xFF, 15, 0]);
}
