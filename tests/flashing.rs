mod common;

use pretty_assertions::assert_eq;

use common::{frame, keyed_session, open_session, uid_with_checksum, Wire};
use wchisp::constants::commands;
use wchisp::device::{Family, Variant};
use wchisp::error::{Error, UserError, ValidationError};
use wchisp::flashing::{FlashState, NoProgress};
use wchisp::key::XorKey;
use wchisp::{ChipDB, FlashOptions, Flashing, ProgressCallbacks};

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn chunk_frame(cmd: u8, key: &XorKey, address: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = address.to_le_bytes().to_vec();
    payload.push(0x00);
    payload.extend(key.apply(address as usize, data));
    let mut raw = vec![cmd];
    raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    raw.extend(payload);
    raw
}

fn ack(wire: &Wire, cmd: u8, count: usize) {
    for _ in 0..count {
        wire.reply(cmd, &[0x00, 0x00]);
    }
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl ProgressCallbacks for Recorder {
    fn init(&mut self, action: &str, total: usize) {
        self.events.push(format!("init {action} {total}"));
    }

    fn update(&mut self, current: usize) {
        self.events.push(format!("update {current}"));
    }

    fn finish(&mut self) {
        self.events.push("finish".to_string());
    }
}

#[test]
fn flash_then_verify_ch552() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, uid_with_checksum(0x10));
    assert_eq!(session.chip().name, "CH552");
    let key = *session.key().unwrap();
    assert_eq!(key.as_bytes()[7], 0x62);

    let img = image(130);
    ack(&wire, commands::ERASE, 1);
    ack(&wire, commands::PROGRAM, 4);
    ack(&wire, commands::VERIFY, 3);

    let skip = wire.sent_count();
    let mut progress = Recorder::default();
    let mut flashing = Flashing::new(&mut session, FlashOptions::default());
    flashing.flash(&img, &mut progress).unwrap();
    assert_eq!(flashing.state(), FlashState::Done);
    assert_eq!(wire.pending(), 0);

    let expected = vec![
        vec![0xa4, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00],
        chunk_frame(0xa5, &key, 0, &img[0..56]),
        chunk_frame(0xa5, &key, 56, &img[56..112]),
        chunk_frame(0xa5, &key, 112, &img[112..130]),
        vec![0xa5, 0x05, 0x00, 0x82, 0x00, 0x00, 0x00, 0x00],
        chunk_frame(0xa6, &key, 0, &img[0..56]),
        chunk_frame(0xa6, &key, 56, &img[56..112]),
        chunk_frame(0xa6, &key, 112, &img[112..130]),
    ];
    assert_eq!(wire.sent_since(skip), expected);

    assert_eq!(
        progress.events,
        vec![
            "init write 130",
            "update 56",
            "update 112",
            "update 130",
            "finish",
            "init verify 130",
            "update 56",
            "update 112",
            "update 130",
            "finish",
        ]
    );
}

#[test]
fn program_payload_is_xored_at_absolute_offset() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, uid_with_checksum(0x10));

    let img = vec![0u8; 60];
    ack(&wire, commands::ERASE, 1);
    ack(&wire, commands::PROGRAM, 3);

    let skip = wire.sent_count();
    Flashing::new(&mut session, FlashOptions { verify: false })
        .flash(&img, &mut NoProgress)
        .unwrap();

    let sent = wire.sent_since(skip);
    // zero bytes come out as the key itself
    let first = &sent[1];
    assert_eq!(first[1], 61);
    assert_eq!(&first[8..16], &[0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x62]);
    let second = &sent[2];
    assert_eq!(&second[3..8], &[56, 0, 0, 0, 0]);
    assert_eq!(&second[8..12], &[0x10, 0x10, 0x10, 0x10]);
}

#[test]
fn no_verify_skips_the_verify_pass() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, uid_with_checksum(0x10));

    ack(&wire, commands::ERASE, 1);
    ack(&wire, commands::PROGRAM, 2);

    let skip = wire.sent_count();
    let mut flashing = Flashing::new(&mut session, FlashOptions { verify: false });
    flashing.flash(&image(10), &mut NoProgress).unwrap();
    assert_eq!(flashing.state(), FlashState::Done);

    let sent = wire.sent_since(skip);
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|raw| raw[0] != commands::VERIFY));
}

#[test]
fn erase_counts_whole_sectors() {
    let db = ChipDB::load().unwrap();
    // CH569, 256 byte sectors
    let (mut session, wire) = keyed_session(&db, 0x69, 0x10, [0; 8]);

    ack(&wire, commands::ERASE, 1);
    ack(&wire, commands::PROGRAM, 11);

    let skip = wire.sent_count();
    Flashing::new(&mut session, FlashOptions { verify: false })
        .flash(&image(513), &mut NoProgress)
        .unwrap();
    assert_eq!(
        wire.sent_since(skip)[0],
        vec![0xa4, 0x04, 0x00, 0x03, 0x00, 0x00, 0x00]
    );
}

#[test]
fn oversized_image_is_rejected_before_io() {
    let db = ChipDB::from_families(vec![Family {
        name: "Tiny".to_string(),
        device_type: 0x42,
        flash_sector_size: 256,
        description: String::new(),
        variants: vec![Variant {
            name: "TINY1".to_string(),
            chip_id: 0x01,
            flash_size: 1024,
            eeprom_size: 0,
        }],
    }]);
    let (mut session, wire) = keyed_session(&db, 0x01, 0x42, [0; 8]);
    assert_eq!(session.chip().flash_size, 1024);

    let skip = wire.sent_count();
    let err = Flashing::new(&mut session, FlashOptions::default())
        .flash(&image(2048), &mut NoProgress)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::User(UserError::ImageTooLarge {
            size: 2048,
            flash_size: 1024
        })
    ));
    assert_eq!(wire.sent_count(), skip);
}

#[test]
fn flash_requires_key_exchange() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = open_session(&db, 0x52, 0x11, 0x0207, [0; 8]);

    let skip = wire.sent_count();
    let err = Flashing::new(&mut session, FlashOptions::default())
        .flash(&image(10), &mut NoProgress)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::KeyNotExchanged)
    ));
    assert_eq!(wire.sent_count(), skip);
}

#[test]
fn erase_failure_stops_the_sequence() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, [0; 8]);

    wire.push_raw(frame(commands::ERASE, 0xfe, &[]));
    let skip = wire.sent_count();
    let mut flashing = Flashing::new(&mut session, FlashOptions::default());
    let err = flashing.flash(&image(10), &mut NoProgress).unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DeviceStatus {
            command: 0xa4,
            status: 0xfe
        })
    ));
    assert_eq!(flashing.state(), FlashState::Idle);
    assert_eq!(wire.sent_since(skip).len(), 1);
}

#[test]
fn erase_nack_is_rejected() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, [0; 8]);

    wire.reply(commands::ERASE, &[0x01, 0x00]);
    let err = Flashing::new(&mut session, FlashOptions::default())
        .flash(&image(10), &mut NoProgress)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::Nack { command: 0xa4, .. })
    ));
}

#[test]
fn program_failure_reports_chunk_address() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, [0; 8]);

    ack(&wire, commands::ERASE, 1);
    ack(&wire, commands::PROGRAM, 1);
    wire.reply(commands::PROGRAM, &[0xfe, 0x00]);

    let skip = wire.sent_count();
    let err = Flashing::new(&mut session, FlashOptions::default())
        .flash(&image(130), &mut NoProgress)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Program {
            address: 56,
            status: [0xfe, 0x00]
        }
    ));
    // no further chunks after the failing one
    assert_eq!(wire.sent_since(skip).len(), 3);
}

#[test]
fn verify_mismatch_reports_chunk_address() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, [0; 8]);

    ack(&wire, commands::VERIFY, 2);
    wire.reply(commands::VERIFY, &[0xf5, 0x00]);

    let mut flashing = Flashing::new(&mut session, FlashOptions::default());
    let err = flashing.verify(&image(130), &mut NoProgress).unwrap_err();
    assert!(matches!(
        err,
        Error::Verify {
            address: 112,
            status: [0xf5, 0x00]
        }
    ));
    assert_eq!(flashing.state(), FlashState::Verifying);
}

#[test]
fn data_flash_round_trip_frames() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x52, 0x11, uid_with_checksum(0x10));
    assert_eq!(session.chip().eeprom_size, 128);
    let key = *session.key().unwrap();

    ack(&wire, commands::DATA_ERASE, 1);
    ack(&wire, commands::DATA_PROGRAM, 1);
    wire.reply(commands::DATA_READ, &[0xaa, 0xbb, 0xcc, 0xdd]);

    let skip = wire.sent_count();
    let mut flashing = Flashing::new(&mut session, FlashOptions::default());
    flashing.write_data(&[1, 2, 3, 4], &mut NoProgress).unwrap();
    assert_eq!(
        flashing.read_data(0, 4).unwrap(),
        vec![0xaa, 0xbb, 0xcc, 0xdd]
    );

    let sent = wire.sent_since(skip);
    assert_eq!(sent[0], vec![0xa9, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00]);
    assert_eq!(
        sent[1],
        chunk_frame(commands::DATA_PROGRAM, &key, 0, &[1, 2, 3, 4])
    );
    assert_eq!(&sent[1][3..8], &[0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(&sent[1][8..], &[0x11, 0x12, 0x13, 0x14]);
    assert_eq!(
        sent[2],
        vec![0xab, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00]
    );
}

#[test]
fn data_flash_write_spans_sectors() {
    let db = ChipDB::load().unwrap();
    // CH558, 5K data flash
    let (mut session, wire) = keyed_session(&db, 0x58, 0x11, uid_with_checksum(0x10));
    assert_eq!(session.chip().eeprom_size, 5 * 1024);
    let key = *session.key().unwrap();

    let data = image(2100);
    ack(&wire, commands::DATA_ERASE, 1);
    ack(&wire, commands::DATA_PROGRAM, 38);

    let skip = wire.sent_count();
    Flashing::new(&mut session, FlashOptions::default())
        .write_data(&data, &mut NoProgress)
        .unwrap();
    assert_eq!(wire.pending(), 0);

    let sent = wire.sent_since(skip);
    assert_eq!(sent.len(), 39);
    assert_eq!(sent[0], vec![0xa9, 0x04, 0x00, 0x03, 0x00, 0x00, 0x00]);
    assert_eq!(
        sent[38],
        chunk_frame(commands::DATA_PROGRAM, &key, 2072, &data[2072..])
    );
}

#[test]
fn data_flash_needs_eeprom() {
    let db = ChipDB::load().unwrap();
    let (mut session, wire) = keyed_session(&db, 0x33, 0x15, [0; 8]);

    let skip = wire.sent_count();
    let err = Flashing::new(&mut session, FlashOptions::default())
        .write_data(&[1, 2, 3], &mut NoProgress)
        .unwrap_err();
    assert!(matches!(err, Error::User(UserError::NoDataFlash(_))));
    assert_eq!(wire.sent_count(), skip);
}
