#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use wchisp::constants::{commands, config_mask};
use wchisp::error::Result;
use wchisp::{ChipDB, Session, Transport};

/// Test side of a [`MockTransport`]: scripts replies, inspects requests.
#[derive(Clone, Default)]
pub struct Wire {
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    replies: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl Wire {
    pub fn push_raw(&self, raw: Vec<u8>) -> &Self {
        self.replies.borrow_mut().push_back(raw);
        self
    }

    /// Queue a successful response to `cmd`.
    pub fn reply(&self, cmd: u8, payload: &[u8]) -> &Self {
        self.push_raw(frame(cmd, 0, payload))
    }

    pub fn reply_config(&self, mask: u16, data: &[u8]) -> &Self {
        let mut payload = mask.to_le_bytes().to_vec();
        payload.extend_from_slice(data);
        self.reply(commands::READ_CONFIG, &payload)
    }

    /// Replies consumed by `Session::open`.
    pub fn identity(&self, chip_id: u8, device_type: u8, btver: u16, uid: [u8; 8]) -> &Self {
        let [major, minor] = btver.to_be_bytes();
        self.reply(commands::IDENTIFY, &[chip_id, device_type])
            .reply_config(config_mask::BTVER, &[0x00, major, minor, 0x00])
            .reply_config(config_mask::UID, &uid)
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.borrow().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }

    /// Requests sent after the first `skip` ones.
    pub fn sent_since(&self, skip: usize) -> Vec<Vec<u8>> {
        self.sent.borrow()[skip..].to_vec()
    }

    pub fn pending(&self) -> usize {
        self.replies.borrow().len()
    }
}

/// Scripted transport: records every request frame and answers with queued
/// raw response frames. An empty queue behaves like a timeout.
pub struct MockTransport {
    wire: Wire,
}

impl MockTransport {
    pub fn new() -> (Self, Wire) {
        let wire = Wire::default();
        (MockTransport { wire: wire.clone() }, wire)
    }
}

impl Transport for MockTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<usize> {
        self.wire.sent.borrow_mut().push(raw.to_vec());
        Ok(raw.len())
    }

    fn recv_raw(&mut self) -> Result<Vec<u8>> {
        self.wire
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no reply queued").into())
    }
}

pub fn frame(cmd: u8, status: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![cmd, status];
    raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// UID whose byte sum is `checksum`.
pub fn uid_with_checksum(checksum: u8) -> [u8; 8] {
    [checksum, 0, 0, 0, 0, 0, 0, 0]
}

/// Open a session on a scripted device.
pub fn open_session(
    db: &ChipDB,
    chip_id: u8,
    device_type: u8,
    btver: u16,
    uid: [u8; 8],
) -> (Session<MockTransport>, Wire) {
    let (mock, wire) = MockTransport::new();
    wire.identity(chip_id, device_type, btver, uid);
    let session = Session::open(mock, db).unwrap();
    (session, wire)
}

/// Open a session and complete the key exchange (BTVER 2.7, zero reply).
pub fn keyed_session(
    db: &ChipDB,
    chip_id: u8,
    device_type: u8,
    uid: [u8; 8],
) -> (Session<MockTransport>, Wire) {
    let (mut session, wire) = open_session(db, chip_id, device_type, 0x0207, uid);
    wire.reply(commands::ISP_KEY, &[0x00, 0x00]);
    session.key_exchange().unwrap();
    (session, wire)
}
