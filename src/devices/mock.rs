//! A scripted channel for exercising the protocols without hardware.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Channel, TransportKind};
use crate::errors::TransportError;

/// Everything a test wants to inspect after the channel has been moved into
/// a codec.
#[derive(Debug, Default)]
pub struct Log {
    pub sent: Vec<Vec<u8>>,
    pub control_lines: Vec<(bool, bool)>,
    pub closed: bool,
    pub drained: usize,
}

/// Replays canned responses and records every frame sent.
///
/// NXT style tests queue whole replies; PIC style tests queue a byte stream
/// that `recv` hands out up to `max_len` bytes at a time.
pub struct ScriptedChannel {
    kind: TransportKind,
    max_frame: usize,
    replies: VecDeque<Vec<u8>>,
    log: Rc<RefCell<Log>>,
}

impl ScriptedChannel {
    pub fn new(kind: TransportKind) -> (Self, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let channel = ScriptedChannel {
            kind,
            max_frame: 64,
            replies: VecDeque::new(),
            log: Rc::clone(&log),
        };
        (channel, log)
    }

    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    pub fn replies<I: IntoIterator<Item = Vec<u8>>>(mut self, replies: I) -> Self {
        self.replies.extend(replies);
        self
    }
}

impl Channel for ScriptedChannel {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn max_frame(&self) -> usize {
        self.max_frame
    }

    fn send(&mut self, frame: &[u8]) -> Result<usize, TransportError> {
        self.log.borrow_mut().sent.push(frame.to_vec());
        Ok(frame.len())
    }

    fn recv(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut reply = self.replies.pop_front().ok_or(TransportError::Closed)?;
        if reply.len() > max_len {
            let rest = reply.split_off(max_len);
            self.replies.push_front(rest);
        }
        Ok(reply)
    }

    fn drain(&mut self) -> Result<usize, TransportError> {
        self.log.borrow_mut().drained += 1;
        Ok(0)
    }

    fn set_control_lines(&mut self, rts: bool, dtr: bool) -> Result<(), TransportError> {
        self.log.borrow_mut().control_lines.push((rts, dtr));
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.log.borrow_mut().closed = true;
        Ok(())
    }
}
