//! In-memory transport whose bodies can be held at a byte offset, making
//! pause, cancel and concurrency behavior deterministic in tests.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::error::{Error, Result};

use super::transport::{TransferRequest, TransferResponse, Transport};

#[derive(Debug)]
pub struct Hold {
    at: usize,
    released: Mutex<bool>,
    changed: Condvar,
}

impl Hold {
    pub fn release(&self) {
        *self.released.lock() = true;
        self.changed.notify_all();
    }

    fn is_released(&self) -> bool {
        *self.released.lock()
    }

    fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.changed.wait(&mut released);
        }
    }
}

#[derive(Clone)]
struct Script {
    body: Arc<Vec<u8>>,
    status: u16,
    honor_range: bool,
    /// Answer ranged requests with 206 starting at this byte instead of the offset.
    range_from: Option<usize>,
    served_len: usize,
    hold: Option<Arc<Hold>>,
    /// At most this many bytes per read, each read preceded by the delay.
    pace: Option<(usize, Duration)>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    offsets: Mutex<HashMap<String, Vec<u64>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, url: &str, script: Script) {
        self.scripts.lock().insert(url.to_string(), script);
    }

    fn script(body: Vec<u8>) -> Script {
        let served_len = body.len();
        Script {
            body: Arc::new(body),
            status: 200,
            honor_range: true,
            range_from: None,
            served_len,
            hold: None,
            pace: None,
        }
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.insert(url, Self::script(body));
    }

    pub fn serve_ignoring_range(&self, url: &str, body: Vec<u8>) {
        let mut script = Self::script(body);
        script.honor_range = false;
        self.insert(url, script);
    }

    /// Answers ranged requests with 206 but a body that starts at `from`.
    pub fn serve_misaligned_range(&self, url: &str, body: Vec<u8>, from: usize) {
        let mut script = Self::script(body);
        script.range_from = Some(from);
        self.insert(url, script);
    }

    /// Advertises the full length but ends the body after `served_len` bytes.
    pub fn serve_truncated(&self, url: &str, body: Vec<u8>, served_len: usize) {
        let mut script = Self::script(body);
        script.served_len = served_len;
        self.insert(url, script);
    }

    /// Blocks readers once they reach byte `at` until the hold is released.
    pub fn serve_held(&self, url: &str, body: Vec<u8>, at: usize) -> Arc<Hold> {
        let hold = Arc::new(Hold {
            at,
            released: Mutex::new(false),
            changed: Condvar::new(),
        });
        let mut script = Self::script(body);
        script.hold = Some(hold.clone());
        self.insert(url, script);
        hold
    }

    /// Trickles the body out `chunk` bytes at a time, sleeping `delay` per read.
    pub fn serve_paced(&self, url: &str, body: Vec<u8>, chunk: usize, delay: Duration) {
        let mut script = Self::script(body);
        script.pace = Some((chunk, delay));
        self.insert(url, script);
    }

    pub fn fail(&self, url: &str, status: u16) {
        let mut script = Self::script(Vec::new());
        script.status = status;
        self.insert(url, script);
    }

    /// Offsets requested for `url`, in request order.
    pub fn offsets(&self, url: &str) -> Vec<u64> {
        self.offsets.lock().get(url).cloned().unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, request: &TransferRequest<'_>) -> Result<TransferResponse> {
        self.offsets
            .lock()
            .entry(request.url.to_string())
            .or_default()
            .push(request.offset);
        let script = self
            .scripts
            .lock()
            .get(request.url)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no script for {}", request.url)))?;

        let total = script.body.len() as u64;
        if script.status != 200 {
            return Ok(TransferResponse {
                status: script.status,
                content_length: Some(0),
                range_start: None,
                range_total: None,
                body: Box::new(std::io::empty()),
            });
        }
        let ranged = script.honor_range && request.offset > 0;
        let start = match (ranged, script.range_from) {
            (true, Some(from)) => from,
            (true, None) => request.offset as usize,
            (false, _) => 0,
        };
        Ok(TransferResponse {
            status: if ranged { 206 } else { 200 },
            content_length: Some(total - start as u64),
            range_start: ranged.then_some(start as u64),
            range_total: ranged.then_some(total),
            body: Box::new(ScriptedBody {
                data: script.body,
                pos: start,
                end: script.served_len,
                hold: script.hold,
                pace: script.pace,
            }),
        })
    }
}

struct ScriptedBody {
    data: Arc<Vec<u8>>,
    pos: usize,
    end: usize,
    hold: Option<Arc<Hold>>,
    pace: Option<(usize, Duration)>,
}

impl Read for ScriptedBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut limit = self.end;
        if let Some(hold) = &self.hold {
            if self.pos == hold.at {
                hold.wait();
            } else if self.pos < hold.at && !hold.is_released() {
                limit = limit.min(hold.at);
            }
        }
        if self.pos >= limit {
            return Ok(0);
        }
        let mut len = buf.len().min(limit - self.pos);
        if let Some((chunk, delay)) = self.pace {
            thread::sleep(delay);
            len = len.min(chunk);
        }
        buf[..len].copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(len)
    }
}
