/*
    fluxvault
    https://github.com/dbalsom/fluxvault

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/hardware/mock.rs

    In-memory Greaseweazle device for exercising the serial protocol without hardware.
*/

//! [MockGreaseweazle] implements [std::io::Read] and [std::io::Write] and answers the command set
//! of [crate::hardware::greaseweazle] from an in-memory set of tracks. Clones share the same
//! device state, so a test can hand one clone to an adapter and inspect the device through
//! another.

use crate::{
    flux::FluxBuffer,
    hardware::greaseweazle::*,
    DiskImageError,
};
use binrw::BinWrite;
use std::{
    collections::{BTreeMap, VecDeque},
    io::{self, Cursor, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
};

const CHUNK_LEN: usize = 255;

#[derive(Default)]
struct MockState {
    sample_freq: u32,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    sent: Vec<u8>,
    cylinder: u8,
    head: u8,
    motor: bool,
    write_protected: bool,
    silent: bool,
    /// Number of commands answered before the device disconnects.
    disconnect_after: Option<usize>,
    disconnected: bool,
    commands: usize,
    /// Revolutions returned for each track. The front entry is consumed by each read until one
    /// remains.
    tracks: BTreeMap<(u8, u8), VecDeque<Vec<u32>>>,
    written: BTreeMap<(u8, u8), (Vec<u32>, Vec<usize>)>,
    pending_read: Option<Vec<u8>>,
    write_stream: bool,
}

impl MockState {
    fn respond(&mut self, payload: &[u8]) {
        self.outbox.push_back(payload.len() as u8);
        self.outbox.extend(payload.iter().copied());
    }

    fn ack(&mut self) {
        self.respond(&[ACK]);
    }

    fn nak(&mut self, code: u8) {
        self.respond(&[NAK, code]);
    }

    fn process(&mut self) {
        loop {
            if self.write_stream {
                let Some(end) = self.inbox.iter().position(|&b| b == FLUX_END)
                else {
                    return;
                };
                let stream: Vec<u8> = self.inbox.drain(..=end).collect();
                match decode_flux(&stream) {
                    Ok(decoded) => {
                        self.written.insert((self.cylinder, self.head), decoded);
                    }
                    Err(e) => log::warn!("MockGreaseweazle::process(): bad write stream: {}", e),
                }
                self.write_stream = false;
                continue;
            }
            if self.inbox.len() < 2 || self.inbox.len() < self.inbox[1] as usize {
                return;
            }
            let cmd = self.inbox[0];
            let len = (self.inbox[1] as usize).max(2);
            let params: Vec<u8> = self.inbox.drain(..len).skip(2).collect();
            self.handle(cmd, &params);
        }
    }

    fn handle(&mut self, cmd: u8, params: &[u8]) {
        self.commands += 1;
        if let Some(limit) = self.disconnect_after {
            if self.commands > limit {
                self.disconnected = true;
                return;
            }
        }
        if self.silent {
            return;
        }
        match cmd {
            CMD_GET_INFO => {
                let info = GwInfo {
                    fw_major: 1,
                    fw_minor: 4,
                    is_main_firmware: 1,
                    max_cmd: CMD_RESET,
                    hw_model: 7,
                    hw_submodel: 1,
                    usb_speed: 1,
                    reserved: 0,
                    sample_freq: self.sample_freq,
                };
                let mut payload = Cursor::new(vec![ACK]);
                payload.set_position(1);
                if info.write(&mut payload).is_err() {
                    self.nak(NAK_BAD_COMMAND);
                    return;
                }
                let mut payload = payload.into_inner();
                payload.resize(1 + INFO_LEN, 0);
                self.respond(&payload);
            }
            CMD_SEEK => match params.first() {
                Some(&cylinder) => {
                    self.cylinder = cylinder;
                    self.ack();
                }
                None => self.nak(NAK_BAD_COMMAND),
            },
            CMD_HEAD => match params.first() {
                Some(&head) if head < 2 => {
                    self.head = head;
                    self.ack();
                }
                _ => self.nak(NAK_BAD_COMMAND),
            },
            CMD_MOTOR => match params.get(1) {
                Some(&on) => {
                    self.motor = on != 0;
                    self.ack();
                }
                None => self.nak(NAK_BAD_COMMAND),
            },
            CMD_RESET => {
                self.motor = false;
                self.pending_read = None;
                self.ack();
            }
            CMD_READ_FLUX => {
                let Some(&revolutions) = params.get(3)
                else {
                    self.nak(NAK_BAD_COMMAND);
                    return;
                };
                if !self.motor {
                    self.nak(NAK_NO_INDEX);
                    return;
                }
                let revolution = match self.tracks.get_mut(&(self.cylinder, self.head)) {
                    Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
                    Some(queue) => queue.front().cloned().unwrap_or_default(),
                    None => Vec::new(),
                };
                let mut deltas = Vec::with_capacity(revolution.len() * revolutions as usize);
                let mut index = vec![0];
                for _ in 0..revolutions {
                    deltas.extend_from_slice(&revolution);
                    index.push(deltas.len());
                }
                match encode_flux(&deltas, &index) {
                    Ok(mut stream) => {
                        stream.push(FLUX_END);
                        self.pending_read = Some(stream);
                        self.ack();
                    }
                    Err(_) => self.nak(NAK_FLUX_OVERFLOW),
                }
            }
            CMD_GET_FLUX => {
                let Some(stream) = self.pending_read.take()
                else {
                    self.nak(NAK_BAD_COMMAND);
                    return;
                };
                self.ack();
                // The terminating zero byte is sent as its own chunk.
                let body = &stream[..stream.len().saturating_sub(1)];
                for chunk in body.chunks(CHUNK_LEN) {
                    self.respond(chunk);
                }
                self.respond(&[FLUX_END]);
            }
            CMD_WRITE_FLUX => {
                if self.write_protected {
                    self.nak(NAK_WRPROT);
                    return;
                }
                self.write_stream = true;
                self.ack();
            }
            CMD_GET_FLUX_STATUS => self.ack(),
            _ => self.nak(NAK_BAD_COMMAND),
        }
    }
}

/// A simulated Greaseweazle reachable through [std::io::Read] and [std::io::Write].
#[derive(Clone)]
pub struct MockGreaseweazle {
    state: Arc<Mutex<MockState>>,
}

impl MockGreaseweazle {
    pub fn new(sample_freq: u32) -> Self {
        MockGreaseweazle {
            state: Arc::new(Mutex::new(MockState {
                sample_freq,
                ..MockState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sample_freq(&self) -> u32 {
        self.state().sample_freq
    }

    /// Set the flux returned when a track is read: one revolution of gaps in sample ticks.
    pub fn insert_track(&self, cylinder: u8, head: u8, revolution: Vec<u32>) {
        self.state().tracks.insert((cylinder, head), VecDeque::from(vec![revolution]));
    }

    /// Queue different flux for successive reads of a track. The last entry repeats.
    pub fn queue_reads(&self, cylinder: u8, head: u8, reads: Vec<Vec<u32>>) {
        self.state().tracks.insert((cylinder, head), VecDeque::from(reads));
    }

    /// Insert the first revolution of a flux buffer, rescaled to the device clock.
    pub fn insert_flux(&self, cylinder: u8, head: u8, flux: &FluxBuffer) -> Result<(), DiskImageError> {
        let scale = self.sample_freq() as f64 / flux.sample_clock();
        let revolution = flux
            .revolution(0)
            .ok_or_else(|| DiskImageError::parameter("flux buffer is empty"))?
            .iter()
            .map(|&d| ((d as f64 * scale).round() as u32).max(1))
            .collect();
        self.insert_track(cylinder, head, revolution);
        Ok(())
    }

    /// The flux written to a track, if any.
    pub fn written_track(&self, cylinder: u8, head: u8) -> Option<FluxBuffer> {
        let state = self.state();
        let (deltas, index) = state.written.get(&(cylinder, head))?;
        FluxBuffer::from_deltas(state.sample_freq as f64, deltas, index.clone()).ok()
    }

    /// Every byte written to the device so far.
    pub fn sent(&self) -> Vec<u8> {
        self.state().sent.clone()
    }

    pub fn motor_on(&self) -> bool {
        self.state().motor
    }

    /// The current (cylinder, head) position.
    pub fn position(&self) -> (u8, u8) {
        let state = self.state();
        (state.cylinder, state.head)
    }

    pub fn set_write_protected(&self, protected: bool) {
        self.state().write_protected = protected;
    }

    /// A silent device accepts commands but never answers.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Disconnect after answering `commands` more commands.
    pub fn disconnect_after(&self, commands: usize) {
        let mut state = self.state();
        state.disconnect_after = Some(state.commands + commands);
    }
}

impl Write for MockGreaseweazle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
        }
        state.sent.extend_from_slice(buf);
        state.inbox.extend_from_slice(buf);
        state.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockGreaseweazle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.outbox.is_empty() && state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
        }
        let n = buf.len().min(state.outbox.len());
        for (dst, src) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_flux_ends_with_zero_chunk() {
        let mut mock = MockGreaseweazle::new(24_000_000);
        mock.insert_track(0, 0, vec![100; 600]);
        mock.write_all(&[CMD_MOTOR, 4, 0, 1, CMD_READ_FLUX, 6, 0, 0, 0, 1, CMD_GET_FLUX, 2])
            .unwrap();
        let mut out = Vec::new();
        mock.read_to_end(&mut out).unwrap();
        // Two acks, the GET_FLUX ack, then chunks.
        assert_eq!(&out[..6], &[1, ACK, 1, ACK, 1, ACK]);
        assert_eq!(out[6], 255);
        assert_eq!(&out[out.len() - 2..], &[1, FLUX_END]);
    }

    #[test]
    fn test_disconnect() {
        let mut mock = MockGreaseweazle::new(24_000_000);
        mock.disconnect_after(1);
        mock.write_all(&[CMD_RESET, 2]).unwrap();
        mock.write_all(&[CMD_RESET, 2]).unwrap();
        let mut ack = [0u8; 2];
        mock.read_exact(&mut ack).unwrap();
        assert_eq!(ack, [1, ACK]);
        assert!(mock.write_all(&[CMD_RESET, 2]).is_err());
    }
}
