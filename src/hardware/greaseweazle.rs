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

    src/hardware/greaseweazle.rs

    Greaseweazle-class USB serial flux interface.
*/

//! Greaseweazle-class devices speak a simple command protocol over a USB serial port.
//!
//! A command is written as `[cmd, len, params...]`, where `len` counts the whole frame. A
//! response is read as `[len, payload...]`, where `len` counts the payload and the first payload
//! byte is [ACK] or [NAK]. A NAK is followed by an error code.
//!
//! Flux is transferred as a byte stream. Bytes 1..=249 are literal gaps in sample ticks, bytes
//! 250..=254 start a two-byte gap, and 255 starts an opcode followed by a 28-bit value packed
//! into four bytes. [FLUXOP_INDEX] marks an index pulse and [FLUXOP_SPACE] adds ticks to the next
//! gap. A zero byte ends the stream. [CMD_GET_FLUX] returns the stream in length-prefixed chunks;
//! a chunk holding a single zero byte ends the transfer.

use crate::{
    file_parsers::DiskImageFileFormat,
    flux::FluxBuffer,
    format_ms,
    hardware::{AdapterCaps, AdapterInfo, CancelFlag, HardwareAdapter},
    io::Cursor,
    types::TrackKey,
    DiskImageError,
};
use binrw::{binrw, BinRead};
use std::{
    fs::OpenOptions,
    io::{Read, Write},
    path::PathBuf,
    time::{Duration, Instant},
};

pub const CMD_GET_INFO: u8 = 0x00;
pub const CMD_SEEK: u8 = 0x0A;
pub const CMD_HEAD: u8 = 0x0B;
pub const CMD_READ_FLUX: u8 = 0x0C;
pub const CMD_WRITE_FLUX: u8 = 0x0D;
pub const CMD_GET_FLUX: u8 = 0x0E;
pub const CMD_GET_FLUX_STATUS: u8 = 0x10;
pub const CMD_MOTOR: u8 = 0x11;
pub const CMD_RESET: u8 = 0x19;

pub const ACK: u8 = 0x4F;
pub const NAK: u8 = 0x4E;

pub const NAK_BAD_COMMAND: u8 = 1;
pub const NAK_NO_INDEX: u8 = 2;
pub const NAK_NO_TRK0: u8 = 3;
pub const NAK_FLUX_OVERFLOW: u8 = 4;
pub const NAK_FLUX_UNDERFLOW: u8 = 5;
pub const NAK_WRPROT: u8 = 6;
pub const NAK_NO_UNIT: u8 = 7;

pub const FLUX_OPCODE: u8 = 0xFF;
pub const FLUXOP_INDEX: u8 = 1;
pub const FLUXOP_SPACE: u8 = 2;
pub const FLUX_END: u8 = 0;

/// Largest gap encoded as a single byte.
const MAX_LITERAL: u32 = 249;
/// Largest gap encoded in two bytes.
const MAX_TWO_BYTE: u32 = 250 + 5 * 255 - 1;
/// Largest value carried by an opcode.
const MAX_N28: u32 = (1 << 28) - 1;
/// Upper bound on a flux stream transfer.
const MAX_STREAM_LEN: usize = 64 * 1024 * 1024;
/// Length of the GET_INFO payload following the ack byte.
pub const INFO_LEN: usize = 32;
/// Serial read timeout in tenths of a second.
#[cfg(unix)]
const SERIAL_POLL_DECISECONDS: libc::cc_t = 1;

/// A byte transport to a device. Anything readable and writable will do: a serial port opened as
/// a file, or an in-memory mock.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// The firmware information block returned by [CMD_GET_INFO].
#[derive(Debug, Default, Clone, PartialEq)]
#[binrw]
#[brw(little)]
pub struct GwInfo {
    pub fw_major: u8,
    pub fw_minor: u8,
    pub is_main_firmware: u8,
    pub max_cmd: u8,
    pub hw_model: u8,
    pub hw_submodel: u8,
    pub usb_speed: u8,
    pub reserved: u8,
    pub sample_freq: u32,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GreaseweazleConfig {
    /// Path of the serial device.
    pub device: PathBuf,
    /// How long to wait for each response.
    pub timeout: Duration,
    /// Drive unit to select.
    pub drive: u8,
}

impl Default for GreaseweazleConfig {
    fn default() -> Self {
        GreaseweazleConfig {
            device: PathBuf::from("/dev/ttyACM0"),
            timeout: Duration::from_secs(3),
            drive: 0,
        }
    }
}

fn nak_detail(code: Option<u8>) -> &'static str {
    match code {
        Some(NAK_BAD_COMMAND) => "bad command",
        Some(NAK_NO_INDEX) => "no index pulse",
        Some(NAK_NO_TRK0) => "track 0 not found",
        Some(NAK_FLUX_OVERFLOW) => "flux overflow",
        Some(NAK_FLUX_UNDERFLOW) => "flux underflow",
        Some(NAK_WRPROT) => "disk is write protected",
        Some(NAK_NO_UNIT) => "no drive unit",
        _ => "unknown error",
    }
}

fn push_n28(out: &mut Vec<u8>, value: u32) {
    out.push(1 | ((value << 1) & 0xFF) as u8);
    out.push(1 | ((value >> 6) & 0xFE) as u8);
    out.push(1 | ((value >> 13) & 0xFE) as u8);
    out.push(1 | ((value >> 20) & 0xFE) as u8);
}

fn read_n28(bytes: &[u8]) -> u32 {
    (bytes[0] as u32 >> 1) | ((bytes[1] as u32 >> 1) << 7) | ((bytes[2] as u32 >> 1) << 14) | ((bytes[3] as u32 >> 1) << 21)
}

/// Encode gaps in sample ticks into a flux stream. `index` holds the transition positions at
/// which an index pulse occurs. The end-of-stream byte is not appended.
pub fn encode_flux(deltas: &[u32], index: &[usize]) -> Result<Vec<u8>, DiskImageError> {
    let mut out = Vec::with_capacity(deltas.len() + 16);
    let mut index_iter = index.iter().peekable();
    for (i, &delta) in deltas.iter().enumerate() {
        while index_iter.next_if(|&&idx| idx <= i).is_some() {
            out.push(FLUX_OPCODE);
            out.push(FLUXOP_INDEX);
            push_n28(&mut out, 0);
        }
        let mut value = delta;
        if value == 0 {
            return Err(DiskImageError::parameter("Zero-length flux gap"));
        }
        if value > MAX_TWO_BYTE {
            let space = value - MAX_LITERAL;
            if space > MAX_N28 {
                return Err(DiskImageError::parameter(format!("Flux gap of {} ticks is too long", value)));
            }
            out.push(FLUX_OPCODE);
            out.push(FLUXOP_SPACE);
            push_n28(&mut out, space);
            value = MAX_LITERAL;
        }
        if value <= MAX_LITERAL {
            out.push(value as u8);
        }
        else {
            let x = value - 250;
            out.push(250 + (x / 255) as u8);
            out.push(1 + (x % 255) as u8);
        }
    }
    for _ in index_iter {
        out.push(FLUX_OPCODE);
        out.push(FLUXOP_INDEX);
        push_n28(&mut out, 0);
    }
    Ok(out)
}

/// Decode a flux stream into gaps in sample ticks and index pulse positions. Decoding stops at
/// the first end-of-stream byte.
pub fn decode_flux(stream: &[u8]) -> Result<(Vec<u32>, Vec<usize>), DiskImageError> {
    let mut deltas = Vec::with_capacity(stream.len());
    let mut index = Vec::new();
    let mut pending: u32 = 0;
    let mut i = 0;

    let truncated = || DiskImageError::format("Truncated Greaseweazle flux stream");
    while i < stream.len() {
        match stream[i] {
            FLUX_END => break,
            b @ 1..=249 => {
                deltas.push(pending.saturating_add(b as u32));
                pending = 0;
                i += 1;
            }
            b @ 250..=254 => {
                let Some(&b1) = stream.get(i + 1)
                else {
                    return Err(truncated());
                };
                if b1 == 0 {
                    return Err(DiskImageError::format("Invalid two-byte flux value"));
                }
                let value = 250 + (b as u32 - 250) * 255 + (b1 as u32 - 1);
                deltas.push(pending.saturating_add(value));
                pending = 0;
                i += 2;
            }
            _ => {
                let Some(op) = stream.get(i + 1..i + 6)
                else {
                    return Err(truncated());
                };
                let value = read_n28(&op[1..]);
                match op[0] {
                    FLUXOP_INDEX => index.push(deltas.len()),
                    FLUXOP_SPACE => {
                        pending = pending
                            .checked_add(value)
                            .ok_or_else(|| DiskImageError::format("Flux space overflowed"))?;
                    }
                    other => {
                        return Err(DiskImageError::format(format!("Unknown flux opcode {}", other)));
                    }
                }
                i += 6;
            }
        }
    }
    Ok((deltas, index))
}

pub struct GreaseweazleAdapter {
    config: GreaseweazleConfig,
    transport: Option<Box<dyn Transport>>,
    /// Set when the transport was opened from the configured device path.
    owns_port: bool,
    info: Option<GwInfo>,
    motor_on: bool,
}

impl Default for GreaseweazleAdapter {
    fn default() -> Self {
        GreaseweazleAdapter::new(GreaseweazleConfig::default())
    }
}

impl GreaseweazleAdapter {
    pub const NAME: &'static str = "greaseweazle";

    pub fn new(config: GreaseweazleConfig) -> Self {
        GreaseweazleAdapter {
            config,
            transport: None,
            owns_port: false,
            info: None,
            motor_on: false,
        }
    }

    /// Create an adapter talking over an already open transport.
    pub fn with_transport(config: GreaseweazleConfig, transport: Box<dyn Transport>) -> Self {
        GreaseweazleAdapter {
            transport: Some(transport),
            ..GreaseweazleAdapter::new(config)
        }
    }

    pub fn config(&self) -> &GreaseweazleConfig {
        &self.config
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, DiskImageError> {
        self.transport
            .as_mut()
            .ok_or_else(|| DiskImageError::device("Greaseweazle device is not open"))
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8]) -> Result<(), DiskImageError> {
        let timeout = self.config.timeout;
        let transport = self.transport()?;
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            match transport.read(&mut buf[filled..]) {
                Ok(0) => {}
                Ok(n) => {
                    filled += n;
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(DiskImageError::Timeout(format!(
                    "no response from Greaseweazle within {}",
                    format_ms!(timeout.as_secs_f64())
                )));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, DiskImageError> {
        let mut byte = [0u8; 1];
        self.read_exact_timeout(&mut byte)?;
        Ok(byte[0])
    }

    /// Read one length-prefixed response frame.
    fn read_frame(&mut self) -> Result<Vec<u8>, DiskImageError> {
        let len = self.read_byte()? as usize;
        let mut payload = vec![0u8; len];
        self.read_exact_timeout(&mut payload)?;
        Ok(payload)
    }

    /// Send a command and return the response payload following the ack byte.
    fn command(&mut self, cmd: u8, params: &[u8]) -> Result<Vec<u8>, DiskImageError> {
        if params.len() > 253 {
            return Err(DiskImageError::parameter("Greaseweazle command parameters are too long"));
        }
        let mut frame = Vec::with_capacity(params.len() + 2);
        frame.push(cmd);
        frame.push((params.len() + 2) as u8);
        frame.extend_from_slice(params);
        log::trace!("GreaseweazleAdapter::command(): {:02X?}", frame);
        let transport = self.transport()?;
        transport.write_all(&frame)?;
        transport.flush()?;

        let payload = self.read_frame()?;
        match payload.first() {
            Some(&ACK) => Ok(payload[1..].to_vec()),
            Some(&NAK) => {
                let code = payload.get(1).copied();
                log::warn!(
                    "GreaseweazleAdapter::command(): command {:02X} rejected: {}",
                    cmd,
                    nak_detail(code)
                );
                match code {
                    Some(NAK_WRPROT) => Err(DiskImageError::WriteProtect(nak_detail(code).to_string())),
                    _ => Err(DiskImageError::device(format!(
                        "command {:02X} rejected: {}",
                        cmd,
                        nak_detail(code)
                    ))),
                }
            }
            _ => Err(DiskImageError::device(format!(
                "malformed response to command {:02X}",
                cmd
            ))),
        }
    }

    fn open(&mut self) -> Result<(), DiskImageError> {
        if self.transport.is_some() {
            return Ok(());
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOCTTY);
        }
        let port = options
            .open(&self.config.device)
            .map_err(|e| DiskImageError::io(format!("{}: {}", self.config.device.display(), e)))?;
        #[cfg(unix)]
        set_raw_mode(&port)
            .map_err(|e| DiskImageError::io(format!("{}: {}", self.config.device.display(), e)))?;
        log::debug!("GreaseweazleAdapter::open(): opened {}", self.config.device.display());
        self.transport = Some(Box::new(port));
        self.owns_port = true;
        Ok(())
    }

    /// Query and cache the firmware information block.
    pub fn device_info(&mut self) -> Result<GwInfo, DiskImageError> {
        if let Some(info) = &self.info {
            return Ok(info.clone());
        }
        let payload = self.command(CMD_GET_INFO, &[0])?;
        let info = GwInfo::read(&mut Cursor::new(&payload))?;
        if info.sample_freq == 0 {
            return Err(DiskImageError::device("device reported a zero sample frequency"));
        }
        log::debug!(
            "GreaseweazleAdapter::device_info(): firmware {}.{} model {}.{} sample clock {}Hz",
            info.fw_major,
            info.fw_minor,
            info.hw_model,
            info.hw_submodel,
            info.sample_freq
        );
        self.info = Some(info.clone());
        Ok(info)
    }

    fn set_motor(&mut self, on: bool) -> Result<(), DiskImageError> {
        if self.motor_on == on {
            return Ok(());
        }
        self.command(CMD_MOTOR, &[self.config.drive, on as u8])?;
        self.motor_on = on;
        Ok(())
    }

    fn seek(&mut self, key: TrackKey) -> Result<(), DiskImageError> {
        if key.half_step {
            return Err(DiskImageError::not_implemented(format!(
                "{}: half-step positioning on a Greaseweazle",
                key
            )));
        }
        let cylinder = u8::try_from(key.ch.c())
            .map_err(|_| DiskImageError::parameter(format!("cylinder {} is out of range", key.ch.c())))?;
        self.command(CMD_SEEK, &[cylinder])?;
        self.command(CMD_HEAD, &[key.ch.h()])?;
        Ok(())
    }

    /// Collect the chunks of a flux stream after [CMD_GET_FLUX].
    fn get_flux(&mut self) -> Result<Vec<u8>, DiskImageError> {
        self.command(CMD_GET_FLUX, &[])?;
        let mut stream = Vec::new();
        loop {
            let chunk = self.read_frame()?;
            if chunk.as_slice() == [FLUX_END] {
                break;
            }
            if stream.len() + chunk.len() > MAX_STREAM_LEN {
                return Err(DiskImageError::ResourceExhausted("flux stream is too large".to_string()));
            }
            stream.extend_from_slice(&chunk);
        }
        Ok(stream)
    }

    fn interrupted(&mut self, cancel: &CancelFlag) -> Result<(), DiskImageError> {
        if let Err(e) = cancel.check() {
            self.release_drive();
            return Err(e);
        }
        Ok(())
    }
}

impl HardwareAdapter for GreaseweazleAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> AdapterCaps {
        AdapterCaps::READ | AdapterCaps::WRITE | AdapterCaps::FLUX | AdapterCaps::INFO | AdapterCaps::HARDWARE
    }

    fn formats(&self) -> Vec<DiskImageFileFormat> {
        vec![
            DiskImageFileFormat::KryofluxStream,
            DiskImageFileFormat::G64,
            DiskImageFileFormat::Dmk,
        ]
    }

    fn init(&mut self) -> Result<(), DiskImageError> {
        self.open()?;
        self.command(CMD_RESET, &[])?;
        self.motor_on = false;
        self.device_info()?;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.release_drive();
        if self.owns_port {
            self.transport = None;
            self.owns_port = false;
        }
        self.info = None;
    }

    fn is_available(&self) -> bool {
        self.transport.is_some() || self.config.device.exists()
    }

    fn info(&mut self) -> Result<AdapterInfo, DiskImageError> {
        let info = self.device_info()?;
        Ok(AdapterInfo {
            name: Self::NAME.to_string(),
            description: format!("Greaseweazle model {}.{}", info.hw_model, info.hw_submodel),
            firmware: Some(format!("{}.{}", info.fw_major, info.fw_minor)),
            sample_clock: Some(info.sample_freq as f64),
            caps: self.capabilities(),
        })
    }

    fn release_drive(&mut self) {
        if self.motor_on {
            if let Err(e) = self.set_motor(false) {
                log::warn!("GreaseweazleAdapter::release_drive(): could not stop motor: {}", e);
                self.motor_on = false;
            }
        }
    }

    fn read_track(&mut self, key: TrackKey, revolutions: u8, cancel: &CancelFlag) -> Result<FluxBuffer, DiskImageError> {
        self.interrupted(cancel)?;
        if revolutions == 0 {
            return Err(DiskImageError::parameter("At least one revolution must be read"));
        }
        let info = self.device_info()?;
        self.set_motor(true)?;
        self.seek(key)?;

        // Zero ticks: stop on the index pulse count alone.
        self.command(CMD_READ_FLUX, &[0, 0, 0, revolutions])?;
        let stream = self.get_flux()?;
        let (deltas, index) = decode_flux(&stream)?;
        log::debug!(
            "GreaseweazleAdapter::read_track(): {} {} transitions, {} index pulses",
            key,
            deltas.len(),
            index.len()
        );
        FluxBuffer::from_deltas(info.sample_freq as f64, &deltas, index)
    }

    fn write_track(&mut self, key: TrackKey, flux: &FluxBuffer, cancel: &CancelFlag) -> Result<(), DiskImageError> {
        self.interrupted(cancel)?;
        let info = self.device_info()?;
        let Some(revolution) = flux.revolution(0)
        else {
            return Err(DiskImageError::parameter("No flux to write"));
        };
        // Rescale to the device clock if the buffer was captured at another rate.
        let scale = info.sample_freq as f64 / flux.sample_clock();
        let deltas: Vec<u32> = revolution
            .iter()
            .map(|&d| ((d as f64 * scale).round() as u32).max(1))
            .collect();
        let mut stream = encode_flux(&deltas, &[0])?;
        stream.push(FLUX_END);

        self.set_motor(true)?;
        self.seek(key)?;
        // Cue at index, terminate at index.
        self.command(CMD_WRITE_FLUX, &[1, 1])?;
        let transport = self.transport()?;
        transport.write_all(&stream)?;
        transport.flush()?;
        self.command(CMD_GET_FLUX_STATUS, &[])?;
        log::debug!(
            "GreaseweazleAdapter::write_track(): {} wrote {} transitions",
            key,
            deltas.len()
        );
        Ok(())
    }
}

/// Put a serial port into raw mode with a short read timeout, so that a read on an idle port
/// returns zero bytes instead of blocking and the response deadline can be checked.
#[cfg(unix)]
fn set_raw_mode(port: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = port.as_raw_fd();
    // SAFETY: `fd` is a valid open descriptor borrowed from `port`, and `tty` is fully
    // initialized by tcgetattr before use.
    unsafe {
        let mut tty = std::mem::zeroed::<libc::termios>();
        if libc::tcgetattr(fd, &mut tty) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tty);
        tty.c_cflag |= libc::CLOCAL | libc::CREAD;
        tty.c_cc[libc::VMIN] = 0;
        tty.c_cc[libc::VTIME] = SERIAL_POLL_DECISECONDS;
        if libc::tcsetattr(fd, libc::TCSANOW, &tty) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockGreaseweazle;

    fn adapter(mock: &MockGreaseweazle) -> GreaseweazleAdapter {
        let config = GreaseweazleConfig {
            timeout: Duration::from_millis(50),
            ..GreaseweazleConfig::default()
        };
        GreaseweazleAdapter::with_transport(config, Box::new(mock.clone()))
    }

    #[test]
    fn test_flux_encoding() {
        let deltas = [1, 249, 250, 1524, 1525, 100_000];
        let stream = encode_flux(&deltas, &[0, 6]).unwrap();
        assert_eq!(&stream[..6], &[0xFF, FLUXOP_INDEX, 1, 1, 1, 1]);
        assert_eq!(&stream[6..10], &[1, 249, 250, 1]);
        assert_eq!(&stream[10..12], &[254, 255]);
        let (decoded, index) = decode_flux(&stream).unwrap();
        assert_eq!(decoded, deltas);
        assert_eq!(index, vec![0, 6]);
    }

    #[test]
    fn test_decode_stops_at_end() {
        let (deltas, index) = decode_flux(&[10, 20, FLUX_END, 30]).unwrap();
        assert_eq!(deltas, vec![10, 20]);
        assert!(index.is_empty());
        assert!(decode_flux(&[250]).is_err());
        assert!(decode_flux(&[0xFF, 9, 1, 1, 1, 1]).is_err());
    }

    #[test]
    fn test_command_framing() {
        let mock = MockGreaseweazle::new(72_000_000);
        let mut gw = adapter(&mock);
        gw.init().unwrap();
        let sent = mock.sent();
        assert_eq!(&sent[..2], &[CMD_RESET, 2]);
        assert_eq!(&sent[2..5], &[CMD_GET_INFO, 3, 0]);
        let info = gw.info().unwrap();
        assert_eq!(info.sample_clock, Some(72_000_000.0));
        assert_eq!(info.firmware.as_deref(), Some("1.4"));
    }

    #[test]
    fn test_read_track_from_mock() {
        let mock = MockGreaseweazle::new(72_000_000);
        let revolution: Vec<u32> = (0..500).map(|i| 144 + (i % 3) * 72).collect();
        mock.insert_track(3, 1, revolution.clone());
        let mut gw = adapter(&mock);
        gw.init().unwrap();

        let flux = gw.read_track(TrackKey::from((3, 1)), 2, &CancelFlag::new()).unwrap();
        assert_eq!(flux.sample_clock(), 72_000_000.0);
        assert_eq!(flux.revolution_ct(), 2);
        assert_eq!(flux.revolution(1).unwrap(), revolution);
        assert!(mock.motor_on());
        assert_eq!(mock.position(), (3, 1));

        gw.cleanup();
        assert!(!mock.motor_on());
    }

    #[test]
    fn test_write_track_to_mock() {
        let mock = MockGreaseweazle::new(72_000_000);
        let mut gw = adapter(&mock);
        let flux = FluxBuffer::from_deltas(72_000_000.0, &[144, 216, 3000, 144], vec![0, 4]).unwrap();
        gw.write_track(TrackKey::from((10, 0)), &flux, &CancelFlag::new()).unwrap();
        let written = mock.written_track(10, 0).unwrap();
        assert_eq!(written.revolution(0).unwrap(), vec![144, 216, 3000, 144]);

        mock.set_write_protected(true);
        let err = gw.write_track(TrackKey::from((11, 0)), &flux, &CancelFlag::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Permission);
    }

    #[test]
    fn test_timeout_and_cancel() {
        let mock = MockGreaseweazle::new(72_000_000);
        let mut gw = adapter(&mock);
        gw.init().unwrap();
        mock.set_silent(true);
        let err = gw.read_track(TrackKey::from((0, 0)), 1, &CancelFlag::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);

        mock.set_silent(false);
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert_eq!(
            gw.read_track(TrackKey::from((0, 0)), 1, &cancel),
            Err(DiskImageError::Cancelled)
        );
    }

    /// A port that accepts writes and reports no data on every read, as a raw tty does when its
    /// read timer expires.
    struct IdlePort;

    impl Read for IdlePort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for IdlePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_idle_port_times_out() {
        let config = GreaseweazleConfig {
            timeout: Duration::from_millis(30),
            ..GreaseweazleConfig::default()
        };
        let mut gw = GreaseweazleAdapter::with_transport(config, Box::new(IdlePort));
        let start = Instant::now();
        let err = gw.init().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_rejects_non_tty() {
        let path = std::env::temp_dir().join(format!("fluxvault-gw-{}.bin", std::process::id()));
        std::fs::write(&path, [0u8; 4]).unwrap();
        let config = GreaseweazleConfig {
            device: path.clone(),
            timeout: Duration::from_millis(30),
            ..GreaseweazleConfig::default()
        };
        let mut gw = GreaseweazleAdapter::new(config);
        let result = gw.init();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::Io);
    }

    #[test]
    fn test_nak_is_device_error() {
        let mock = MockGreaseweazle::new(72_000_000);
        let mut gw = adapter(&mock);
        let err = gw.command(0x7E, &[]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
