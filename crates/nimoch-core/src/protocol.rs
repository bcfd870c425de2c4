//! Fixed-size binary request/response framing for `serve` mode.
//!
//! Command record: 64 bytes, little-endian, `i64 command` + 7 `i64 args`.
//! Response header: 16 bytes, little-endian, `i64 code` + `i64 size`,
//! followed by `size` bytes of payload.

use std::io::{self, Read, Write};

pub const COMMAND_QUIT: i64 = 0;
pub const COMMAND_INFO: i64 = 1;
pub const COMMAND_IMAGE: i64 = 2;
pub const COMMAND_SCENE_DETECT: i64 = 256;

pub const CODE_OK: i64 = 0;
pub const CODE_BAD_REQUEST: i64 = 400;
pub const CODE_NOT_FOUND: i64 = 404;
pub const CODE_INTERNAL_ERROR: i64 = 500;

pub const COMMAND_RECORD_LEN: usize = 64;
pub const RESPONSE_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeCommand {
    pub command: i64,
    pub args: [i64; 7],
}

impl ServeCommand {
    /// Read one fixed 64-byte record. Returns `Ok(None)` on a clean EOF
    /// before any bytes were read; a short read partway through is an
    /// `io::Error` (`UnexpectedEof`), which terminates the serve loop.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<Self>> {
        let mut buf = [0u8; COMMAND_RECORD_LEN];
        let mut total = 0;
        while total < buf.len() {
            let n = r.read(&mut buf[total..])?;
            if n == 0 {
                if total == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read on command stream",
                ));
            }
            total += n;
        }
        let command = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        let mut args = [0i64; 7];
        for (i, arg) in args.iter_mut().enumerate() {
            let off = 8 + i * 8;
            *arg = i64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        }
        Ok(Some(ServeCommand { command, args }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeResponse {
    pub code: i64,
    pub payload: Vec<u8>,
}

impl ServeResponse {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            code: CODE_OK,
            payload,
        }
    }

    pub fn error(code: i64) -> Self {
        Self {
            code,
            payload: Vec::new(),
        }
    }

    /// Write the 16-byte header followed by the payload, then flush —
    /// every response must be fully flushed before the next command is read.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut header = [0u8; RESPONSE_HEADER_LEN];
        header[0..8].copy_from_slice(&self.code.to_le_bytes());
        header[8..16].copy_from_slice(&(self.payload.len() as i64).to_le_bytes());
        w.write_all(&header)?;
        w.write_all(&self.payload)?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_command_record() {
        let cmd = ServeCommand {
            command: COMMAND_IMAGE,
            args: [18000, 1, 3, 0, 0, 0, 0],
        };
        let mut buf = Vec::new();
        buf.extend_from_slice(&cmd.command.to_le_bytes());
        for a in cmd.args {
            buf.extend_from_slice(&a.to_le_bytes());
        }
        let mut cursor = Cursor::new(buf);
        let read_back = ServeCommand::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(read_back, cmd);
    }

    #[test]
    fn clean_eof_before_any_bytes_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert_eq!(ServeCommand::read_from(&mut cursor).unwrap(), None);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(ServeCommand::read_from(&mut cursor).is_err());
    }

    #[test]
    fn response_framing_reports_exact_payload_size() {
        let resp = ServeResponse::ok(vec![1, 2, 3, 4, 5]);
        let mut out = Vec::new();
        resp.write_to(&mut out).unwrap();
        let size = i64::from_le_bytes(out[8..16].try_into().unwrap());
        assert_eq!(size, 5);
        assert_eq!(&out[16..], &[1, 2, 3, 4, 5]);
    }
}
