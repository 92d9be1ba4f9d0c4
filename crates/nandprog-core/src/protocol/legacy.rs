//! Legacy text line protocol
//!
//! Older host tools speak newline-terminated keywords with colon separated
//! arguments (`SET_RESUME:12`, `PROGRESS:40`, ...). Page data is sent as a
//! `DATA:<len>` line followed by exactly `len` encoded bytes. The mapping
//! to [`Request`] and [`Reply`] is one-to-one so the session logic does not
//! care which transport is in use.

use alloc::{format, string::String, vec::Vec};
use core::str::FromStr;

use super::codes::CMD_DATA;
use super::frame::MAX_PAYLOAD;
use super::message::*;
use crate::error::{FailureCause, ProtocolError};

/// Longest accepted line, excluding the newline
pub const MAX_LINE: usize = 128;

const DATA_PREFIX: &str = "DATA:";

/// Flags applied when a legacy operation line carries none
const DEFAULT_FLAGS: u8 = 0b0111;

/// One unit taken from the legacy byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyItem {
    /// A text line without its terminator
    Line(String),
    /// A binary block announced by a `DATA:<len>` line
    Data(Vec<u8>),
}

/// Streaming splitter for the legacy protocol
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    expect_data: Option<usize>,
}

impl LineDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete item, if any
    pub fn next_item(&mut self) -> Result<Option<LegacyItem>, ProtocolError> {
        loop {
            if let Some(len) = self.expect_data {
                if self.buf.len() < len {
                    return Ok(None);
                }
                let data = self.buf.drain(..len).collect();
                self.expect_data = None;
                return Ok(Some(LegacyItem::Data(data)));
            }

            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE {
                    self.buf.clear();
                    return Err(ProtocolError::BadPayload(0));
                }
                return Ok(None);
            };

            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = core::str::from_utf8(&raw[..pos])
                .map_err(|_| ProtocolError::BadPayload(0))?
                .trim();
            if line.is_empty() {
                continue;
            }
            if let Some(len) = line.strip_prefix(DATA_PREFIX) {
                let len: usize = len.parse().map_err(|_| ProtocolError::BadPayload(CMD_DATA))?;
                if len > MAX_PAYLOAD {
                    return Err(ProtocolError::BadPayload(CMD_DATA));
                }
                self.expect_data = Some(len);
                continue;
            }
            return Ok(Some(LegacyItem::Line(String::from(line))));
        }
    }
}

fn arg<T: FromStr>(args: &[&str], i: usize, cmd: u8) -> Result<T, ProtocolError> {
    args.get(i)
        .and_then(|a| a.trim().parse().ok())
        .ok_or(ProtocolError::BadPayload(cmd))
}

fn opt_arg<T: FromStr>(args: &[&str], i: usize, default: T, cmd: u8) -> Result<T, ProtocolError> {
    match args.get(i) {
        None => Ok(default),
        Some(_) => arg(args, i, cmd),
    }
}

fn millivolts(text: &str, cmd: u8) -> Result<u32, ProtocolError> {
    text.trim_end_matches("mV")
        .parse()
        .map_err(|_| ProtocolError::BadPayload(cmd))
}

fn operation(kind: OperationKind, args: &[&str]) -> Result<Request, ProtocolError> {
    let cmd = kind.command();
    let flags: u8 = opt_arg(args, 2, DEFAULT_FLAGS, cmd)?;
    Ok(Request::Operation(OperationRequest {
        kind,
        start_block: opt_arg(args, 0, 0, cmd)?,
        block_count: opt_arg(args, 1, 0, cmd)?,
        options: OperationOptions {
            compress: flags & 0b0001 != 0,
            skip_blank: flags & 0b0010 != 0,
            verify: flags & 0b0100 != 0,
        },
        resume: flags & 0b1000 != 0,
    }))
}

/// Parse a host command line
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    use super::codes::*;

    let mut parts = line.trim().split(':');
    let keyword = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match keyword {
        "STATUS" => Ok(Request::Status),
        "READ" => operation(OperationKind::Read, &args),
        "WRITE" => operation(OperationKind::Write, &args),
        "ERASE" => operation(OperationKind::Erase, &args),
        "CANCEL" => Ok(Request::Cancel),
        "PAUSE" => Ok(Request::Pause),
        "RESUME" => Ok(Request::ResumeOp),
        "SET_RESUME" => Ok(Request::SetResume(arg(&args, 0, CMD_SET_RESUME)?)),
        "POWER_CHECK" => Ok(Request::PowerCheck),
        "SELECT" => Ok(Request::Select(arg(&args, 0, CMD_SELECT)?)),
        "REDETECT" => Ok(Request::Redetect),
        "EXIT" => Ok(Request::Exit),
        "LIST" => Ok(Request::List),
        "CLEAR_RESUME" => Ok(Request::ClearResume),
        _ => Err(ProtocolError::UnknownCommand(keyword.bytes().next().unwrap_or(0))),
    }
}

fn push_data(unit: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{}{}\n", DATA_PREFIX, unit.len()).as_bytes());
    out.extend_from_slice(unit);
}

/// Append the legacy form of a request
pub fn format_request(request: &Request, out: &mut Vec<u8>) {
    let line = match request {
        Request::Status => String::from("STATUS"),
        Request::Operation(op) => {
            let keyword = match op.kind {
                OperationKind::Read => "READ",
                OperationKind::Write => "WRITE",
                OperationKind::Erase => "ERASE",
            };
            let flags = u8::from(op.options.compress)
                | u8::from(op.options.skip_blank) << 1
                | u8::from(op.options.verify) << 2
                | u8::from(op.resume) << 3;
            format!("{}:{}:{}:{}", keyword, op.start_block, op.block_count, flags)
        }
        Request::Cancel => String::from("CANCEL"),
        Request::Pause => String::from("PAUSE"),
        Request::ResumeOp => String::from("RESUME"),
        Request::SetResume(block) => format!("SET_RESUME:{}", block),
        Request::PowerCheck => String::from("POWER_CHECK"),
        Request::Select(index) => format!("SELECT:{}", index),
        Request::Redetect => String::from("REDETECT"),
        Request::Exit => String::from("EXIT"),
        Request::List => String::from("LIST"),
        Request::ClearResume => String::from("CLEAR_RESUME"),
        Request::Data(unit) => return push_data(unit, out),
    };
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
}

/// Append the legacy form of a reply
pub fn format_reply(reply: &Reply, out: &mut Vec<u8>) {
    let line = match reply {
        Reply::Progress(p) => format!("PROGRESS:{}:{}:{}", p.percent, p.completed, p.total),
        Reply::ReadyForData { first_block } => format!("READY_FOR_DATA:{}", first_block),
        Reply::Complete { digest } => format!("OPERATION_COMPLETE:{}", digest),
        Reply::Failed(FailureCause::NoChip) => String::from("NAND_NOT_CONNECTED"),
        Reply::Failed(cause) => format!("OPERATION_FAILED:{}", cause.code()),
        Reply::Model(name) => format!("MODEL:{}", name.as_deref().unwrap_or("")),
        Reply::PowerWarning(mv) => format!("POWER_WARNING:{}mV", mv),
        Reply::PageCrc { page, crc } => format!("PAGE_CRC:{}:{}", page, crc),
        Reply::Data(unit) => return push_data(unit, out),
        Reply::Paused => String::from("PAUSED"),
        Reply::Cancelled => String::from("OPERATION_CANCELLED"),
        Reply::Power(mv) => format!("POWER:{}mV", mv),
        Reply::SelectStart => String::from("MANUAL_SELECT_START"),
        Reply::SelectEntry { index, name } => format!("{}:{}", index, name),
        Reply::SelectEnd => String::from("MANUAL_SELECT_END"),
        Reply::ResumeOffer(o) => {
            format!("RESUME_OFFER:{}:{}:{}", o.kind as u8, o.next_block, o.chunk_hash)
        }
        Reply::Ack(cmd) => format!("OK:{}", cmd),
        Reply::Rejected { command, cause } => format!("REJECTED:{}:{}", command, cause.code()),
    };
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
}

/// Parse a device reply line
pub fn parse_reply(line: &str) -> Result<Reply, ProtocolError> {
    use super::codes::*;

    let line = line.trim();
    if line.starts_with(|c: char| c.is_ascii_digit()) {
        let (index, name) = line
            .split_once(':')
            .ok_or(ProtocolError::BadPayload(RSP_SELECT_ENTRY))?;
        return Ok(Reply::SelectEntry {
            index: index
                .parse()
                .map_err(|_| ProtocolError::BadPayload(RSP_SELECT_ENTRY))?,
            name: String::from(name),
        });
    }

    let (keyword, rest) = line.split_once(':').unwrap_or((line, ""));
    let args: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(':').collect()
    };
    let cause = |code: u8, cmd: u8| FailureCause::from_code(code).ok_or(ProtocolError::BadPayload(cmd));

    match keyword {
        "PROGRESS" => {
            let percent = arg(&args, 0, RSP_PROGRESS)?;
            Ok(Reply::Progress(Progress {
                percent,
                completed: opt_arg(&args, 1, 0, RSP_PROGRESS)?,
                total: opt_arg(&args, 2, 0, RSP_PROGRESS)?,
            }))
        }
        "READY_FOR_DATA" => Ok(Reply::ReadyForData {
            first_block: opt_arg(&args, 0, 0, RSP_READY_FOR_DATA)?,
        }),
        "OPERATION_COMPLETE" => Ok(Reply::Complete {
            digest: opt_arg(&args, 0, 0, RSP_COMPLETE)?,
        }),
        "OPERATION_FAILED" => Ok(Reply::Failed(cause(arg(&args, 0, RSP_ERROR)?, RSP_ERROR)?)),
        "NAND_NOT_CONNECTED" => Ok(Reply::Failed(FailureCause::NoChip)),
        "MODEL" if rest.is_empty() => Ok(Reply::Model(None)),
        "MODEL" => Ok(Reply::Model(Some(String::from(rest)))),
        "POWER_WARNING" => Ok(Reply::PowerWarning(millivolts(rest, RSP_POWER_WARNING)?)),
        "PAGE_CRC" => Ok(Reply::PageCrc {
            page: arg(&args, 0, RSP_PAGE_CRC)?,
            crc: arg(&args, 1, RSP_PAGE_CRC)?,
        }),
        "PAUSED" => Ok(Reply::Paused),
        "OPERATION_CANCELLED" => Ok(Reply::Cancelled),
        "POWER" => Ok(Reply::Power(millivolts(rest, RSP_POWER)?)),
        "MANUAL_SELECT_START" => Ok(Reply::SelectStart),
        "MANUAL_SELECT_END" => Ok(Reply::SelectEnd),
        "RESUME_OFFER" => Ok(Reply::ResumeOffer(ResumeOffer {
            kind: OperationKind::from_u8(arg(&args, 0, RSP_RESUME_OFFER)?)
                .ok_or(ProtocolError::BadPayload(RSP_RESUME_OFFER))?,
            next_block: arg(&args, 1, RSP_RESUME_OFFER)?,
            chunk_hash: arg(&args, 2, RSP_RESUME_OFFER)?,
        })),
        "OK" => Ok(Reply::Ack(arg(&args, 0, RSP_ACK)?)),
        "REJECTED" => Ok(Reply::Rejected {
            command: arg(&args, 0, RSP_REJECTED)?,
            cause: cause(arg(&args, 1, RSP_REJECTED)?, RSP_REJECTED)?,
        }),
        _ => Err(ProtocolError::UnknownCommand(keyword.bytes().next().unwrap_or(0))),
    }
}
