//! Requests and replies shared by host and device

use alloc::{string::String, vec::Vec};
use core::ops::Range;

use super::codes::*;
use super::frame::Frame;
use crate::chip::ChipProfile;
use crate::error::{Error, FailureCause, ProtocolError, Result};

/// Kind of bulk operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationKind {
    /// Read pages to the host
    Read = 1,
    /// Program pages from the host
    Write = 2,
    /// Erase blocks
    Erase = 3,
}

impl OperationKind {
    /// Decode the stored/wire value
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Erase),
            _ => None,
        }
    }

    /// Command code that starts this operation
    pub fn command(self) -> u8 {
        match self {
            Self::Read => CMD_READ,
            Self::Write => CMD_WRITE,
            Self::Erase => CMD_ERASE,
        }
    }
}

/// Per-operation switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOptions {
    /// Run-length encode page data
    pub compress: bool,
    /// Elide all-0xFF pages
    pub skip_blank: bool,
    /// Read back after program/erase
    pub verify: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            compress: true,
            skip_blank: true,
            verify: true,
        }
    }
}

const FLAG_COMPRESS: u8 = 1 << 0;
const FLAG_SKIP_BLANK: u8 = 1 << 1;
const FLAG_VERIFY: u8 = 1 << 2;
const FLAG_RESUME: u8 = 1 << 3;

/// A request to start a bulk operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationRequest {
    /// What to do
    pub kind: OperationKind,
    /// First block
    pub start_block: u32,
    /// Number of blocks, 0 for "to the end of the chip"
    pub block_count: u32,
    /// Switches
    pub options: OperationOptions,
    /// Continue from a stored checkpoint if one matches
    pub resume: bool,
}

impl OperationRequest {
    /// Whole-chip request with the given options
    pub fn full(kind: OperationKind, options: OperationOptions) -> Self {
        Self {
            kind,
            start_block: 0,
            block_count: 0,
            options,
            resume: false,
        }
    }

    /// Block range this request covers on `profile`
    pub fn blocks(&self, profile: &ChipProfile) -> Result<Range<u32>> {
        let end = if self.block_count == 0 {
            profile.block_count
        } else {
            self.start_block
                .checked_add(self.block_count)
                .ok_or(Error::AddressOutOfBounds)?
        };
        if self.start_block >= end || end > profile.block_count {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(self.start_block..end)
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut flags = 0;
        if self.options.compress {
            flags |= FLAG_COMPRESS;
        }
        if self.options.skip_blank {
            flags |= FLAG_SKIP_BLANK;
        }
        if self.options.verify {
            flags |= FLAG_VERIFY;
        }
        if self.resume {
            flags |= FLAG_RESUME;
        }
        let mut out = Vec::with_capacity(9);
        out.extend_from_slice(&self.start_block.to_le_bytes());
        out.extend_from_slice(&self.block_count.to_le_bytes());
        out.push(flags);
        out
    }

    fn decode_payload(kind: OperationKind, payload: &[u8]) -> Option<Self> {
        let bytes: [u8; 9] = payload.try_into().ok()?;
        let flags = bytes[8];
        Some(Self {
            kind,
            start_block: u32_at(&bytes, 0)?,
            block_count: u32_at(&bytes, 4)?,
            options: OperationOptions {
                compress: flags & FLAG_COMPRESS != 0,
                skip_blank: flags & FLAG_SKIP_BLANK != 0,
                verify: flags & FLAG_VERIFY != 0,
            },
            resume: flags & FLAG_RESUME != 0,
        })
    }
}

/// Host-visible progress of the running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Whole percent, 0..=100
    pub percent: u16,
    /// Units (pages, or blocks for erase) done
    pub completed: u32,
    /// Units in the operation
    pub total: u32,
}

impl Progress {
    /// Progress after `completed` of `total` units
    pub fn new(completed: u32, total: u32) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (completed as u64 * 100 / total as u64) as u16
        };
        Self {
            percent,
            completed,
            total,
        }
    }
}

/// Checkpoint advertised to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeOffer {
    /// Interrupted operation
    pub kind: OperationKind,
    /// First block not yet completed
    pub next_block: u32,
    /// Hash of the last verified chunk
    pub chunk_hash: u32,
}

/// Host -> device message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Report chip and checkpoint
    Status,
    /// Start a read, write or erase
    Operation(OperationRequest),
    /// Cancel at the next boundary
    Cancel,
    /// Pause at the next boundary
    Pause,
    /// Leave the paused state
    ResumeOp,
    /// Resume the next operation from this block
    SetResume(u32),
    /// Sample supply voltage
    PowerCheck,
    /// Select by 1-based listing index
    Select(u16),
    /// Run detection again
    Redetect,
    /// End the session
    Exit,
    /// Send the chip listing
    List,
    /// Drop the stored checkpoint
    ClearResume,
    /// One encoded page of write data
    Data(Vec<u8>),
}

fn u32_at(payload: &[u8], at: usize) -> Option<u32> {
    let bytes = payload.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn u16_at(payload: &[u8], at: usize) -> Option<u16> {
    let bytes = payload.get(at..at + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

impl Request {
    /// Wire command code
    pub fn code(&self) -> u8 {
        match self {
            Self::Status => CMD_STATUS,
            Self::Operation(op) => op.kind.command(),
            Self::Cancel => CMD_CANCEL,
            Self::Pause => CMD_PAUSE,
            Self::ResumeOp => CMD_RESUME_OP,
            Self::SetResume(_) => CMD_SET_RESUME,
            Self::PowerCheck => CMD_POWER_CHECK,
            Self::Select(_) => CMD_SELECT,
            Self::Redetect => CMD_REDETECT,
            Self::Exit => CMD_EXIT,
            Self::List => CMD_LIST,
            Self::ClearResume => CMD_CLEAR_RESUME,
            Self::Data(_) => CMD_DATA,
        }
    }

    /// Encode as a frame
    pub fn to_frame(&self) -> Frame {
        let payload = match self {
            Self::Operation(op) => op.encode_payload(),
            Self::SetResume(block) => block.to_le_bytes().to_vec(),
            Self::Select(index) => index.to_le_bytes().to_vec(),
            Self::Data(unit) => unit.clone(),
            _ => Vec::new(),
        };
        Frame::new(self.code(), payload)
    }

    /// Decode a received frame
    pub fn from_frame(frame: Frame) -> core::result::Result<Self, ProtocolError> {
        let cmd = frame.command;
        if cmd == CMD_DATA {
            return Ok(Self::Data(frame.payload));
        }
        let p = &frame.payload;
        let bad = ProtocolError::BadPayload(cmd);
        let op = |kind| {
            OperationRequest::decode_payload(kind, p)
                .map(Self::Operation)
                .ok_or(bad)
        };
        match cmd {
            CMD_STATUS => Ok(Self::Status),
            CMD_READ => op(OperationKind::Read),
            CMD_WRITE => op(OperationKind::Write),
            CMD_ERASE => op(OperationKind::Erase),
            CMD_CANCEL => Ok(Self::Cancel),
            CMD_PAUSE => Ok(Self::Pause),
            CMD_RESUME_OP => Ok(Self::ResumeOp),
            CMD_SET_RESUME => u32_at(p, 0).map(Self::SetResume).ok_or(bad),
            CMD_POWER_CHECK => Ok(Self::PowerCheck),
            CMD_SELECT => u16_at(p, 0).map(Self::Select).ok_or(bad),
            CMD_REDETECT => Ok(Self::Redetect),
            CMD_EXIT => Ok(Self::Exit),
            CMD_LIST => Ok(Self::List),
            CMD_CLEAR_RESUME => Ok(Self::ClearResume),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Device -> host message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Operation progress
    Progress(Progress),
    /// Send write data starting at this block
    ReadyForData {
        /// First block the device expects
        first_block: u32,
    },
    /// Operation completed
    Complete {
        /// Digest over all chunk hashes
        digest: u32,
    },
    /// Operation failed
    Failed(FailureCause),
    /// Selected chip, `None` when nothing is selected
    Model(Option<String>),
    /// Supply voltage below threshold (millivolts)
    PowerWarning(u32),
    /// Chunk hash of a page just sent
    PageCrc {
        /// Absolute page index
        page: u32,
        /// Chunk hash of the decoded page
        crc: u32,
    },
    /// One encoded page of read data
    Data(Vec<u8>),
    /// Paused at a boundary
    Paused,
    /// Cancelled at a boundary
    Cancelled,
    /// Current supply voltage (millivolts)
    Power(u32),
    /// Listing starts
    SelectStart,
    /// Listing entry
    SelectEntry {
        /// 1-based index accepted by SELECT
        index: u16,
        /// "Vendor Name"
        name: String,
    },
    /// Listing ends
    SelectEnd,
    /// A checkpoint is stored
    ResumeOffer(ResumeOffer),
    /// Command accepted
    Ack(u8),
    /// Command refused without disturbing the current state
    Rejected {
        /// Refused command code
        command: u8,
        /// Why
        cause: FailureCause,
    },
}

impl Reply {
    /// Wire response code
    pub fn code(&self) -> u8 {
        match self {
            Self::Progress(_) => RSP_PROGRESS,
            Self::ReadyForData { .. } => RSP_READY_FOR_DATA,
            Self::Complete { .. } => RSP_COMPLETE,
            Self::Failed(_) => RSP_ERROR,
            Self::Model(_) => RSP_MODEL,
            Self::PowerWarning(_) => RSP_POWER_WARNING,
            Self::PageCrc { .. } => RSP_PAGE_CRC,
            Self::Data(_) => RSP_DATA,
            Self::Paused => RSP_PAUSED,
            Self::Cancelled => RSP_CANCELLED,
            Self::Power(_) => RSP_POWER,
            Self::SelectStart => RSP_SELECT_START,
            Self::SelectEntry { .. } => RSP_SELECT_ENTRY,
            Self::SelectEnd => RSP_SELECT_END,
            Self::ResumeOffer(_) => RSP_RESUME_OFFER,
            Self::Ack(_) => RSP_ACK,
            Self::Rejected { .. } => RSP_REJECTED,
        }
    }

    /// Encode as a frame
    pub fn to_frame(&self) -> Frame {
        let mut p = Vec::new();
        match self {
            Self::Progress(pr) => {
                p.extend_from_slice(&pr.percent.to_le_bytes());
                p.extend_from_slice(&pr.completed.to_le_bytes());
                p.extend_from_slice(&pr.total.to_le_bytes());
            }
            Self::ReadyForData { first_block } => p.extend_from_slice(&first_block.to_le_bytes()),
            Self::Complete { digest } => p.extend_from_slice(&digest.to_le_bytes()),
            Self::Failed(cause) => p.push(cause.code()),
            Self::Model(name) => {
                if let Some(name) = name {
                    p.extend_from_slice(name.as_bytes());
                }
            }
            Self::PowerWarning(mv) | Self::Power(mv) => p.extend_from_slice(&mv.to_le_bytes()),
            Self::PageCrc { page, crc } => {
                p.extend_from_slice(&page.to_le_bytes());
                p.extend_from_slice(&crc.to_le_bytes());
            }
            Self::Data(unit) => p.extend_from_slice(unit),
            Self::SelectEntry { index, name } => {
                p.extend_from_slice(&index.to_le_bytes());
                p.extend_from_slice(name.as_bytes());
            }
            Self::ResumeOffer(offer) => {
                p.push(offer.kind as u8);
                p.extend_from_slice(&offer.next_block.to_le_bytes());
                p.extend_from_slice(&offer.chunk_hash.to_le_bytes());
            }
            Self::Ack(cmd) => p.push(*cmd),
            Self::Rejected { command, cause } => {
                p.push(*command);
                p.push(cause.code());
            }
            Self::Paused | Self::Cancelled | Self::SelectStart | Self::SelectEnd => {}
        }
        Frame::new(self.code(), p)
    }

    /// Decode a received frame
    pub fn from_frame(frame: Frame) -> core::result::Result<Self, ProtocolError> {
        let code = frame.command;
        if code == RSP_DATA {
            return Ok(Self::Data(frame.payload));
        }
        let bad = ProtocolError::BadPayload(code);
        let p = frame.payload;
        let cause_at = |at: usize| p.get(at).copied().and_then(FailureCause::from_code);
        let text = |bytes: &[u8]| String::from_utf8(bytes.to_vec()).map_err(|_| bad);

        let reply = match code {
            RSP_PROGRESS => Self::Progress(Progress {
                percent: u16_at(&p, 0).ok_or(bad)?,
                completed: u32_at(&p, 2).ok_or(bad)?,
                total: u32_at(&p, 6).ok_or(bad)?,
            }),
            RSP_READY_FOR_DATA => Self::ReadyForData {
                first_block: u32_at(&p, 0).ok_or(bad)?,
            },
            RSP_COMPLETE => Self::Complete {
                digest: u32_at(&p, 0).ok_or(bad)?,
            },
            RSP_ERROR => Self::Failed(cause_at(0).ok_or(bad)?),
            RSP_MODEL if p.is_empty() => Self::Model(None),
            RSP_MODEL => Self::Model(Some(text(&p)?)),
            RSP_POWER_WARNING => Self::PowerWarning(u32_at(&p, 0).ok_or(bad)?),
            RSP_PAGE_CRC => Self::PageCrc {
                page: u32_at(&p, 0).ok_or(bad)?,
                crc: u32_at(&p, 4).ok_or(bad)?,
            },
            RSP_PAUSED => Self::Paused,
            RSP_CANCELLED => Self::Cancelled,
            RSP_POWER => Self::Power(u32_at(&p, 0).ok_or(bad)?),
            RSP_SELECT_START => Self::SelectStart,
            RSP_SELECT_ENTRY => Self::SelectEntry {
                index: u16_at(&p, 0).ok_or(bad)?,
                name: text(p.get(2..).ok_or(bad)?)?,
            },
            RSP_SELECT_END => Self::SelectEnd,
            RSP_RESUME_OFFER => Self::ResumeOffer(ResumeOffer {
                kind: p.first().copied().and_then(OperationKind::from_u8).ok_or(bad)?,
                next_block: u32_at(&p, 1).ok_or(bad)?,
                chunk_hash: u32_at(&p, 5).ok_or(bad)?,
            }),
            RSP_ACK => Self::Ack(p.first().copied().ok_or(bad)?),
            RSP_REJECTED => Self::Rejected {
                command: p.first().copied().ok_or(bad)?,
                cause: cause_at(1).ok_or(bad)?,
            },
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{string::ToString, vec};

    #[test]
    fn test_request_frames() {
        let op = OperationRequest {
            kind: OperationKind::Write,
            start_block: 3,
            block_count: 2,
            options: OperationOptions {
                compress: false,
                skip_blank: true,
                verify: true,
            },
            resume: true,
        };
        let frame = Request::Operation(op).to_frame();
        assert_eq!(frame.command, CMD_WRITE);
        assert_eq!(frame.payload, vec![3, 0, 0, 0, 2, 0, 0, 0, 0b1110]);
        assert_eq!(Request::from_frame(frame), Ok(Request::Operation(op)));

        for req in [
            Request::Status,
            Request::SetResume(77),
            Request::Select(4),
            Request::Data(vec![1, 2, 3]),
            Request::ClearResume,
        ] {
            assert_eq!(Request::from_frame(req.to_frame()), Ok(req));
        }
    }

    #[test]
    fn test_request_errors() {
        assert_eq!(
            Request::from_frame(Frame::new(0x7F, vec![])),
            Err(ProtocolError::UnknownCommand(0x7F))
        );
        assert_eq!(
            Request::from_frame(Frame::new(CMD_READ, vec![1, 2])),
            Err(ProtocolError::BadPayload(CMD_READ))
        );
    }

    #[test]
    fn test_progress_payload() {
        let frame = Reply::Progress(Progress::new(3, 4)).to_frame();
        assert_eq!(frame.payload, vec![75, 0, 3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(Progress::new(0, 0).percent, 100);
    }

    #[test]
    fn test_reply_frames() {
        for reply in [
            Reply::Model(Some("Samsung K9F1G08U0A".to_string())),
            Reply::Model(None),
            Reply::Failed(FailureCause::PowerLow),
            Reply::PageCrc { page: 9, crc: 0xDEADBEEF },
            Reply::SelectEntry {
                index: 2,
                name: "Hynix H27UBG8T2A".to_string(),
            },
            Reply::ResumeOffer(ResumeOffer {
                kind: OperationKind::Erase,
                next_block: 5,
                chunk_hash: 0x1234,
            }),
            Reply::Rejected {
                command: CMD_READ,
                cause: FailureCause::InvalidRequest,
            },
        ] {
            assert_eq!(Reply::from_frame(reply.to_frame()), Ok(reply));
        }
    }

    #[test]
    fn test_request_blocks() {
        let p = ChipProfile::new("T", "t", &[1], 2048, 64, 16);
        let mut op = OperationRequest::full(OperationKind::Read, OperationOptions::default());
        assert_eq!(op.blocks(&p), Ok(0..16));
        op.start_block = 4;
        op.block_count = 4;
        assert_eq!(op.blocks(&p), Ok(4..8));
        op.block_count = 13;
        assert_eq!(op.blocks(&p), Err(Error::AddressOutOfBounds));
        op.start_block = 16;
        op.block_count = 0;
        assert_eq!(op.blocks(&p), Err(Error::AddressOutOfBounds));
    }
}
