//! Wire format of mesh frames: one command byte followed by its payload.
//!
//! | ID | Command | Body |
//! |---|---|---|
//! | `0x01` | SEQUENCE | `rhythm rows colors[rows*24]` |
//! | `0x02` | SEQUENCE_START | - |
//! | `0x03` | SEQUENCE_STOP | - |
//! | `0x04` | SEQUENCE_RESET | - |
//! | `0x05` | SEQUENCE_BEAT | `pointer` |
//! | `0x06` | HEARTBEAT | `counter [pointer]` |
//! | `0x10..=0xEF` | plugin | `sub_command data..` |
//! | `0xF0..=0xFF` | solid colour preset | - |
//!
//! A HEARTBEAT is encoded with 2 bytes while no sequence plays and 3 bytes
//! (pointer appended) while one does; both forms are accepted.

use crate::error::{NodeError, Result};
use crate::led::NamedColor;
use crate::plugin::{PLUGIN_ID_FIRST, PLUGIN_ID_LAST};
use crate::sequence::table::{SequenceTable, TABLE_BYTES};

pub const CMD_SEQUENCE: u8 = 0x01;
pub const CMD_SEQUENCE_START: u8 = 0x02;
pub const CMD_SEQUENCE_STOP: u8 = 0x03;
pub const CMD_SEQUENCE_RESET: u8 = 0x04;
pub const CMD_SEQUENCE_BEAT: u8 = 0x05;
pub const CMD_HEARTBEAT: u8 = 0x06;
pub const CMD_COLOR_FIRST: u8 = 0xF0;

/// Largest frame: a full 16-row SEQUENCE.
pub const MAX_FRAME: usize = 3 + TABLE_BYTES;

pub type Frame = heapless::Vec<u8, MAX_FRAME>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Sequence { rhythm: u8, rows: u8, colors: &'a [u8] },
    SequenceStart,
    SequenceStop,
    SequenceReset,
    Beat { pointer: u8 },
    Heartbeat { counter: u8, pointer: Option<u8> },
    Plugin { id: u8, payload: &'a [u8] },
    SolidColor(NamedColor),
}

impl<'a> Command<'a> {
    pub fn decode(frame: &'a [u8]) -> Result<Self> {
        let Some((&cmd, body)) = frame.split_first() else {
            return Err(NodeError::InvalidArg);
        };

        match cmd {
            CMD_SEQUENCE => {
                let [rhythm, rows, colors @ ..] = body else {
                    return Err(NodeError::InvalidArg);
                };
                SequenceTable::validate(*rhythm, *rows, colors.len())?;
                Ok(Command::Sequence {
                    rhythm: *rhythm,
                    rows: *rows,
                    colors,
                })
            }
            CMD_SEQUENCE_START | CMD_SEQUENCE_STOP | CMD_SEQUENCE_RESET if !body.is_empty() => {
                Err(NodeError::InvalidArg)
            }
            CMD_SEQUENCE_START => Ok(Command::SequenceStart),
            CMD_SEQUENCE_STOP => Ok(Command::SequenceStop),
            CMD_SEQUENCE_RESET => Ok(Command::SequenceReset),
            CMD_SEQUENCE_BEAT => match body {
                [pointer] => Ok(Command::Beat { pointer: *pointer }),
                _ => Err(NodeError::InvalidArg),
            },
            CMD_HEARTBEAT => match body {
                [counter] => Ok(Command::Heartbeat {
                    counter: *counter,
                    pointer: None,
                }),
                [counter, pointer] => Ok(Command::Heartbeat {
                    counter: *counter,
                    pointer: Some(*pointer),
                }),
                _ => Err(NodeError::InvalidArg),
            },
            PLUGIN_ID_FIRST..=PLUGIN_ID_LAST => Ok(Command::Plugin {
                id: cmd,
                payload: body,
            }),
            CMD_COLOR_FIRST..=0xFF => Ok(Command::SolidColor(NamedColor::from_code(cmd)?)),
            _ => Err(NodeError::NotFound),
        }
    }

    pub fn encode(&self) -> Result<Frame> {
        let mut frame = Frame::new();
        let mut put = |bytes: &[u8]| frame.extend_from_slice(bytes).map_err(|_| NodeError::BufferTooSmall);

        match *self {
            Command::Sequence { rhythm, rows, colors } => {
                SequenceTable::validate(rhythm, rows, colors.len())?;
                put(&[CMD_SEQUENCE, rhythm, rows])?;
                put(colors)?;
            }
            Command::SequenceStart => put(&[CMD_SEQUENCE_START])?,
            Command::SequenceStop => put(&[CMD_SEQUENCE_STOP])?,
            Command::SequenceReset => put(&[CMD_SEQUENCE_RESET])?,
            Command::Beat { pointer } => put(&[CMD_SEQUENCE_BEAT, pointer])?,
            Command::Heartbeat { counter, pointer: None } => put(&[CMD_HEARTBEAT, counter])?,
            Command::Heartbeat {
                counter,
                pointer: Some(pointer),
            } => put(&[CMD_HEARTBEAT, counter, pointer])?,
            Command::Plugin { id, payload } => {
                if !(PLUGIN_ID_FIRST..=PLUGIN_ID_LAST).contains(&id) {
                    return Err(NodeError::InvalidArg);
                }
                put(&[id])?;
                put(payload)?;
            }
            Command::SolidColor(color) => put(&[color.code()])?,
        }
        Ok(frame)
    }
}
