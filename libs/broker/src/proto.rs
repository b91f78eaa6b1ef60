//! Broker wire protocol.
//!
//! Request/response over [`engine_rt::FrameCodec`] frames, one response per
//! request, in order.
use bytes::{BufMut, Bytes, BytesMut};
use engine_rt::{
    WireError, WireMessage,
    frame::{
        get_bool, get_bytes, get_str, get_u8, get_u16, get_u32, get_u64, put_bool, put_bytes, put_str,
    },
};

use crate::log::{LogError, Record};

/// encoded size of a [`Response::Records`] reply without its records
pub const RECORDS_HEADER_LEN: usize = 1 + 4;
/// encoded size one record adds to a [`Response::Records`] reply on top of
/// its payload
pub const RECORD_OVERHEAD: usize = 8 + 4;

/// Client to broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// append one record
    Produce {
        /// target topic
        topic: String,
        /// record body
        payload: Bytes,
    },
    /// read records, waiting up to `max_wait_ms` for the first one
    Fetch {
        /// source topic
        topic: String,
        /// first offset wanted
        offset: u64,
        /// upper bound on returned records
        max_records: u32,
        /// long poll budget
        max_wait_ms: u32,
    },
    /// create a topic explicitly
    CreateTopic {
        /// topic to create
        topic: String,
    },
}

/// Broker to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// the record is stored at `offset`
    Produced {
        /// offset of the stored record
        offset: u64,
    },
    /// fetched records, empty if none arrived in time
    Records(Vec<Record>),
    /// answer to [`Request::CreateTopic`]
    TopicCreated {
        /// false if the topic existed already
        created: bool,
    },
    /// the request was refused
    Error {
        /// failure class
        code: ErrorCode,
        /// human readable detail
        message: String,
    },
}

/// Failure classes reported in [`Response::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// the topic does not exist and auto creation is off
    UnknownTopic,
    /// the topic name is not legal
    InvalidTopic,
    /// payload exceeds `message.max.bytes`
    MessageTooLarge,
    /// the broker could not write the record
    Storage,
    /// code this build does not know about
    Unknown(u16),
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            1 => ErrorCode::UnknownTopic,
            2 => ErrorCode::InvalidTopic,
            3 => ErrorCode::MessageTooLarge,
            4 => ErrorCode::Storage,
            n => ErrorCode::Unknown(n),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::UnknownTopic => 1,
            ErrorCode::InvalidTopic => 2,
            ErrorCode::MessageTooLarge => 3,
            ErrorCode::Storage => 4,
            ErrorCode::Unknown(n) => n,
        }
    }
}

impl From<LogError> for Response {
    fn from(err: LogError) -> Self {
        let code = match err {
            LogError::InvalidTopic(_) => ErrorCode::InvalidTopic,
            LogError::UnknownTopic(_) => ErrorCode::UnknownTopic,
            LogError::Io(_) => ErrorCode::Storage,
        };
        Response::Error {
            code,
            message: err.to_string(),
        }
    }
}

mod op {
    pub(super) const PRODUCE: u8 = 1;
    pub(super) const FETCH: u8 = 2;
    pub(super) const CREATE_TOPIC: u8 = 3;

    pub(super) const PRODUCED: u8 = 0x81;
    pub(super) const RECORDS: u8 = 0x82;
    pub(super) const TOPIC_CREATED: u8 = 0x83;
    pub(super) const ERROR: u8 = 0xff;
}

impl WireMessage for Request {
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Request::Produce { topic, payload } => {
                dst.put_u8(op::PRODUCE);
                put_str(dst, topic);
                put_bytes(dst, payload);
            }
            Request::Fetch {
                topic,
                offset,
                max_records,
                max_wait_ms,
            } => {
                dst.put_u8(op::FETCH);
                put_str(dst, topic);
                dst.put_u64(*offset);
                dst.put_u32(*max_records);
                dst.put_u32(*max_wait_ms);
            }
            Request::CreateTopic { topic } => {
                dst.put_u8(op::CREATE_TOPIC);
                put_str(dst, topic);
            }
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self, WireError> {
        Ok(match get_u8(src)? {
            op::PRODUCE => Request::Produce {
                topic: get_str(src)?,
                payload: get_bytes(src)?,
            },
            op::FETCH => Request::Fetch {
                topic: get_str(src)?,
                offset: get_u64(src)?,
                max_records: get_u32(src)?,
                max_wait_ms: get_u32(src)?,
            },
            op::CREATE_TOPIC => Request::CreateTopic {
                topic: get_str(src)?,
            },
            n => return Err(WireError::Malformed(format!("unknown request opcode {n:#04x}"))),
        })
    }
}

impl WireMessage for Response {
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Response::Produced { offset } => {
                dst.put_u8(op::PRODUCED);
                dst.put_u64(*offset);
            }
            Response::Records(records) => {
                dst.put_u8(op::RECORDS);
                dst.put_u32(records.len() as u32);
                for record in records {
                    dst.put_u64(record.offset);
                    put_bytes(dst, &record.payload);
                }
            }
            Response::TopicCreated { created } => {
                dst.put_u8(op::TOPIC_CREATED);
                put_bool(dst, *created);
            }
            Response::Error { code, message } => {
                dst.put_u8(op::ERROR);
                dst.put_u16((*code).into());
                put_str(dst, message);
            }
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self, WireError> {
        Ok(match get_u8(src)? {
            op::PRODUCED => Response::Produced {
                offset: get_u64(src)?,
            },
            op::RECORDS => {
                let count = get_u32(src)?;
                let records = (0..count)
                    .map(|_| {
                        Ok(Record {
                            offset: get_u64(src)?,
                            payload: get_bytes(src)?,
                        })
                    })
                    .collect::<Result<Vec<_>, WireError>>()?;
                Response::Records(records)
            }
            op::TOPIC_CREATED => Response::TopicCreated {
                created: get_bool(src)?,
            },
            op::ERROR => Response::Error {
                code: get_u16(src)?.into(),
                message: get_str(src)?,
            },
            n => return Err(WireError::Malformed(format!("unknown response opcode {n:#04x}"))),
        })
    }
}
