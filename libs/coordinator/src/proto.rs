//! Coordinator wire protocol.
//!
//! Every request gets exactly one response on the same connection, in order.
use bytes::{BufMut, Bytes, BytesMut};
use engine_rt::{
    WireError, WireMessage,
    frame::{get_bool, get_bytes, get_str, get_u8, get_u16, get_u32, put_bool, put_bytes, put_str},
};

use crate::tree::TreeError;

/// Client to coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// create a node, ephemeral nodes are tied to this connection
    Create {
        /// absolute path
        path: String,
        /// node payload
        data: Bytes,
        /// remove the node when the connection closes
        ephemeral: bool,
    },
    /// read a node
    Get {
        /// absolute path
        path: String,
    },
    /// list the direct children of a node
    Children {
        /// absolute path
        path: String,
    },
    /// delete a node without children
    Delete {
        /// absolute path
        path: String,
    },
    /// liveness check
    Ping,
}

/// Coordinator to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// node was created
    Created,
    /// node data, `None` if the node does not exist
    Data(Option<Bytes>),
    /// sorted child names
    Children(Vec<String>),
    /// whether a node was removed
    Deleted {
        /// false if there was no such node
        existed: bool,
    },
    /// answer to [`Request::Ping`]
    Pong,
    /// the request could not be applied
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
    /// the node exists already
    NodeExists,
    /// the path is not valid for this operation
    InvalidPath,
    /// the node still has children
    NotEmpty,
    /// code this build does not know about
    Unknown(u16),
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            1 => ErrorCode::NodeExists,
            2 => ErrorCode::InvalidPath,
            3 => ErrorCode::NotEmpty,
            n => ErrorCode::Unknown(n),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NodeExists => 1,
            ErrorCode::InvalidPath => 2,
            ErrorCode::NotEmpty => 3,
            ErrorCode::Unknown(n) => n,
        }
    }
}

impl From<&TreeError> for ErrorCode {
    fn from(err: &TreeError) -> Self {
        match err {
            TreeError::NodeExists(_) => ErrorCode::NodeExists,
            TreeError::InvalidPath { .. } => ErrorCode::InvalidPath,
            TreeError::NotEmpty(_) => ErrorCode::NotEmpty,
        }
    }
}

impl From<TreeError> for Response {
    fn from(err: TreeError) -> Self {
        Response::Error {
            code: (&err).into(),
            message: err.to_string(),
        }
    }
}

mod op {
    pub(super) const CREATE: u8 = 1;
    pub(super) const GET: u8 = 2;
    pub(super) const CHILDREN: u8 = 3;
    pub(super) const DELETE: u8 = 4;
    pub(super) const PING: u8 = 5;

    pub(super) const CREATED: u8 = 0x81;
    pub(super) const DATA: u8 = 0x82;
    pub(super) const CHILD_LIST: u8 = 0x83;
    pub(super) const DELETED: u8 = 0x84;
    pub(super) const PONG: u8 = 0x85;
    pub(super) const ERROR: u8 = 0xff;
}

impl WireMessage for Request {
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Request::Create {
                path,
                data,
                ephemeral,
            } => {
                dst.put_u8(op::CREATE);
                put_str(dst, path);
                put_bytes(dst, data);
                put_bool(dst, *ephemeral);
            }
            Request::Get { path } => {
                dst.put_u8(op::GET);
                put_str(dst, path);
            }
            Request::Children { path } => {
                dst.put_u8(op::CHILDREN);
                put_str(dst, path);
            }
            Request::Delete { path } => {
                dst.put_u8(op::DELETE);
                put_str(dst, path);
            }
            Request::Ping => dst.put_u8(op::PING),
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self, WireError> {
        Ok(match get_u8(src)? {
            op::CREATE => Request::Create {
                path: get_str(src)?,
                data: get_bytes(src)?,
                ephemeral: get_bool(src)?,
            },
            op::GET => Request::Get {
                path: get_str(src)?,
            },
            op::CHILDREN => Request::Children {
                path: get_str(src)?,
            },
            op::DELETE => Request::Delete {
                path: get_str(src)?,
            },
            op::PING => Request::Ping,
            n => return Err(WireError::Malformed(format!("unknown request opcode {n:#04x}"))),
        })
    }
}

impl WireMessage for Response {
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Response::Created => dst.put_u8(op::CREATED),
            Response::Data(data) => {
                dst.put_u8(op::DATA);
                put_bool(dst, data.is_some());
                if let Some(data) = data {
                    put_bytes(dst, data);
                }
            }
            Response::Children(names) => {
                dst.put_u8(op::CHILD_LIST);
                dst.put_u32(names.len() as u32);
                for name in names {
                    put_str(dst, name);
                }
            }
            Response::Deleted { existed } => {
                dst.put_u8(op::DELETED);
                put_bool(dst, *existed);
            }
            Response::Pong => dst.put_u8(op::PONG),
            Response::Error { code, message } => {
                dst.put_u8(op::ERROR);
                dst.put_u16((*code).into());
                put_str(dst, message);
            }
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self, WireError> {
        Ok(match get_u8(src)? {
            op::CREATED => Response::Created,
            op::DATA => {
                if get_bool(src)? {
                    Response::Data(Some(get_bytes(src)?))
                } else {
                    Response::Data(None)
                }
            }
            op::CHILD_LIST => {
                let count = get_u32(src)?;
                let names = (0..count)
                    .map(|_| get_str(src))
                    .collect::<Result<Vec<_>, _>>()?;
                Response::Children(names)
            }
            op::DELETED => Response::Deleted {
                existed: get_bool(src)?,
            },
            op::PONG => Response::Pong,
            op::ERROR => Response::Error {
                code: get_u16(src)?.into(),
                message: get_str(src)?,
            },
            n => return Err(WireError::Malformed(format!("unknown response opcode {n:#04x}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use engine_rt::FrameCodec;
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;

    #[test]
    fn test_error_response_keeps_code() -> Result<(), WireError> {
        let mut codec = FrameCodec::<Response, Response>::new();
        let mut buf = BytesMut::new();
        codec.encode(Response::from(TreeError::NotEmpty("/a".into())), &mut buf)?;

        let Some(Response::Error { code, message }) = codec.decode(&mut buf)? else {
            panic!("expected an error response");
        };
        assert_eq!(code, ErrorCode::NotEmpty);
        assert!(message.contains("/a"));
        Ok(())
    }

    #[test]
    fn test_unknown_opcode() {
        let mut src = Bytes::from_static(&[0x42]);
        assert!(matches!(Request::decode(&mut src), Err(WireError::Malformed(_))));
        assert_eq!(ErrorCode::from(99), ErrorCode::Unknown(99));
    }

    #[test]
    fn test_missing_node_data() -> Result<(), WireError> {
        let mut codec = FrameCodec::<Response, Response>::new();
        let mut buf = BytesMut::new();
        codec.encode(Response::Data(None), &mut buf)?;
        assert_eq!(codec.decode(&mut buf)?, Some(Response::Data(None)));
        Ok(())
    }
}
