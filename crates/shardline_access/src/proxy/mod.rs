//! Serialization proxies.
//!
//! Wire format never follows in-memory layout. Every message type has a
//! hand-written encode/decode pair per layout revision, kept in a table and
//! selected by `(message type, ABI version)`. A frame is the canonical CBOR
//! array `[version, message type, body]`.

mod layout;
mod requests;
mod responses;
mod table;

use bytes::Bytes;
use shardline_codec::{from_cbor, to_canonical_cbor, Value};

use crate::abi::AbiVersion;
use crate::error::{ProxyError, ProxyResult};
use crate::request::{HistoryOperation, Request, TransactionPayload};
use crate::response::{RequestSuccess, Response, TransactionSuccessPayload};
use crate::RequestTarget;

pub use table::{proxy_for, Proxy};

macro_rules! message_types {
    ($($variant:ident = $code:literal),* $(,)?) => {
        /// Wire code of every serializable message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum MessageType {
            $(
                #[allow(missing_docs)]
                $variant,
            )*
        }

        impl MessageType {
            /// Every message type.
            pub const ALL: [MessageType; [$($code),*].len()] = [$(Self::$variant),*];

            /// Wire code.
            pub const fn to_code(self) -> u8 {
                match self {
                    $(Self::$variant => $code,)*
                }
            }

            /// Parse a wire code.
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Message name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                }
            }
        }
    };
}

message_types! {
    ConnectClientRequest = 1,
    CreateLocalHistoryRequest = 2,
    DestroyLocalHistoryRequest = 3,
    PurgeLocalHistoryRequest = 4,
    ModifyTransactionRequest = 5,
    ReadTransactionRequest = 6,
    ExistsTransactionRequest = 7,
    TransactionPreCommitRequest = 8,
    TransactionDoCommitRequest = 9,
    TransactionAbortRequest = 10,
    TransactionPurgeRequest = 11,
    SkipTransactionsRequest = 12,
    ConnectClientSuccess = 32,
    ConnectClientFailure = 33,
    LocalHistorySuccess = 34,
    LocalHistoryFailure = 35,
    ModifyTransactionSuccess = 36,
    ReadTransactionSuccess = 37,
    ExistsTransactionSuccess = 38,
    TransactionCanCommitSuccess = 39,
    TransactionPreCommitSuccess = 40,
    TransactionCommitSuccess = 41,
    TransactionAbortSuccess = 42,
    TransactionPurgeResponse = 43,
    SkipTransactionsResponse = 44,
    TransactionFailure = 45,
}

impl MessageType {
    /// Whether this is a request type.
    pub fn is_request(self) -> bool {
        self.to_code() < 32
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything that travels in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A request.
    Request(Request),
    /// A response.
    Response(Response),
}

impl Message {
    /// Version the message is tagged with.
    pub fn version(&self) -> AbiVersion {
        match self {
            Self::Request(request) => request.version(),
            Self::Response(response) => response.version(),
        }
    }

    /// Wire type of the message.
    ///
    /// # Errors
    ///
    /// [`ProxyError::LocalOnly`] for requests that never leave the process.
    pub fn message_type(&self) -> ProxyResult<MessageType> {
        match self {
            Self::Request(request) => request_type(request),
            Self::Response(response) => Ok(response_type(response)),
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

fn request_type(request: &Request) -> ProxyResult<MessageType> {
    use MessageType as M;
    Ok(match request {
        Request::Connect(_) => M::ConnectClientRequest,
        Request::History(r) => match r.operation {
            HistoryOperation::Create => M::CreateLocalHistoryRequest,
            HistoryOperation::Destroy => M::DestroyLocalHistoryRequest,
            HistoryOperation::Purge => M::PurgeLocalHistoryRequest,
        },
        Request::Transaction(r) => match r.payload {
            TransactionPayload::Modify { .. } => M::ModifyTransactionRequest,
            TransactionPayload::Read { .. } => M::ReadTransactionRequest,
            TransactionPayload::Exists { .. } => M::ExistsTransactionRequest,
            TransactionPayload::PreCommit => M::TransactionPreCommitRequest,
            TransactionPayload::DoCommit => M::TransactionDoCommitRequest,
            TransactionPayload::Abort => M::TransactionAbortRequest,
            TransactionPayload::Purge => M::TransactionPurgeRequest,
            TransactionPayload::SkipTransactions { .. } => M::SkipTransactionsRequest,
            TransactionPayload::AbortLocal | TransactionPayload::CommitLocal { .. } => {
                return Err(ProxyError::LocalOnly { kind: r.kind() })
            }
        },
    })
}

fn response_type(response: &Response) -> MessageType {
    use MessageType as M;
    match response {
        Response::Success(RequestSuccess::Connect(_)) => M::ConnectClientSuccess,
        Response::Success(RequestSuccess::History(_)) => M::LocalHistorySuccess,
        Response::Success(RequestSuccess::Transaction(s)) => match s.payload {
            TransactionSuccessPayload::Modify => M::ModifyTransactionSuccess,
            TransactionSuccessPayload::Read { .. } => M::ReadTransactionSuccess,
            TransactionSuccessPayload::Exists { .. } => M::ExistsTransactionSuccess,
            TransactionSuccessPayload::CanCommit => M::TransactionCanCommitSuccess,
            TransactionSuccessPayload::PreCommit => M::TransactionPreCommitSuccess,
            TransactionSuccessPayload::Commit => M::TransactionCommitSuccess,
            TransactionSuccessPayload::Abort => M::TransactionAbortSuccess,
            TransactionSuccessPayload::Purge => M::TransactionPurgeResponse,
            TransactionSuccessPayload::SkipTransactions => M::SkipTransactionsResponse,
        },
        Response::Failure(f) => match f.header.target {
            RequestTarget::Client(_) => M::ConnectClientFailure,
            RequestTarget::History(_) => M::LocalHistoryFailure,
            RequestTarget::Transaction(_) => M::TransactionFailure,
        },
    }
}

/// Encode a message into a frame at the version it is tagged with.
///
/// # Errors
///
/// [`ProxyError::LocalOnly`] for local-only requests,
/// [`ProxyError::UnsupportedVersion`] if the message type does not exist at
/// the tagged version, or a codec error.
pub fn encode_message(message: &Message) -> ProxyResult<Bytes> {
    let message_type = message.message_type()?;
    let version = message.version();
    let body = proxy_for(message_type, version)?.encode(message, version)?;
    let frame = Value::Array(vec![
        Value::from(version.short_value()),
        Value::from(u32::from(message_type.to_code())),
        body,
    ]);
    Ok(Bytes::from(to_canonical_cbor(&frame)?))
}

/// Read the version and message type of a frame without decoding the body.
///
/// # Errors
///
/// Malformed frame, unknown version or unknown message type.
pub fn peek_frame(bytes: &[u8]) -> ProxyResult<(AbiVersion, MessageType)> {
    let frame = from_cbor(bytes)?;
    let (version, message_type, _) = split_frame(&frame)?;
    Ok((version, message_type))
}

/// Decode a frame. The resulting message carries the frame's version.
///
/// # Errors
///
/// Malformed frame, unknown or unsupported version, unknown message type,
/// or a body that does not match the selected proxy.
pub fn decode_message(bytes: &[u8]) -> ProxyResult<Message> {
    let frame = from_cbor(bytes)?;
    let (version, message_type, body) = split_frame(&frame)?;
    proxy_for(message_type, version)?.decode(body, version)
}

fn split_frame(frame: &Value) -> ProxyResult<(AbiVersion, MessageType, &Value)> {
    let Some([version, message_type, body]) = frame.as_array() else {
        return Err(ProxyError::malformed("frame must be a three-element array"));
    };
    let version = version
        .as_u64()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| ProxyError::malformed("frame version must be a u16"))?;
    let version = AbiVersion::from_short(version)?;
    let code = message_type
        .as_u64()
        .and_then(|c| u8::try_from(c).ok())
        .ok_or_else(|| ProxyError::malformed("message type must be a u8"))?;
    let message_type = MessageType::from_code(code).ok_or(ProxyError::UnknownMessageType(code))?;
    Ok((version, message_type, body))
}

/// Encode a request.
///
/// # Errors
///
/// See [`encode_message`].
pub fn encode_request(request: &Request) -> ProxyResult<Bytes> {
    encode_message(&Message::Request(request.clone()))
}

/// Encode a response.
///
/// # Errors
///
/// See [`encode_message`].
pub fn encode_response(response: &Response) -> ProxyResult<Bytes> {
    encode_message(&Message::Response(response.clone()))
}
