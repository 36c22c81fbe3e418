//! Request proxies.

use shardline_codec::{Decode, Value};

use super::layout::{
    BodyReader, BodyWriter, Layout, MAX_VERSION, MIN_VERSION, OTHERS, SEQUENCE, SNAPSHOT_ONLY,
};
use super::Message;
use crate::envelope::RequestHeader;
use crate::error::{ProxyError, ProxyResult};
use crate::request::{
    ConnectClientRequest, HistoryOperation, LocalHistoryRequest, Request, TransactionPayload,
    TransactionRequest,
};

fn header<T: Decode>(r: &BodyReader<'_>) -> ProxyResult<RequestHeader<T>> {
    Ok(RequestHeader {
        target: r.target()?,
        sequence: r.u64(SEQUENCE)?,
        reply_to: r.reply_to()?,
        version: r.version(),
    })
}

fn transaction(message: &Message) -> ProxyResult<&TransactionRequest> {
    match message {
        Message::Request(Request::Transaction(request)) => Ok(request),
        _ => Err(ProxyError::malformed("proxy applied to the wrong message")),
    }
}

fn transaction_body(layout: Layout, request: &TransactionRequest) -> BodyWriter {
    layout
        .writer()
        .target(&request.header.target)
        .put(SEQUENCE, request.header.sequence)
        .reply_to(request.header.reply_to)
}

fn transaction_message(r: &BodyReader<'_>, payload: TransactionPayload) -> ProxyResult<Message> {
    Ok(Message::Request(Request::Transaction(TransactionRequest {
        header: header(r)?,
        payload,
    })))
}

pub(super) fn encode_connect(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let Message::Request(Request::Connect(request)) = message else {
        return Err(ProxyError::malformed("proxy applied to the wrong message"));
    };
    Ok(layout
        .writer()
        .target(&request.header.target)
        .put(SEQUENCE, request.header.sequence)
        .reply_to(request.header.reply_to)
        .put(MIN_VERSION, request.min_version.short_value())
        .put(MAX_VERSION, request.max_version.short_value())
        .finish())
}

pub(super) fn decode_connect(r: &BodyReader<'_>) -> ProxyResult<Message> {
    Ok(Message::Request(Request::Connect(ConnectClientRequest {
        header: header(r)?,
        min_version: r.version_bound(MIN_VERSION)?,
        max_version: r.version_bound(MAX_VERSION)?,
    })))
}

pub(super) fn encode_history(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let Message::Request(Request::History(request)) = message else {
        return Err(ProxyError::malformed("proxy applied to the wrong message"));
    };
    Ok(layout
        .writer()
        .target(&request.header.target)
        .put(SEQUENCE, request.header.sequence)
        .reply_to(request.header.reply_to)
        .finish())
}

fn decode_history(r: &BodyReader<'_>, operation: HistoryOperation) -> ProxyResult<Message> {
    Ok(Message::Request(Request::History(LocalHistoryRequest {
        header: header(r)?,
        operation,
    })))
}

pub(super) fn decode_create_history(r: &BodyReader<'_>) -> ProxyResult<Message> {
    decode_history(r, HistoryOperation::Create)
}

pub(super) fn decode_destroy_history(r: &BodyReader<'_>) -> ProxyResult<Message> {
    decode_history(r, HistoryOperation::Destroy)
}

pub(super) fn decode_purge_history(r: &BodyReader<'_>) -> ProxyResult<Message> {
    decode_history(r, HistoryOperation::Purge)
}

pub(super) fn encode_modify(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let request = transaction(message)?;
    let TransactionPayload::Modify { modifications, protocol } = &request.payload else {
        return Err(ProxyError::malformed("expected a modify request"));
    };
    Ok(transaction_body(layout, request)
        .modifications(modifications)
        .protocol(*protocol)
        .finish())
}

pub(super) fn decode_modify(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let payload = TransactionPayload::Modify {
        modifications: r.modifications()?,
        protocol: r.protocol()?,
    };
    transaction_message(r, payload)
}

/// Read and exists bodies before snapshot-only reads existed. A set
/// `snapshot_only` flag cannot be expressed and is refused.
pub(super) fn encode_path_query_v1(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let request = transaction(message)?;
    let (TransactionPayload::Read {
        path,
        snapshot_only,
    }
    | TransactionPayload::Exists {
        path,
        snapshot_only,
    }) = &request.payload
    else {
        return Err(ProxyError::malformed("expected a read or exists request"));
    };
    if *snapshot_only {
        return Err(ProxyError::UnsupportedVersion {
            message_type: message.message_type()?,
            version: layout.version(),
        });
    }
    Ok(transaction_body(layout, request).path(path).finish())
}

pub(super) fn encode_path_query_v2(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let request = transaction(message)?;
    let (TransactionPayload::Read {
        path,
        snapshot_only,
    }
    | TransactionPayload::Exists {
        path,
        snapshot_only,
    }) = &request.payload
    else {
        return Err(ProxyError::malformed("expected a read or exists request"));
    };
    Ok(transaction_body(layout, request)
        .path(path)
        .put(SNAPSHOT_ONLY, *snapshot_only)
        .finish())
}

pub(super) fn decode_read_v1(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let payload = TransactionPayload::Read {
        path: r.path()?,
        snapshot_only: false,
    };
    transaction_message(r, payload)
}

pub(super) fn decode_read_v2(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let payload = TransactionPayload::Read {
        path: r.path()?,
        snapshot_only: r.bool(SNAPSHOT_ONLY)?,
    };
    transaction_message(r, payload)
}

pub(super) fn decode_exists_v1(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let payload = TransactionPayload::Exists {
        path: r.path()?,
        snapshot_only: false,
    };
    transaction_message(r, payload)
}

pub(super) fn decode_exists_v2(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let payload = TransactionPayload::Exists {
        path: r.path()?,
        snapshot_only: r.bool(SNAPSHOT_ONLY)?,
    };
    transaction_message(r, payload)
}

/// Header-only transaction requests: pre-commit, do-commit, abort, purge.
pub(super) fn encode_transaction_header(message: &Message, layout: Layout) -> ProxyResult<Value> {
    Ok(transaction_body(layout, transaction(message)?).finish())
}

pub(super) fn decode_pre_commit(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionPayload::PreCommit)
}

pub(super) fn decode_do_commit(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionPayload::DoCommit)
}

pub(super) fn decode_abort(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionPayload::Abort)
}

pub(super) fn decode_purge(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionPayload::Purge)
}

pub(super) fn encode_skip(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let request = transaction(message)?;
    let TransactionPayload::SkipTransactions { others } = &request.payload else {
        return Err(ProxyError::malformed("expected a skip request"));
    };
    let others: Vec<Value> = others.iter().copied().map(Value::from).collect();
    Ok(transaction_body(layout, request).put(OTHERS, others).finish())
}

pub(super) fn decode_skip(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let others = r
        .array(OTHERS)?
        .iter()
        .map(|v| v.as_u64().ok_or_else(|| ProxyError::malformed("skipped id must be unsigned")))
        .collect::<ProxyResult<Vec<_>>>()?;
    transaction_message(r, TransactionPayload::SkipTransactions { others })
}
