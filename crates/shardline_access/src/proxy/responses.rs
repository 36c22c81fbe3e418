//! Response proxies.

use shardline_codec::{Decode, Value};

use super::layout::{
    BodyReader, BodyWriter, Layout, ALTERNATES, BACKEND, DATA, EXISTS, MAX_MESSAGES, SEQUENCE,
};
use super::Message;
use crate::data::DataNode;
use crate::envelope::{ActorAddress, RequestTarget, ResponseHeader};
use crate::error::{ProxyError, ProxyResult};
use crate::identifiers::{ClientIdentifier, LocalHistoryIdentifier, TransactionIdentifier};
use crate::response::{
    ConnectClientSuccess, LocalHistorySuccess, RequestFailure, RequestSuccess, Response,
    TransactionSuccess, TransactionSuccessPayload,
};

fn header<T: Decode>(r: &BodyReader<'_>) -> ProxyResult<ResponseHeader<T>> {
    Ok(ResponseHeader {
        target: r.target()?,
        sequence: r.u64(SEQUENCE)?,
        version: r.version(),
    })
}

fn wrong() -> ProxyError {
    ProxyError::malformed("proxy applied to the wrong message")
}

fn transaction(message: &Message) -> ProxyResult<&TransactionSuccess> {
    match message {
        Message::Response(Response::Success(RequestSuccess::Transaction(success))) => Ok(success),
        _ => Err(wrong()),
    }
}

fn transaction_body(layout: Layout, success: &TransactionSuccess) -> BodyWriter {
    layout
        .writer()
        .target(&success.header.target)
        .put(SEQUENCE, success.header.sequence)
}

fn transaction_message(
    r: &BodyReader<'_>,
    payload: TransactionSuccessPayload,
) -> ProxyResult<Message> {
    Ok(Message::Response(Response::Success(RequestSuccess::Transaction(
        TransactionSuccess {
            header: header(r)?,
            payload,
        },
    ))))
}

/// The data-tree snapshot is an in-process handle and is left out.
pub(super) fn encode_connect_success(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let Message::Response(Response::Success(RequestSuccess::Connect(success))) = message else {
        return Err(wrong());
    };
    let alternates: Vec<Value> =
        success.alternates.iter().map(|a| Value::text(a.as_str())).collect();
    Ok(layout
        .writer()
        .target(&success.header.target)
        .put(SEQUENCE, success.header.sequence)
        .put(BACKEND, success.backend.as_str())
        .put(ALTERNATES, alternates)
        .put(MAX_MESSAGES, success.max_messages)
        .finish())
}

pub(super) fn decode_connect_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let alternates = r
        .array(ALTERNATES)?
        .iter()
        .map(|v| {
            v.as_text()
                .map(ActorAddress::new)
                .ok_or_else(|| ProxyError::malformed("alternate must be text"))
        })
        .collect::<ProxyResult<Vec<_>>>()?;
    let max_messages = u32::try_from(r.u64(MAX_MESSAGES)?)
        .map_err(|_| ProxyError::malformed("max-messages out of range"))?;
    Ok(Message::Response(Response::Success(RequestSuccess::Connect(
        ConnectClientSuccess {
            header: header::<ClientIdentifier>(r)?,
            backend: ActorAddress::new(r.text(BACKEND)?),
            alternates,
            data_tree_snapshot: None,
            max_messages,
        },
    ))))
}

pub(super) fn encode_history_success(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let Message::Response(Response::Success(RequestSuccess::History(success))) = message else {
        return Err(wrong());
    };
    Ok(layout
        .writer()
        .target(&success.header.target)
        .put(SEQUENCE, success.header.sequence)
        .finish())
}

pub(super) fn decode_history_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    Ok(Message::Response(Response::Success(RequestSuccess::History(
        LocalHistorySuccess { header: header(r)? },
    ))))
}

/// Failures of every target kind share one body shape.
pub(super) fn encode_failure(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let Message::Response(Response::Failure(failure)) = message else {
        return Err(wrong());
    };
    let writer = layout.writer();
    let writer = match &failure.header.target {
        RequestTarget::Client(id) => writer.target(id),
        RequestTarget::History(id) => writer.target(id),
        RequestTarget::Transaction(id) => writer.target(id),
    };
    Ok(writer
        .put(SEQUENCE, failure.header.sequence)
        .cause(&failure.cause)
        .finish())
}

fn decode_failure<T: Decode + Into<RequestTarget>>(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let header = header::<T>(r)?;
    Ok(Message::Response(Response::Failure(RequestFailure {
        header: ResponseHeader {
            target: header.target.into(),
            sequence: header.sequence,
            version: header.version,
        },
        cause: r.cause()?,
    })))
}

pub(super) fn decode_connect_failure(r: &BodyReader<'_>) -> ProxyResult<Message> {
    decode_failure::<ClientIdentifier>(r)
}

pub(super) fn decode_history_failure(r: &BodyReader<'_>) -> ProxyResult<Message> {
    decode_failure::<LocalHistoryIdentifier>(r)
}

pub(super) fn decode_transaction_failure(r: &BodyReader<'_>) -> ProxyResult<Message> {
    decode_failure::<TransactionIdentifier>(r)
}

/// Acknowledgement-only transaction successes.
pub(super) fn encode_transaction_ack(message: &Message, layout: Layout) -> ProxyResult<Value> {
    Ok(transaction_body(layout, transaction(message)?).finish())
}

pub(super) fn decode_modify_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::Modify)
}

pub(super) fn decode_can_commit_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::CanCommit)
}

pub(super) fn decode_pre_commit_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::PreCommit)
}

pub(super) fn decode_commit_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::Commit)
}

pub(super) fn decode_abort_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::Abort)
}

pub(super) fn decode_purge_response(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::Purge)
}

pub(super) fn decode_skip_response(r: &BodyReader<'_>) -> ProxyResult<Message> {
    transaction_message(r, TransactionSuccessPayload::SkipTransactions)
}

/// An absent node is a missing field; a present node is wrapped in a
/// one-element array so a `null` node stays distinguishable.
pub(super) fn encode_read_success(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let success = transaction(message)?;
    let TransactionSuccessPayload::Read { data } = &success.payload else {
        return Err(wrong());
    };
    Ok(transaction_body(layout, success)
        .put_opt(DATA, data.as_ref().map(|d| vec![d.value().clone()]))
        .finish())
}

pub(super) fn decode_read_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let data = match r.raw_opt(DATA).map(Value::as_array) {
        None => None,
        Some(Some([node])) => Some(DataNode::new(node.clone())),
        Some(_) => return Err(ProxyError::malformed("read data must be a one-element array")),
    };
    transaction_message(r, TransactionSuccessPayload::Read { data })
}

pub(super) fn encode_exists_success(message: &Message, layout: Layout) -> ProxyResult<Value> {
    let success = transaction(message)?;
    let TransactionSuccessPayload::Exists { exists } = &success.payload else {
        return Err(wrong());
    };
    Ok(transaction_body(layout, success).put(EXISTS, *exists).finish())
}

pub(super) fn decode_exists_success(r: &BodyReader<'_>) -> ProxyResult<Message> {
    let exists = r.bool(EXISTS)?;
    transaction_message(r, TransactionSuccessPayload::Exists { exists })
}
