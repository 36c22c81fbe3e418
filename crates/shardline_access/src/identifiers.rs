//! Identifier hierarchy: frontend, client, local history, transaction.
//!
//! Identifiers are plain values. They carry no ABI version and compare
//! lexicographically over their components, so a `BTreeMap` keyed by them
//! iterates in open order.

use std::fmt;

use shardline_codec::{CodecError, CodecResult, Decode, Encode, Value};

use crate::error::InvalidIdentifierError;

/// Name of a cluster member.
///
/// Must be non-empty and contain no control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberName(String);

impl MemberName {
    /// Validate and wrap a member name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentifierError`] for empty names or names with
    /// control characters.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidIdentifierError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.chars().any(char::is_control) {
            Some("must be printable")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidIdentifierError {
                kind: "member name",
                value: name,
                reason,
            }),
            None => Ok(Self(name)),
        }
    }

    /// The name as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of a frontend application, e.g. `datastore-config`.
///
/// Allowed characters are ASCII letters and `-_.*+:=,!~';`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrontendType(String);

impl FrontendType {
    /// Validate and wrap a frontend type.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentifierError`] for empty input or a character
    /// outside the allowed set.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidIdentifierError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if !name.chars().all(|c| c.is_ascii_alphabetic() || "-_.*+:=,!~';".contains(c)) {
            Some("contains a character outside [a-zA-Z-_.*+:=,!~';]")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidIdentifierError {
                kind: "frontend type",
                value: name,
                reason,
            }),
            None => Ok(Self(name)),
        }
    }

    /// The type as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrontendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical client application instance on one member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrontendIdentifier {
    member: MemberName,
    frontend_type: FrontendType,
}

impl FrontendIdentifier {
    /// Create a frontend identifier.
    #[must_use]
    pub fn new(member: MemberName, frontend_type: FrontendType) -> Self {
        Self { member, frontend_type }
    }

    /// Validate both components from text.
    ///
    /// # Errors
    ///
    /// Propagates the component validation error.
    pub fn parse(member: &str, frontend_type: &str) -> Result<Self, InvalidIdentifierError> {
        Ok(Self::new(MemberName::new(member)?, FrontendType::new(frontend_type)?))
    }

    /// Member name.
    pub fn member(&self) -> &MemberName {
        &self.member
    }

    /// Frontend type.
    pub fn frontend_type(&self) -> &FrontendType {
        &self.frontend_type
    }
}

impl fmt::Display for FrontendIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-frontend-{}", self.member, self.frontend_type)
    }
}

/// One incarnation of a frontend. A restart bumps the generation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientIdentifier {
    frontend: FrontendIdentifier,
    generation: u64,
}

impl ClientIdentifier {
    /// Create a client identifier.
    #[must_use]
    pub fn new(frontend: FrontendIdentifier, generation: u64) -> Self {
        Self { frontend, generation }
    }

    /// Owning frontend.
    pub fn frontend(&self) -> &FrontendIdentifier {
        &self.frontend
    }

    /// Generation number.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-fe-{}", self.frontend, self.generation)
    }
}

/// An ordered chain of transactions. History 0 is the standalone scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalHistoryIdentifier {
    client: ClientIdentifier,
    history_id: u64,
}

impl LocalHistoryIdentifier {
    /// History id reserved for standalone transactions.
    pub const STANDALONE: u64 = 0;

    /// Create a history identifier.
    #[must_use]
    pub fn new(client: ClientIdentifier, history_id: u64) -> Self {
        Self { client, history_id }
    }

    /// The standalone history of `client`.
    #[must_use]
    pub fn standalone(client: ClientIdentifier) -> Self {
        Self::new(client, Self::STANDALONE)
    }

    /// Owning client.
    pub fn client(&self) -> &ClientIdentifier {
        &self.client
    }

    /// History number within the client.
    pub fn history_id(&self) -> u64 {
        self.history_id
    }

    /// Whether this is the implicit standalone history.
    pub fn is_standalone(&self) -> bool {
        self.history_id == Self::STANDALONE
    }
}

impl fmt::Display for LocalHistoryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-chn-{}", self.client, self.history_id)
    }
}

/// One transaction within a history.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionIdentifier {
    history: LocalHistoryIdentifier,
    transaction_id: u64,
}

impl TransactionIdentifier {
    /// Create a transaction identifier.
    #[must_use]
    pub fn new(history: LocalHistoryIdentifier, transaction_id: u64) -> Self {
        Self { history, transaction_id }
    }

    /// Owning history.
    pub fn history(&self) -> &LocalHistoryIdentifier {
        &self.history
    }

    /// Transaction number within the history.
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// A sibling in the same history.
    #[must_use]
    pub fn sibling(&self, transaction_id: u64) -> Self {
        Self::new(self.history.clone(), transaction_id)
    }
}

impl fmt::Display for TransactionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-txn-{}", self.history, self.transaction_id)
    }
}

// Binary form: nested arrays, outermost component first.

impl Encode for FrontendIdentifier {
    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::text(self.member.as_str()),
            Value::text(self.frontend_type.as_str()),
        ])
    }
}

impl Decode for FrontendIdentifier {
    fn from_value(value: &Value) -> CodecResult<Self> {
        match value.as_array() {
            Some([member, frontend_type]) => {
                let member = member.as_text().ok_or_else(|| shape("frontend member"))?;
                let frontend_type = frontend_type.as_text().ok_or_else(|| shape("frontend type"))?;
                Self::parse(member, frontend_type)
                    .map_err(|e| CodecError::invalid_structure(e.to_string()))
            }
            _ => Err(shape("frontend identifier")),
        }
    }
}

impl Encode for ClientIdentifier {
    fn to_value(&self) -> Value {
        Value::Array(vec![self.frontend.to_value(), Value::from(self.generation)])
    }
}

impl Decode for ClientIdentifier {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let (parent, generation) = split_pair(value, "client identifier")?;
        Ok(Self::new(FrontendIdentifier::from_value(parent)?, generation))
    }
}

impl Encode for LocalHistoryIdentifier {
    fn to_value(&self) -> Value {
        Value::Array(vec![self.client.to_value(), Value::from(self.history_id)])
    }
}

impl Decode for LocalHistoryIdentifier {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let (parent, history_id) = split_pair(value, "history identifier")?;
        Ok(Self::new(ClientIdentifier::from_value(parent)?, history_id))
    }
}

impl Encode for TransactionIdentifier {
    fn to_value(&self) -> Value {
        Value::Array(vec![self.history.to_value(), Value::from(self.transaction_id)])
    }
}

impl Decode for TransactionIdentifier {
    fn from_value(value: &Value) -> CodecResult<Self> {
        let (parent, transaction_id) = split_pair(value, "transaction identifier")?;
        Ok(Self::new(LocalHistoryIdentifier::from_value(parent)?, transaction_id))
    }
}

fn split_pair<'a>(value: &'a Value, what: &str) -> CodecResult<(&'a Value, u64)> {
    match value.as_array() {
        Some([parent, number]) => Ok((parent, number.as_u64().ok_or_else(|| shape(what))?)),
        _ => Err(shape(what)),
    }
}

fn shape(what: &str) -> CodecError {
    CodecError::invalid_structure(format!("malformed {what}"))
}
