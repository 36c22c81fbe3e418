//! Per-version body layout: field keys, path form, shared field codecs.

use shardline_codec::{Decode, Encode, MapBuilder, MapReader, Value};

use crate::abi::AbiVersion;
use crate::data::{DataNode, DataPath};
use crate::envelope::{ActorAddress, ReplyTo};
use crate::error::{ProxyError, ProxyResult, VersionError};
use crate::exception::{RequestException, RuntimeRequestException};
use crate::modification::{PersistenceProtocol, TransactionModification};
use crate::ranges::RangeSet;

/// A body field with its text name and compact code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Field {
    name: &'static str,
    code: u8,
}

macro_rules! fields {
    ($($konst:ident = ($name:literal, $code:literal)),* $(,)?) => {
        $(pub(crate) const $konst: Field = Field { name: $name, code: $code };)*
    };
}

fields! {
    TARGET = ("target", 0),
    SEQUENCE = ("sequence", 1),
    REPLY_TO = ("reply-to", 2),
    MIN_VERSION = ("min-version", 3),
    MAX_VERSION = ("max-version", 4),
    MODIFICATIONS = ("modifications", 5),
    PROTOCOL = ("protocol", 6),
    PATH = ("path", 7),
    SNAPSHOT_ONLY = ("snapshot-only", 8),
    OTHERS = ("others", 9),
    BACKEND = ("backend", 10),
    ALTERNATES = ("alternates", 11),
    MAX_MESSAGES = ("max-messages", 12),
    DATA = ("data", 13),
    EXISTS = ("exists", 14),
    CAUSE = ("cause", 15),
    KIND = ("kind", 16),
    EXPECTED = ("expected", 17),
    LAST_KNOWN = ("last-known", 18),
    PURGED = ("purged", 19),
    SUCCESSFUL = ("successful", 20),
    ACTOR = ("actor", 21),
    NEW_GENERATION = ("new-generation", 22),
    REQUEST = ("request", 23),
    MESSAGE = ("message", 24),
    DIAGNOSTIC = ("diagnostic", 25),
    RETRIABLE = ("retriable", 26),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyScheme {
    Text,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathScheme {
    Joined,
    Segmented,
}

/// How bodies look at one ABI version.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    version: AbiVersion,
    keys: KeyScheme,
    paths: PathScheme,
}

impl Layout {
    pub(crate) fn for_version(version: AbiVersion) -> Self {
        Self {
            version,
            keys: if version >= AbiVersion::Magnesium {
                KeyScheme::Compact
            } else {
                KeyScheme::Text
            },
            paths: if version >= AbiVersion::NeonSr2 {
                PathScheme::Segmented
            } else {
                PathScheme::Joined
            },
        }
    }

    pub(crate) fn version(&self) -> AbiVersion {
        self.version
    }

    fn key(&self, field: Field) -> Value {
        match self.keys {
            KeyScheme::Text => Value::text(field.name),
            KeyScheme::Compact => Value::from(u32::from(field.code)),
        }
    }

    fn path_to_value(&self, path: &DataPath) -> Value {
        match self.paths {
            PathScheme::Joined => Value::text(path.to_string()),
            PathScheme::Segmented => {
                Value::Array(path.segments().iter().map(|s| Value::text(s.as_str())).collect())
            }
        }
    }

    fn path_from_value(&self, value: &Value) -> ProxyResult<DataPath> {
        match self.paths {
            PathScheme::Joined => {
                let text = value
                    .as_text()
                    .ok_or_else(|| ProxyError::malformed("path must be text"))?;
                Ok(text.parse()?)
            }
            PathScheme::Segmented => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ProxyError::malformed("path must be an array"))?;
                let segments = items
                    .iter()
                    .map(|s| {
                        s.as_text()
                            .ok_or_else(|| ProxyError::malformed("path segment must be text"))
                    })
                    .collect::<ProxyResult<Vec<_>>>()?;
                Ok(DataPath::from_segments(segments)?)
            }
        }
    }

    pub(crate) fn writer(self) -> BodyWriter {
        BodyWriter {
            layout: self,
            map: MapBuilder::new(),
        }
    }

    pub(crate) fn reader(self, body: &Value) -> ProxyResult<BodyReader<'_>> {
        Ok(BodyReader {
            layout: self,
            map: MapReader::new(body)?,
        })
    }
}

/// Accumulates one message body.
pub(crate) struct BodyWriter {
    layout: Layout,
    map: MapBuilder,
}

impl BodyWriter {
    pub(crate) fn put(self, field: Field, value: impl Into<Value>) -> Self {
        let key = self.layout.key(field);
        Self {
            layout: self.layout,
            map: self.map.field(key, value),
        }
    }

    pub(crate) fn put_opt(self, field: Field, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.put(field, v),
            None => self,
        }
    }

    pub(crate) fn target(self, target: &impl Encode) -> Self {
        self.put(TARGET, target.to_value())
    }

    pub(crate) fn path(self, path: &DataPath) -> Self {
        let value = self.layout.path_to_value(path);
        self.put(PATH, value)
    }

    pub(crate) fn reply_to(self, reply_to: ReplyTo) -> Self {
        self.put(
            REPLY_TO,
            Value::Array(vec![Value::from(reply_to.channel), Value::from(reply_to.token)]),
        )
    }

    pub(crate) fn modifications(self, modifications: &[TransactionModification]) -> Self {
        let items = modifications
            .iter()
            .map(|m| {
                let mut item = vec![
                    Value::from(u32::from(m.kind_code())),
                    self.layout.path_to_value(m.path()),
                ];
                if let Some(data) = m.data() {
                    item.push(data.value().clone());
                }
                Value::Array(item)
            })
            .collect::<Vec<_>>();
        self.put(MODIFICATIONS, items)
    }

    pub(crate) fn protocol(self, protocol: Option<PersistenceProtocol>) -> Self {
        self.put_opt(PROTOCOL, protocol.map(|p| u32::from(p.to_code())))
    }

    pub(crate) fn cause(self, cause: &RequestException) -> Self {
        let nested = exception_body(self.layout, cause);
        self.put(CAUSE, nested)
    }

    pub(crate) fn finish(self) -> Value {
        self.map.build()
    }
}

/// Typed field access to one message body.
pub(crate) struct BodyReader<'a> {
    layout: Layout,
    map: MapReader<'a>,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn version(&self) -> AbiVersion {
        self.layout.version
    }

    pub(crate) fn raw(&self, field: Field) -> ProxyResult<&'a Value> {
        Ok(self.map.required(&self.layout.key(field))?)
    }

    pub(crate) fn raw_opt(&self, field: Field) -> Option<&'a Value> {
        self.map.optional(&self.layout.key(field))
    }

    pub(crate) fn u64(&self, field: Field) -> ProxyResult<u64> {
        Ok(self.map.u64(&self.layout.key(field))?)
    }

    pub(crate) fn u64_opt(&self, field: Field) -> ProxyResult<Option<u64>> {
        Ok(self.map.optional_u64(&self.layout.key(field))?)
    }

    pub(crate) fn bool(&self, field: Field) -> ProxyResult<bool> {
        Ok(self.map.bool(&self.layout.key(field))?)
    }

    pub(crate) fn text(&self, field: Field) -> ProxyResult<&'a str> {
        Ok(self.map.text(&self.layout.key(field))?)
    }

    pub(crate) fn array(&self, field: Field) -> ProxyResult<&'a [Value]> {
        Ok(self.map.array(&self.layout.key(field))?)
    }

    pub(crate) fn target<T: Decode>(&self) -> ProxyResult<T> {
        Ok(T::from_value(self.raw(TARGET)?)?)
    }

    pub(crate) fn path(&self) -> ProxyResult<DataPath> {
        self.layout.path_from_value(self.raw(PATH)?)
    }

    pub(crate) fn reply_to(&self) -> ProxyResult<ReplyTo> {
        match self.array(REPLY_TO)? {
            [channel, token] => match (channel.as_u64(), token.as_u64()) {
                (Some(channel), Some(token)) => Ok(ReplyTo { channel, token }),
                _ => Err(ProxyError::malformed("reply-to components must be unsigned")),
            },
            _ => Err(ProxyError::malformed("reply-to must have two components")),
        }
    }

    /// A version bound in a connect request. Values outside the released
    /// range map to the matching test sentinel so range checks still work.
    pub(crate) fn version_bound(&self, field: Field) -> ProxyResult<AbiVersion> {
        let raw = u16::try_from(self.u64(field)?)
            .map_err(|_| ProxyError::malformed("version out of range"))?;
        Ok(match AbiVersion::from_short(raw) {
            Ok(version) => version,
            Err(VersionError::Past(_)) => AbiVersion::TestPast,
            Err(VersionError::Future(_)) => AbiVersion::TestFuture,
        })
    }

    pub(crate) fn modifications(&self) -> ProxyResult<Vec<TransactionModification>> {
        self.array(MODIFICATIONS)?
            .iter()
            .map(|item| {
                let parts = item
                    .as_array()
                    .ok_or_else(|| ProxyError::malformed("modification must be an array"))?;
                let (code, path, data) = match parts {
                    [code, path] => (code, path, None),
                    [code, path, data] => (code, path, Some(data)),
                    _ => return Err(ProxyError::malformed("modification has wrong arity")),
                };
                let path = self.layout.path_from_value(path)?;
                let data = data.map(|d| DataNode::new(d.clone()));
                match (code.as_u64(), data) {
                    (Some(1), Some(data)) => Ok(TransactionModification::Write { path, data }),
                    (Some(2), Some(data)) => Ok(TransactionModification::Merge { path, data }),
                    (Some(3), None) => Ok(TransactionModification::Delete { path }),
                    _ => Err(ProxyError::malformed(format!("bad modification {item}"))),
                }
            })
            .collect()
    }

    pub(crate) fn protocol(&self) -> ProxyResult<Option<PersistenceProtocol>> {
        self.u64_opt(PROTOCOL)?
            .map(|code| {
                u8::try_from(code)
                    .ok()
                    .and_then(PersistenceProtocol::from_code)
                    .ok_or_else(|| {
                        ProxyError::malformed(format!("unknown persistence protocol {code}"))
                    })
            })
            .transpose()
    }

    pub(crate) fn cause(&self) -> ProxyResult<RequestException> {
        let nested = self.layout.reader(self.raw(CAUSE)?)?;
        exception_from_body(&nested)
    }
}

fn exception_body(layout: Layout, cause: &RequestException) -> Value {
    let w = layout.writer();
    let w = match cause {
        RequestException::OutOfOrder { expected } => w.put(KIND, 1u32).put(EXPECTED, *expected),
        RequestException::UnknownHistory { last_known } => {
            w.put(KIND, 2u32).put_opt(LAST_KNOWN, *last_known)
        }
        RequestException::DeadHistory { purged } => {
            w.put(KIND, 3u32).put(PURGED, purged.to_value())
        }
        RequestException::DeadTransaction { purged } => {
            w.put(KIND, 4u32).put(PURGED, purged.to_value())
        }
        RequestException::ClosedTransaction { successful } => {
            w.put(KIND, 5u32).put(SUCCESSFUL, *successful)
        }
        RequestException::NotLeader { actor } => w.put(KIND, 6u32).put(ACTOR, actor.as_str()),
        RequestException::RetiredGeneration { new_generation } => {
            w.put(KIND, 7u32).put(NEW_GENERATION, *new_generation)
        }
        RequestException::UnsupportedRequest { kind } => {
            w.put(KIND, 8u32).put(REQUEST, kind.as_str())
        }
        RequestException::Runtime(runtime) => w
            .put(KIND, 9u32)
            .put(MESSAGE, runtime.message.as_str())
            .put_opt(DIAGNOSTIC, runtime.cause.as_deref())
            .put(RETRIABLE, runtime.retriable),
    };
    w.finish()
}

fn exception_from_body(r: &BodyReader<'_>) -> ProxyResult<RequestException> {
    let purged = |r: &BodyReader<'_>| {
        RangeSet::from_value(r.raw(PURGED)?)
            .ok_or_else(|| ProxyError::malformed("malformed purged ranges"))
    };
    Ok(match r.u64(KIND)? {
        1 => RequestException::OutOfOrder {
            expected: r.u64(EXPECTED)?,
        },
        2 => RequestException::UnknownHistory {
            last_known: r.u64_opt(LAST_KNOWN)?,
        },
        3 => RequestException::DeadHistory { purged: purged(r)? },
        4 => RequestException::DeadTransaction { purged: purged(r)? },
        5 => RequestException::ClosedTransaction {
            successful: r.bool(SUCCESSFUL)?,
        },
        6 => RequestException::NotLeader {
            actor: ActorAddress::new(r.text(ACTOR)?),
        },
        7 => RequestException::RetiredGeneration {
            new_generation: r.u64(NEW_GENERATION)?,
        },
        8 => RequestException::UnsupportedRequest {
            kind: r.text(REQUEST)?.to_string(),
        },
        9 => RequestException::Runtime(RuntimeRequestException {
            message: r.text(MESSAGE)?.to_string(),
            cause: r
                .raw_opt(DIAGNOSTIC)
                .map(|v| {
                    v.as_text()
                        .map(str::to_string)
                        .ok_or_else(|| ProxyError::malformed("diagnostic must be text"))
                })
                .transpose()?,
            retriable: r.bool(RETRIABLE)?,
        }),
        other => return Err(ProxyError::malformed(format!("unknown exception kind {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_scheme_by_version() {
        assert_eq!(
            Layout::for_version(AbiVersion::SodiumSr1).key(SEQUENCE),
            Value::text("sequence")
        );
        assert_eq!(Layout::for_version(AbiVersion::Magnesium).key(SEQUENCE), Value::Integer(1));
    }

    #[test]
    fn path_scheme_by_version() {
        let path: DataPath = "/a/b".parse().unwrap();
        assert_eq!(
            Layout::for_version(AbiVersion::Boron).path_to_value(&path),
            Value::text("/a/b")
        );
        assert_eq!(
            Layout::for_version(AbiVersion::NeonSr2).path_to_value(&path),
            Value::Array(vec![Value::text("a"), Value::text("b")])
        );
        for version in AbiVersion::RELEASED {
            let layout = Layout::for_version(version);
            assert_eq!(layout.path_from_value(&layout.path_to_value(&path)).unwrap(), path);
        }
    }

    #[test]
    fn exception_bodies_roundtrip() {
        let causes = [
            RequestException::OutOfOrder { expected: 3 },
            RequestException::UnknownHistory { last_known: None },
            RequestException::DeadTransaction {
                purged: [1, 2, 9].into_iter().collect(),
            },
            RequestException::NotLeader {
                actor: ActorAddress::new("shard@m1"),
            },
            RequestException::Runtime(
                RuntimeRequestException::new("Commit failed", Some("io".into())).retriable(),
            ),
        ];
        for version in AbiVersion::RELEASED {
            let layout = Layout::for_version(version);
            for cause in &causes {
                let body = exception_body(layout, cause);
                let reader = layout.reader(&body).unwrap();
                assert_eq!(&exception_from_body(&reader).unwrap(), cause);
            }
        }
    }

    #[test]
    fn runtime_diagnostic_survives_the_wire() {
        let layout = Layout::for_version(AbiVersion::current());
        let cause = RequestException::runtime("CanCommit failed", Some("conflict".into()));
        let body = exception_body(layout, &cause);
        match exception_from_body(&layout.reader(&body).unwrap()).unwrap() {
            RequestException::Runtime(runtime) => {
                assert_eq!(runtime.cause.as_deref(), Some("conflict"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
