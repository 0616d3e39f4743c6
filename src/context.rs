//! Evaluation contexts: the subjects that flag evaluations and events are associated with.
//!
//! A context is either a single-kind record or a multi-kind container (`"kind": "multi"`) holding
//! one record per kind. Only `kind`, `key` and the transient flag mean anything to this crate;
//! all other attributes are carried through untouched.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

const KIND_ATTRIBUTE: &str = "kind";
const KEY_ATTRIBUTE: &str = "key";

/// Kind of a multi-kind context container.
pub const MULTI_KIND: &str = "multi";
/// Kind implied when a context has no `kind`.
pub const USER_KIND: &str = "user";

const ANON_USER_STORAGE_KEY: &str = "ld:$anonUserId";

/// Kind of a single context record.
///
/// Legacy user contexts predate typed kinds: they mark themselves with `anonymous` and their
/// generated key lives under a storage key older SDK versions already use. Records with an
/// explicit kind use `transient` and a storage key of their own. An explicit `"user"` record
/// shares the legacy storage key and accepts either flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind<'a> {
    /// No `kind` attribute.
    LegacyUser,
    /// Explicit `"user"` kind.
    User,
    /// Any other kind.
    Typed(&'a str),
}

impl<'a> ContextKind<'a> {
    /// Classify a `kind` attribute value.
    pub fn from_kind(kind: Option<&'a str>) -> ContextKind<'a> {
        match kind {
            None => ContextKind::LegacyUser,
            Some(USER_KIND) => ContextKind::User,
            Some(kind) => ContextKind::Typed(kind),
        }
    }

    /// Kind name.
    pub fn name(&self) -> &'a str {
        match *self {
            ContextKind::LegacyUser | ContextKind::User => USER_KIND,
            ContextKind::Typed(kind) => kind,
        }
    }

    /// Attributes that mark a key-less record of this kind as transient. Any of them set to
    /// `true` is enough.
    pub fn transient_attributes(&self) -> &'static [&'static str] {
        match self {
            ContextKind::LegacyUser => &["anonymous"],
            ContextKind::User => &["anonymous", "transient"],
            ContextKind::Typed(_) => &["transient"],
        }
    }

    /// Persistent storage key for the generated key of this kind.
    pub fn storage_key(&self) -> String {
        match self {
            ContextKind::LegacyUser | ContextKind::User => ANON_USER_STORAGE_KEY.to_owned(),
            ContextKind::Typed(kind) => format!("ld:$contextKey:{kind}"),
        }
    }
}

/// A single-kind context record: a key and opaque attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextRecord {
    key: Option<Value>,
    attributes: Map<String, Value>,
}

impl ContextRecord {
    /// Create a record with no key and no attributes.
    pub fn new() -> ContextRecord {
        ContextRecord::default()
    }

    /// Set the key. Any JSON scalar is accepted and stringified during processing.
    pub fn with_key(mut self, key: impl Into<Value>) -> ContextRecord {
        self.set_key(key);
        self
    }

    /// Set an attribute.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> ContextRecord {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Raw key value, if set.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// Key as a string, if set and a string.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_ref().and_then(Value::as_str)
    }

    /// Set the key. `null` clears it.
    pub fn set_key(&mut self, key: impl Into<Value>) {
        self.key = match key.into() {
            Value::Null => None,
            key => Some(key),
        };
    }

    /// Attribute value.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Whether the record is marked transient for the given kind.
    pub fn is_transient(&self, kind: ContextKind<'_>) -> bool {
        kind.transient_attributes()
            .iter()
            .any(|name| matches!(self.attributes.get(*name), Some(Value::Bool(true))))
    }

    /// Stringify the key in place. Returns `false` if the record has no key.
    pub(crate) fn coerce_key(&mut self) -> bool {
        match &self.key {
            None => false,
            Some(Value::String(_)) => true,
            Some(key) => {
                let coerced = match key {
                    Value::Number(number) => number.to_string(),
                    Value::Bool(value) => value.to_string(),
                    other => other.to_string(),
                };
                self.key = Some(Value::String(coerced));
                true
            }
        }
    }

    fn from_map(mut map: Map<String, Value>) -> ContextRecord {
        let key = map.remove(KEY_ATTRIBUTE).filter(|key| !key.is_null());
        ContextRecord {
            key,
            attributes: map,
        }
    }

    fn into_map(self) -> Map<String, Value> {
        let mut map = self.attributes;
        if let Some(key) = self.key {
            map.insert(KEY_ATTRIBUTE.to_owned(), key);
        }
        map
    }
}

/// A context with a single kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingleKindContext {
    /// `kind` attribute. `None` is a legacy user context.
    pub kind: Option<String>,
    /// Key and attributes.
    pub record: ContextRecord,
}

/// A context made of one record per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiKindContext {
    /// Records by kind name. An entry named `"kind"` is not a record and is ignored.
    pub contexts: BTreeMap<String, ContextRecord>,
}

impl MultiKindContext {
    /// Kind names, excluding the reserved `"kind"` entry.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.contexts
            .keys()
            .map(String::as_str)
            .filter(|kind| *kind != KIND_ATTRIBUTE)
    }

    /// Records by kind, excluding the reserved `"kind"` entry.
    pub fn records_mut(&mut self) -> impl Iterator<Item = (&str, &mut ContextRecord)> {
        self.contexts
            .iter_mut()
            .map(|(kind, record)| (kind.as_str(), record))
            .filter(|(kind, _)| *kind != KIND_ATTRIBUTE)
    }
}

/// An evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Context {
    /// Single-kind (or legacy user) context.
    Single(SingleKindContext),
    /// Multi-kind context.
    Multi(MultiKindContext),
}

impl Context {
    /// Create a single-kind context. `kind = None` makes a legacy user context.
    pub fn single(kind: Option<&str>, record: ContextRecord) -> Context {
        Context::Single(SingleKindContext {
            kind: kind.map(str::to_owned),
            record,
        })
    }

    /// Create a multi-kind context.
    ///
    /// A record named `"kind"` is skipped: that name is taken by the container's own `kind`
    /// attribute and could not be serialized.
    pub fn multi<K: Into<String>>(
        contexts: impl IntoIterator<Item = (K, ContextRecord)>,
    ) -> Context {
        Context::Multi(MultiKindContext {
            contexts: contexts
                .into_iter()
                .map(|(kind, record)| (kind.into(), record))
                .filter(|(kind, _)| {
                    let reserved = kind == KIND_ATTRIBUTE;
                    if reserved {
                        log::warn!(target: "ld_common", "ignoring multi-kind record named \"kind\"");
                    }
                    !reserved
                })
                .collect(),
        })
    }

    /// Kinds present in this context.
    pub fn kinds(&self) -> Vec<&str> {
        match self {
            Context::Single(single) => vec![ContextKind::from_kind(single.kind.as_deref()).name()],
            Context::Multi(multi) => multi.kinds().collect(),
        }
    }

    /// Record for the given kind.
    pub fn record(&self, kind: &str) -> Option<&ContextRecord> {
        match self {
            Context::Single(single) => (ContextKind::from_kind(single.kind.as_deref()).name()
                == ContextKind::from_kind(Some(kind)).name())
            .then_some(&single.record),
            Context::Multi(multi) => multi.contexts.get(kind).filter(|_| kind != KIND_ATTRIBUTE),
        }
    }
}

impl TryFrom<Value> for Context {
    type Error = Error;

    fn try_from(value: Value) -> Result<Context> {
        let mut map = match value {
            Value::Object(map) => map,
            Value::Null => return Err(Error::ContextNotSpecified),
            _ => return Err(Error::InvalidContext("context must be an object".to_owned())),
        };

        let kind = match map.remove(KIND_ATTRIBUTE) {
            None | Some(Value::Null) => None,
            Some(Value::String(kind)) => Some(kind),
            Some(_) => return Err(Error::InvalidContext("kind must be a string".to_owned())),
        };

        if kind.as_deref() == Some(MULTI_KIND) {
            let contexts = map
                .into_iter()
                .map(|(kind, value)| match value {
                    Value::Object(record) => Ok((kind, ContextRecord::from_map(record))),
                    _ => Err(Error::InvalidContext(format!(
                        "context for kind {kind:?} must be an object"
                    ))),
                })
                .collect::<Result<_>>()?;
            return Ok(Context::Multi(MultiKindContext { contexts }));
        }

        Ok(Context::Single(SingleKindContext {
            kind,
            record: ContextRecord::from_map(map),
        }))
    }
}

impl From<Context> for Value {
    fn from(context: Context) -> Value {
        match context {
            Context::Single(single) => {
                let mut map = single.record.into_map();
                if let Some(kind) = single.kind {
                    map.insert(KIND_ATTRIBUTE.to_owned(), Value::String(kind));
                }
                Value::Object(map)
            }
            Context::Multi(multi) => {
                let mut map: Map<String, Value> = multi
                    .contexts
                    .into_iter()
                    .map(|(kind, record)| (kind, Value::Object(record.into_map())))
                    .collect();
                map.insert(KIND_ATTRIBUTE.to_owned(), Value::String(MULTI_KIND.to_owned()));
                Value::Object(map)
            }
        }
    }
}
