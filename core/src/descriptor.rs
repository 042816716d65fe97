//! Request descriptors.
//!
//! # Design
//! A `RequestDescriptor` is plain data mutated through a model's fluent
//! methods until `load()`. Submission moves it into the registry, which makes
//! it read-only for the rest of its life. The sequence id is written exactly
//! once, by the registry, at submission time.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::HttpMethod;

/// Identifier of one submitted request, unique for the lifetime of the
/// registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeqId(u64);

impl SeqId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One part of a multipart upload.
///
/// A part without `file_name` is sent as a plain form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormItem {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl FormItem {
    pub fn field(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: value.into().into_bytes(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        }
    }
}

/// Everything needed to describe a request before it is adapted for the
/// transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDescriptor {
    seq_id: Option<SeqId>,
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, Value>,
    pub body: Option<Vec<u8>>,
    pub form_items: Vec<FormItem>,
    pub file_path: Option<PathBuf>,
    pub fill_extra_headers: bool,
}

impl RequestDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id assigned at submission, `None` before that.
    pub fn seq_id(&self) -> Option<SeqId> {
        self.seq_id
    }

    /// Record the id issued by the registry. Only the first assignment sticks.
    pub(crate) fn assign_seq_id(&mut self, seq_id: SeqId) {
        if self.seq_id.is_none() {
            self.seq_id = Some(seq_id);
        }
    }

    pub fn header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn param(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a parameter unless the value is absent or JSON `null`.
    pub fn param_if_not_null<V: Into<Value>>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            let value = value.into();
            if !value.is_null() {
                self.params.insert(key.into(), value);
            }
        }
        self
    }

    pub fn add_params<I, K, V>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Whether a header with this name is present, ignoring ASCII case.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}
