use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::ExecError;

/// Scalar payload of a `Variable::Node`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Text(String),
    Number(f64),
    Binary(Vec<u8>),
}

/// Opaque host object carried through the context without stringification
/// (system info, http response handles and the like). Conversion operations
/// other than `to_text` reject it.
#[derive(Clone)]
pub struct InternalHandle {
    pub label: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl InternalHandle {
    pub fn new(label: impl Into<String>, handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            label: label.into(),
            handle,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for InternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl PartialEq for InternalHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

/// Value carrier returned by every processor execution. Absence is the
/// `Empty` variant, never a raw null.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variable {
    #[default]
    Empty,
    Node(NodeValue),
    List(Vec<Variable>),
    Internal(InternalHandle),
}

impl Variable {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Node(NodeValue::Text(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Self::Node(NodeValue::Number(value))
    }

    pub fn binary(value: Vec<u8>) -> Self {
        Self::Node(NodeValue::Binary(value))
    }

    pub fn list(items: Vec<Variable>) -> Self {
        Self::List(items)
    }

    pub fn internal(label: impl Into<String>, handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self::Internal(InternalHandle::new(label, handle))
    }

    /// Total list constructor: absent elements are dropped, so a list of
    /// nothing but absences collapses to an empty `List`.
    pub fn from_nullable_list(items: Vec<Option<Variable>>) -> Self {
        Self::List(items.into_iter().flatten().collect())
    }

    pub fn from_option(value: Option<Variable>) -> Self {
        value.unwrap_or(Self::Empty)
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Node(NodeValue::Text(value)) => value.clone(),
            Self::Node(NodeValue::Number(value)) => format_number(*value),
            Self::Node(NodeValue::Binary(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Self::List(items) => items.iter().map(Variable::to_text).collect(),
            Self::Internal(handle) => handle.label.clone(),
        }
    }

    pub fn to_text_with_charset(&self, charset: &str) -> Result<String, ExecError> {
        match self {
            Self::Node(NodeValue::Binary(bytes)) => decode_bytes(bytes, charset),
            Self::List(items) => {
                let mut out = String::new();
                for item in items {
                    out.push_str(&item.to_text_with_charset(charset)?);
                }
                Ok(out)
            }
            Self::Internal(handle) => Err(ExecError::illegal_state(format!(
                "internal value \"{}\" does not support charset conversion",
                handle.label
            ))),
            other => Ok(other.to_text()),
        }
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, ExecError> {
        match self {
            Self::Empty => Ok(Vec::new()),
            Self::Node(NodeValue::Binary(bytes)) => Ok(bytes.clone()),
            Self::Node(_) => Ok(self.to_text().into_bytes()),
            Self::List(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(item.to_binary()?);
                }
                Ok(out)
            }
            Self::Internal(handle) => Err(ExecError::illegal_state(format!(
                "internal value \"{}\" does not support binary conversion",
                handle.label
            ))),
        }
    }

    pub fn to_binary_with_charset(&self, charset: &str) -> Result<Vec<u8>, ExecError> {
        match self {
            Self::Node(NodeValue::Binary(bytes)) => Ok(bytes.clone()),
            Self::Internal(handle) => Err(ExecError::illegal_state(format!(
                "internal value \"{}\" does not support binary conversion",
                handle.label
            ))),
            other => Ok(other.to_text_with_charset(charset)?.into_bytes()),
        }
    }

    /// List form: a `List` yields its elements, a `Node` a singleton,
    /// `Empty` nothing.
    pub fn to_list(&self) -> Result<Vec<Variable>, ExecError> {
        match self {
            Self::Empty => Ok(Vec::new()),
            Self::Node(_) => Ok(vec![self.clone()]),
            Self::List(items) => Ok(items.clone()),
            Self::Internal(handle) => Err(ExecError::illegal_state(format!(
                "internal value \"{}\" does not support list conversion",
                handle.label
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Node(NodeValue::Text(value)) => value.is_empty(),
            Self::Node(NodeValue::Binary(bytes)) => bytes.is_empty(),
            Self::Node(NodeValue::Number(_)) => false,
            Self::List(items) => items.iter().all(Variable::is_empty),
            Self::Internal(_) => false,
        }
    }
}

impl From<String> for Variable {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<f64> for Variable {
    fn from(value: f64) -> Self {
        Self::number(value)
    }
}

impl From<i64> for Variable {
    fn from(value: i64) -> Self {
        Self::number(value as f64)
    }
}

impl From<Vec<u8>> for Variable {
    fn from(value: Vec<u8>) -> Self {
        Self::binary(value)
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

/// Minimal charset support for collaborator payloads. Full charset detection
/// heuristics are out of scope; utf-8 and latin-1 cover the engine's own
/// needs.
pub fn decode_bytes(bytes: &[u8], charset: &str) -> Result<String, ExecError> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        "iso-8859-1" | "latin1" | "latin-1" => {
            Ok(bytes.iter().map(|byte| *byte as char).collect())
        }
        other => Err(ExecError::config(format!(
            "unsupported charset \"{}\"",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_distinct_from_blank_text_but_both_report_empty() {
        assert!(Variable::Empty.is_empty());
        assert!(Variable::text("").is_empty());
        assert_ne!(Variable::Empty, Variable::text(""));
        assert!(!Variable::number(0.0).is_empty());
    }

    #[test]
    fn list_form_covers_all_variants() {
        assert_eq!(Variable::Empty.to_list().expect("empty"), Vec::new());
        assert_eq!(
            Variable::text("a").to_list().expect("node"),
            vec![Variable::text("a")]
        );
        let list = Variable::list(vec![Variable::text("a"), Variable::number(2.0)]);
        assert_eq!(list.to_list().expect("list").len(), 2);
    }

    #[test]
    fn nullable_list_collapses_absent_elements() {
        let collapsed = Variable::from_nullable_list(vec![None, None]);
        assert_eq!(collapsed, Variable::List(Vec::new()));

        let mixed = Variable::from_nullable_list(vec![Some(Variable::text("x")), None]);
        assert_eq!(mixed, Variable::List(vec![Variable::text("x")]));
    }

    #[test]
    fn numbers_stringify_without_trailing_fraction() {
        assert_eq!(Variable::number(5.0).to_text(), "5");
        assert_eq!(Variable::number(2.5).to_text(), "2.5");
    }

    #[test]
    fn internal_rejects_conversions_but_keeps_its_label() {
        let value = Variable::internal("http-info", Arc::new(42usize));
        assert_eq!(value.to_text(), "http-info");
        assert!(value.to_list().is_err());
        assert!(value.to_binary().is_err());
        assert!(value.to_text_with_charset("utf-8").is_err());
    }

    #[test]
    fn internal_handle_downcasts_to_host_type() {
        let value = Variable::internal("counter", Arc::new(7i32));
        let Variable::Internal(handle) = &value else {
            panic!("internal variant expected");
        };
        assert_eq!(handle.downcast_ref::<i32>(), Some(&7));
        assert_eq!(handle.downcast_ref::<String>(), None);
    }

    #[test]
    fn latin1_decoding_maps_high_bytes() {
        assert_eq!(decode_bytes(&[0x61, 0xE9], "iso-8859-1").expect("latin1"), "aé");
        assert!(decode_bytes(&[0x61], "utf-32").is_err());
    }
}
