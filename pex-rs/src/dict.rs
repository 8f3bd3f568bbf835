//! Attribute dictionary.
//!
//! Maps attribute names to their declared data type. Attribute references in
//! expressions are resolved against it at parse time; references to names it
//! does not know can be defined on the fly when the parse rules allow it.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::expr::value::Type;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub name: String,
    pub ty: Type,
    /// Defined while parsing rather than declared up front.
    pub unknown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictError {
    #[error("attribute '{0}' is already defined")]
    Duplicate(String),
    #[error("dictionary is sealed")]
    Sealed,
    #[error("invalid attribute name '{0}'")]
    InvalidName(String),
}

#[derive(Debug, Default)]
pub struct Dictionary {
    attrs: HashMap<String, Arc<Attribute>>,
    sealed: bool,
}

/// Characters allowed in attribute names.
pub fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')
}

/// Whether `name` is the raw numeric form (`Attr-26.9.1`), which needs no
/// cast to be defined.
pub fn is_raw_name(name: &str) -> bool {
    name.strip_prefix("Attr-").is_some_and(|rest| {
        !rest.is_empty()
            && rest.split('.').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    })
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an attribute.
    pub fn define(&mut self, name: &str, ty: Type) -> Result<Arc<Attribute>, DictError> {
        self.insert(name, ty, false)
    }

    /// Define an attribute first seen in an expression.
    pub fn register_unknown(&mut self, name: &str, ty: Type) -> Result<Arc<Attribute>, DictError> {
        self.insert(name, ty, true)
    }

    fn insert(&mut self, name: &str, ty: Type, unknown: bool) -> Result<Arc<Attribute>, DictError> {
        if self.sealed {
            return Err(DictError::Sealed);
        }
        if name.is_empty() || !name.bytes().all(is_name_byte) {
            return Err(DictError::InvalidName(name.to_owned()));
        }
        let key = name.to_ascii_lowercase();
        if self.attrs.contains_key(&key) {
            return Err(DictError::Duplicate(name.to_owned()));
        }
        let attr = Arc::new(Attribute {
            name: name.to_owned(),
            ty,
            unknown,
        });
        log::debug!("defined attribute {name} as {ty}{}", if unknown { " (unknown)" } else { "" });
        self.attrs.insert(key, Arc::clone(&attr));
        Ok(attr)
    }

    /// Look up an attribute; names are case-insensitive.
    pub fn get(&self, name: &str) -> Option<Arc<Attribute>> {
        self.attrs.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Refuse any further definitions.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Attribute>> {
        self.attrs.values()
    }
}
