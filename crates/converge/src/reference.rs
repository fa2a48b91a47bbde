//! Resource references: `Type[title]`

use crate::error::TransactionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type name of the sentinel resources standing in for containers
pub const WHIT: &str = "whit";

/// Identity of a resource within a catalog
///
/// The type name is stored lowercase and rendered with each `::` segment
/// capitalized, so `foo::bar` / `x` prints as `Foo::Bar[x]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceRef {
    type_name: String,
    title: String,
}

impl ResourceRef {
    pub fn new(type_name: impl AsRef<str>, title: impl Into<String>) -> Self {
        Self {
            type_name: type_name.as_ref().to_lowercase(),
            title: title.into(),
        }
    }

    /// Parse `Type[title]`
    pub fn parse(text: &str) -> Result<Self, TransactionError> {
        let invalid = || TransactionError::InvalidReference(text.to_string());
        let open = text.find('[').ok_or_else(invalid)?;
        let inner = text[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
        let type_name = &text[..open];
        if type_name.is_empty() || inner.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(type_name, inner))
    }

    /// Sentinel that the contents of `container` depend on
    pub fn admissible(container: &Self) -> Self {
        Self::new(WHIT, format!("Admissible_{container}"))
    }

    /// Sentinel that depends on the contents of `container`
    pub fn completed(container: &Self) -> Self {
        Self::new(WHIT, format!("Completed_{container}"))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_whit(&self) -> bool {
        self.type_name == WHIT
    }
}

/// `foo::bar` -> `Foo::Bar`
pub fn capitalize_type(type_name: &str) -> String {
    type_name
        .split("::")
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("::")
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", capitalize_type(&self.type_name), self.title)
    }
}

impl FromStr for ResourceRef {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceRef {
    type Error = TransactionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceRef> for String {
    fn from(reference: ResourceRef) -> Self {
        reference.to_string()
    }
}
