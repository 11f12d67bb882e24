use serde_json::Value;

use crate::errors::{Result, StorageError};
use crate::models::AttrMap;

/// Separator between the parts of a composite natural key.
const KEY_SEPARATOR: char = '\u{1f}';

/// Describes one child collection owned by a resource kind, e.g. the tags
/// or network interfaces attached to a device.
#[derive(Debug, Clone, Copy)]
pub struct ChildKindSpec {
    pub name: &'static str,
    /// Attribute fields whose values form the natural key of a child row.
    pub key_fields: &'static [&'static str],
}

/// Deploy-time descriptor of a resource kind: which child collections it
/// owns and how their rows are keyed. Scalar attributes are free-form and
/// carried by each snapshot; the descriptor only fixes the kind name used
/// to partition the ledger tables.
#[derive(Debug, Clone, Copy)]
pub struct ResourceKindSpec {
    pub name: &'static str,
    pub children: &'static [ChildKindSpec],
}

impl ResourceKindSpec {
    pub fn child(&self, name: &str) -> Option<&ChildKindSpec> {
        self.children.iter().find(|c| c.name == name)
    }
}

impl ChildKindSpec {
    /// Derives the natural key of a child row from its attributes.
    ///
    /// Composite keys join the parts with an unprintable separator so two
    /// distinct tuples can never collide on concatenation.
    pub fn natural_key(&self, attrs: &AttrMap) -> Result<String> {
        let mut parts = Vec::with_capacity(self.key_fields.len());
        for field in self.key_fields {
            let value = attrs.get(*field).ok_or_else(|| {
                StorageError::Conversion(format!(
                    "child row of collection '{}' is missing key field '{}'",
                    self.name, field
                ))
            })?;
            parts.push(stringify(value));
        }
        Ok(parts.join(&KEY_SEPARATOR.to_string()))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
