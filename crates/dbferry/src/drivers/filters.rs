//! Built-in row filters.

use crate::core::{Row, RowFilter, Table, Value};
use crate::error::Result;

/// Trims surrounding whitespace from every text value.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrimFilter;

impl RowFilter for TrimFilter {
    fn name(&self) -> &str {
        "trim"
    }

    fn apply(&self, _table: &Table, _fields: &[String], row: &mut Row) -> Result<()> {
        for value in row.iter_mut() {
            if let Value::Text(s) = value {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    *s = trimmed.to_string();
                }
            }
        }
        Ok(())
    }
}

/// Replaces every non-key text value with `*` of the same character count.
/// NULLs and non-text values pass through.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskFilter;

impl RowFilter for MaskFilter {
    fn name(&self) -> &str {
        "mask"
    }

    fn apply(&self, table: &Table, fields: &[String], row: &mut Row) -> Result<()> {
        for (field, value) in fields.iter().zip(row.iter_mut()) {
            if table.is_key(field) {
                continue;
            }
            if let Value::Text(s) = value {
                *s = "*".repeat(s.chars().count());
            }
        }
        Ok(())
    }
}
