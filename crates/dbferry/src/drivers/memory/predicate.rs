//! Single-comparison row predicates: `field <op> literal`.

use std::cmp::Ordering;

use crate::core::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub(super) struct Predicate {
    index: usize,
    op: Op,
    literal: Value,
}

impl Predicate {
    pub(super) fn parse(sql: &str, fields: &[String]) -> Result<Self, String> {
        const OPS: [(&str, Op); 7] = [
            ("<>", Op::Ne),
            ("!=", Op::Ne),
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("=", Op::Eq),
            ("<", Op::Lt),
            (">", Op::Gt),
        ];

        let (pos, token, op) = OPS
            .iter()
            .filter_map(|(token, op)| sql.find(token).map(|pos| (pos, *token, *op)))
            .min_by_key(|(pos, _, _)| *pos)
            .ok_or_else(|| format!("unsupported filter expression '{}'", sql))?;

        let field = sql[..pos].trim();
        let index = fields
            .iter()
            .position(|f| f.eq_ignore_ascii_case(field))
            .ok_or_else(|| format!("unknown filter field '{}'", field))?;

        Ok(Self {
            index,
            op,
            literal: parse_literal(sql[pos + token.len()..].trim())?,
        })
    }

    pub(super) fn matches(&self, row: &Row) -> bool {
        let Some(value) = row.get(self.index) else {
            return false;
        };
        if value.is_null() || self.literal.is_null() {
            return false;
        }
        let Some(ord) = value.partial_cmp(&self.literal) else {
            return false;
        };
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

fn parse_literal(s: &str) -> Result<Value, String> {
    if let Some(text) = s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Ok(Value::Text(text.replace("''", "'")));
    }
    if s.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    if let Ok(v) = s.parse::<i64>() {
        return Ok(Value::I64(v));
    }
    if let Ok(v) = s.parse::<f64>() {
        return Ok(Value::F64(v));
    }
    Err(format!("unsupported literal '{}'", s))
}
