//! Runtime values

use std::fmt;

/// A value held in a variable, a register or an argument.
///
/// Numbers are always `f64`; integer literals are widened when they are read.
/// Strings and tuples coerce to numbers where an opcode needs one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn from_bool(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    /// Numeric view of the value. Unparsable strings and tuples are NaN.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            Value::Tuple(_) => f64::NAN,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
        }
    }

    /// Both components of a two-element tuple
    pub fn as_pair(&self) -> Option<(f64, f64)> {
        match self {
            Value::Tuple(items) if items.len() == 2 => {
                Some((items[0].as_number(), items[1].as_number()))
            }
            _ => None,
        }
    }

    pub fn pair(a: f64, b: f64) -> Self {
        Value::Tuple(vec![Value::Number(a), Value::Number(b)])
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}
