use super::pattern::eval_like;
use crate::core::{Result, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        };
        write!(f, "{}", op)
    }
}

/// Filter predicate over storage columns.
///
/// Values are never inlined into SQL text: rendering pushes them onto a
/// parameter list and emits `$n` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
        case_sensitive: bool,
        negated: bool,
    },
    InList {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// Entry point of the condition DSL: `col("first_name").like("%User%")`.
pub fn col(name: impl Into<String>) -> ColumnRef {
    ColumnRef { name: name.into() }
}

#[derive(Debug, Clone)]
pub struct ColumnRef {
    name: String,
}

impl ColumnRef {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Condition {
        Condition::Compare {
            column: self.name,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::NotEq, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::LtEq, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Condition {
        self.compare(CompareOp::GtEq, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> Condition {
        Condition::Like {
            column: self.name,
            pattern: pattern.into(),
            case_sensitive: true,
            negated: false,
        }
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Condition {
        Condition::Like {
            column: self.name,
            pattern: pattern.into(),
            case_sensitive: false,
            negated: false,
        }
    }

    pub fn in_list<I, V>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::InList {
            column: self.name,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn is_null(self) -> Condition {
        Condition::IsNull {
            column: self.name,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Condition {
        Condition::IsNull {
            column: self.name,
            negated: true,
        }
    }
}

impl Condition {
    pub fn and(self, other: Condition) -> Condition {
        match self {
            Condition::And(mut parts) => {
                parts.push(other);
                Condition::And(parts)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Condition {
        match self {
            Condition::Or(mut parts) => {
                parts.push(other);
                Condition::Or(parts)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }

    /// Conjunction of all conditions; `None` when the list is empty.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Option<Condition> {
        let mut parts: Vec<Condition> = conditions.into_iter().collect();
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Condition::And(parts)),
        }
    }

    /// Evaluates against a row through a column lookup, as a WHERE does:
    /// only rows for which the predicate is TRUE match.
    pub fn evaluate<'r, F>(&self, lookup: &F) -> Result<bool>
    where
        F: Fn(&str) -> Result<&'r Value>,
    {
        Ok(self.truth(lookup)? == Some(true))
    }

    /// SQL truth value; `None` is UNKNOWN. A comparison with NULL is
    /// UNKNOWN, NOT keeps it UNKNOWN, AND and OR follow three-valued logic.
    pub fn truth<'r, F>(&self, lookup: &F) -> Result<Option<bool>>
    where
        F: Fn(&str) -> Result<&'r Value>,
    {
        match self {
            Condition::Compare { column, op, value } => {
                let actual = lookup(column)?;
                if actual.is_null() || value.is_null() {
                    return Ok(None);
                }
                Ok(Some(op.holds(actual.compare(value)?)))
            }
            Condition::Like {
                column,
                pattern,
                case_sensitive,
                negated,
            } => {
                let matched = match lookup(column)? {
                    Value::Text(text) => eval_like(text, pattern, *case_sensitive)?,
                    Value::Null => return Ok(None),
                    other => eval_like(&other.to_string(), pattern, *case_sensitive)?,
                };
                Ok(Some(matched != *negated))
            }
            Condition::InList {
                column,
                values,
                negated,
            } => {
                // Rendered as a constant.
                if values.is_empty() {
                    return Ok(Some(*negated));
                }
                let actual = lookup(column)?;
                if actual.is_null() {
                    return Ok(None);
                }
                if values.iter().any(|value| !value.is_null() && value == actual) {
                    return Ok(Some(!*negated));
                }
                if values.iter().any(Value::is_null) {
                    return Ok(None);
                }
                Ok(Some(*negated))
            }
            Condition::IsNull { column, negated } => Ok(Some(lookup(column)?.is_null() != *negated)),
            Condition::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.truth(lookup)? {
                        Some(false) => return Ok(Some(false)),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                Ok(if unknown { None } else { Some(true) })
            }
            Condition::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.truth(lookup)? {
                        Some(true) => return Ok(Some(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            Condition::Not(inner) => Ok(inner.truth(lookup)?.map(|truth| !truth)),
        }
    }

    /// Renders the predicate with `$n` placeholders appended to `params`.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Condition::Compare { column, op, value } => {
                params.push(value.clone());
                format!("{} {} ${}", column, op, params.len())
            }
            Condition::Like {
                column,
                pattern,
                case_sensitive,
                negated,
            } => {
                params.push(Value::Text(pattern.clone()));
                let keyword = if *case_sensitive { "LIKE" } else { "ILIKE" };
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}{} ${}", column, not, keyword, params.len())
            }
            Condition::InList {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "TRUE".into() } else { "FALSE".into() };
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|value| {
                        params.push(value.clone());
                        format!("${}", params.len())
                    })
                    .collect();
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}IN ({})", column, not, placeholders.join(", "))
            }
            Condition::IsNull { column, negated } => {
                if *negated {
                    format!("{} IS NOT NULL", column)
                } else {
                    format!("{} IS NULL", column)
                }
            }
            Condition::And(parts) => join_parts(parts, " AND ", params),
            Condition::Or(parts) => join_parts(parts, " OR ", params),
            Condition::Not(inner) => format!("NOT ({})", inner.to_sql(params)),
        }
    }

    /// Column names referenced anywhere in the predicate.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Compare { column, .. }
            | Condition::Like { column, .. }
            | Condition::InList { column, .. }
            | Condition::IsNull { column, .. } => out.push(column),
            Condition::And(parts) | Condition::Or(parts) => {
                for part in parts {
                    part.collect_columns(out);
                }
            }
            Condition::Not(inner) => inner.collect_columns(out),
        }
    }
}

fn join_parts(parts: &[Condition], separator: &str, params: &mut Vec<Value>) -> String {
    if parts.is_empty() {
        return "TRUE".into();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|part| match part {
            Condition::And(_) | Condition::Or(_) => format!("({})", part.to_sql(params)),
            _ => part.to_sql(params),
        })
        .collect();
    rendered.join(separator)
}
