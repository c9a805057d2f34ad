//! Filter expression grammar.
//!
//! ```text
//! expr    := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | "(" expr ")" | term
//! term    := keys op value
//! keys    := key ( "," key )*
//! op      := "=" | "!=" | ">" | "<" | ">=" | "<="
//! value   := quoted | bare
//! ```
//!
//! `=` and `!=` compare case-insensitively with `*` and `?` wildcards. Ordering
//! operators compare numerically; a missing or non-numeric property never
//! matches. The key `*` stands for any property and `ID` also matches the
//! record's internal id.

use crate::error::DirectoryError;
use crate::store::{keys, CollectionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Matches every record (empty expression).
    All,
    Compare {
        keys: Vec<String>,
        op: CompareOp,
        value: String,
    },
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn parse(input: &str) -> Result<Self, DirectoryError> {
        let mut parser = Parser {
            chars: input.chars().collect(),
            pos: 0,
        };
        parser.skip_ws();
        if parser.at_end() {
            return Ok(FilterExpr::All);
        }
        let expr = parser.parse_or()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Whether the expression consists of a single comparison.
    pub fn is_comparison(&self) -> bool {
        matches!(self, FilterExpr::Compare { .. })
    }

    pub fn matches(&self, record: &CollectionRecord) -> bool {
        match self {
            FilterExpr::All => true,
            FilterExpr::Not(inner) => !inner.matches(record),
            FilterExpr::And(items) => items.iter().all(|e| e.matches(record)),
            FilterExpr::Or(items) => items.iter().any(|e| e.matches(record)),
            FilterExpr::Compare { keys, op, value } => match op {
                CompareOp::NotEq => !keys
                    .iter()
                    .any(|k| values_for(record, k).any(|v| wildcard_match(value, v))),
                CompareOp::Eq => keys
                    .iter()
                    .any(|k| values_for(record, k).any(|v| wildcard_match(value, v))),
                _ => {
                    let Ok(target) = value.trim().parse::<f64>() else {
                        return false;
                    };
                    keys.iter().any(|k| {
                        values_for(record, k)
                            .filter_map(|v| v.trim().parse::<f64>().ok())
                            .any(|v| compare_numbers(*op, v, target))
                    })
                }
            },
        }
    }
}

fn compare_numbers(op: CompareOp, left: f64, right: f64) -> bool {
    match op {
        CompareOp::Gt => left > right,
        CompareOp::Lt => left < right,
        CompareOp::Ge => left >= right,
        CompareOp::Le => left <= right,
        CompareOp::Eq | CompareOp::NotEq => false,
    }
}

fn values_for<'a>(
    record: &'a CollectionRecord,
    key: &'a str,
) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    if key == "*" {
        return Box::new(record.properties.iter().map(|(_, v)| v));
    }
    let property = record.get(key);
    let id = (key == keys::ID).then_some(record.internal_id.as_str());
    Box::new(property.into_iter().chain(id))
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, reason: &str) -> DirectoryError {
        DirectoryError::FilterError(format!("{} at offset {}", reason, self.pos))
    }

    fn parse_or(&mut self) -> Result<FilterExpr, DirectoryError> {
        let mut items = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if self.starts_with("||") {
                self.pos += 2;
                items.push(self.parse_and()?);
            } else {
                break;
            }
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            FilterExpr::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr, DirectoryError> {
        let mut items = vec![self.parse_unary()?];
        loop {
            self.skip_ws();
            if self.starts_with("&&") {
                self.pos += 2;
                items.push(self.parse_unary()?);
            } else {
                break;
            }
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            FilterExpr::And(items)
        })
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, DirectoryError> {
        self.skip_ws();
        match self.peek() {
            Some('!') if !self.starts_with("!=") => {
                self.pos += 1;
                Ok(FilterExpr::Not(Box::new(self.parse_unary()?)))
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(_) => self.parse_term(),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_term(&mut self) -> Result<FilterExpr, DirectoryError> {
        let mut keys = Vec::new();
        loop {
            self.skip_ws();
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_whitespace() || "=!<>,()&|\"'".contains(c) {
                    break;
                }
                self.pos += 1;
            }
            if self.pos == start {
                return Err(self.error("expected property name"));
            }
            keys.push(self.chars[start..self.pos].iter().collect());
            self.skip_ws();
            if self.peek() == Some(',') {
                self.pos += 1;
            } else {
                break;
            }
        }

        let op = if self.starts_with("!=") {
            self.pos += 2;
            CompareOp::NotEq
        } else if self.starts_with(">=") {
            self.pos += 2;
            CompareOp::Ge
        } else if self.starts_with("<=") {
            self.pos += 2;
            CompareOp::Le
        } else {
            let op = match self.peek() {
                Some('=') => CompareOp::Eq,
                Some('>') => CompareOp::Gt,
                Some('<') => CompareOp::Lt,
                _ => return Err(self.error("expected comparison operator")),
            };
            self.pos += 1;
            op
        };

        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.at_end() {
                    return Err(self.error("unterminated quoted value"));
                }
                let value: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                value
            }
            _ => {
                let start = self.pos;
                while !self.at_end()
                    && !self.starts_with("&&")
                    && !self.starts_with("||")
                    && self.peek() != Some(')')
                {
                    self.pos += 1;
                }
                let value: String = self.chars[start..self.pos].iter().collect();
                value.trim().to_string()
            }
        };
        if value.is_empty() {
            return Err(self.error("expected value"));
        }

        Ok(FilterExpr::Compare { keys, op, value })
    }
}
