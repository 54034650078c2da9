//! Evaluation of a single rule condition against a variable snapshot.
//!
//! Calculated signs substitute placeholders into both operands and compute
//! them as arithmetic terms (`+ - * /` and parentheses). Text signs compare
//! the substituted strings trimmed and lowercased.

use regex::RegexBuilder;
use thiserror::Error;

use crate::model::{EquationSign, RuleCondition};
use crate::variables::Snapshot;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("unknown variable {0}")]
    UnknownVariable(String),

    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("invalid regular expression '{0}': {1}")]
    InvalidRegex(String, String),
}

/// Outcome of one evaluated condition.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    pub matches: bool,
    /// Value of the left operand for calculated signs.
    pub calculated_value: Option<f64>,
    /// Substituted left operand for text signs.
    pub text_value: Option<String>,
}

impl RuleEvaluation {
    /// The value written when a rule stores its result to a variable.
    pub fn stored_value(&self) -> String {
        match (self.calculated_value, &self.text_value) {
            (Some(v), _) => format_number(v),
            (None, Some(t)) => t.clone(),
            (None, None) => String::new(),
        }
    }
}

/// `5` rather than `5.0`; fractions keep their digits.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

pub fn evaluate(condition: &RuleCondition, snapshot: &Snapshot) -> Result<RuleEvaluation, RuleError> {
    if condition.sign.is_calculated() {
        evaluate_calculated(condition, snapshot)
    } else {
        evaluate_text(condition, snapshot)
    }
}

fn evaluate_calculated(
    condition: &RuleCondition,
    snapshot: &Snapshot,
) -> Result<RuleEvaluation, RuleError> {
    let left = calculate(&substitute(&condition.rule, snapshot)?)?;
    let right = || -> Result<f64, RuleError> {
        calculate(&substitute(&condition.comparison, snapshot)?)
    };

    let matches = match condition.sign {
        EquationSign::CalculatedAlwaysTrue => true,
        EquationSign::CalculatedAlwaysFalse => false,
        EquationSign::SmallerThan => left < right()?,
        EquationSign::SmallerOrEqual => left <= right()?,
        EquationSign::Equals => left == right()?,
        EquationSign::BiggerOrEqual => left >= right()?,
        EquationSign::BiggerThan => left > right()?,
        _ => false,
    };
    Ok(RuleEvaluation {
        matches,
        calculated_value: Some(left),
        text_value: None,
    })
}

fn evaluate_text(condition: &RuleCondition, snapshot: &Snapshot) -> Result<RuleEvaluation, RuleError> {
    let raw_left = substitute(&condition.rule, snapshot)?;
    let left = raw_left.trim().to_lowercase();
    let right = || -> Result<String, RuleError> {
        Ok(substitute(&condition.comparison, snapshot)?.trim().to_string())
    };

    let matches = match condition.sign {
        EquationSign::TextAlwaysTrue => true,
        EquationSign::TextAlwaysFalse => false,
        EquationSign::TextEquals => left == right()?.to_lowercase(),
        EquationSign::TextNotEquals => left != right()?.to_lowercase(),
        EquationSign::TextMatches => full_match(&right()?, &left)?,
        EquationSign::TextNotMatches => !full_match(&right()?, &left)?,
        EquationSign::StartsWith => left.starts_with(&right()?.to_lowercase()),
        EquationSign::EndsWith => left.ends_with(&right()?.to_lowercase()),
        EquationSign::Contains => left.contains(&right()?.to_lowercase()),
        _ => false,
    };
    Ok(RuleEvaluation {
        matches,
        calculated_value: None,
        text_value: Some(raw_left.trim().to_string()),
    })
}

fn full_match(pattern: &str, value: &str) -> Result<bool, RuleError> {
    let re = RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
        .map_err(|e| RuleError::InvalidRegex(pattern.to_string(), e.to_string()))?;
    Ok(re.is_match(value))
}

/// Replace placeholders; an unknown placeholder is an error here, unlike in
/// text rendering.
fn substitute(term: &str, snapshot: &Snapshot) -> Result<String, RuleError> {
    let mut out = String::with_capacity(term.len());
    let mut rest = term;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        if len == 0 {
            out.push('$');
            rest = tail;
            continue;
        }
        let name = &rest[start..start + 1 + len];
        let value = snapshot
            .get(name)
            .ok_or_else(|| RuleError::UnknownVariable(name.to_string()))?;
        out.push_str(value);
        rest = &tail[len..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Arithmetic terms
// ---------------------------------------------------------------------------

fn calculate(term: &str) -> Result<f64, RuleError> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    let not_a_number = || RuleError::NotANumber(trimmed.to_string());
    let mut parser = Term {
        chars: trimmed.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    let value = parser.expression().ok_or_else(not_a_number)?;
    if parser.pos != parser.chars.len() || !value.is_finite() {
        return Err(not_a_number());
    }
    Ok(value)
}

struct Term {
    chars: Vec<char>,
    pos: usize,
}

impl Term {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expression(&mut self) -> Option<f64> {
        let mut value = self.product()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.product()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Some(value)
    }

    fn product(&mut self) -> Option<f64> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            value = if op == '*' { value * rhs } else { value / rhs };
        }
        Some(value)
    }

    fn factor(&mut self) -> Option<f64> {
        match self.peek()? {
            '-' => {
                self.pos += 1;
                Some(-self.factor()?)
            }
            '+' => {
                self.pos += 1;
                self.factor()
            }
            '(' => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek()? != ')' {
                    return None;
                }
                self.pos += 1;
                Some(value)
            }
            _ => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                if start == self.pos {
                    return None;
                }
                self.chars[start..self.pos]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .ok()
            }
        }
    }
}
