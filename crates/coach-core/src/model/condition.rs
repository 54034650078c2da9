use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EquationSign
// ---------------------------------------------------------------------------

/// How the two operands of a [`RuleCondition`] are compared.
///
/// Calculated signs parse both operands as numbers; text signs compare the
/// substituted strings after trimming and lowercasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquationSign {
    CalculatedAlwaysTrue,
    CalculatedAlwaysFalse,
    SmallerThan,
    SmallerOrEqual,
    Equals,
    BiggerOrEqual,
    BiggerThan,
    TextAlwaysTrue,
    TextAlwaysFalse,
    TextEquals,
    TextNotEquals,
    TextMatches,
    TextNotMatches,
    StartsWith,
    EndsWith,
    Contains,
}

impl EquationSign {
    pub fn is_calculated(self) -> bool {
        matches!(
            self,
            EquationSign::CalculatedAlwaysTrue
                | EquationSign::CalculatedAlwaysFalse
                | EquationSign::SmallerThan
                | EquationSign::SmallerOrEqual
                | EquationSign::Equals
                | EquationSign::BiggerOrEqual
                | EquationSign::BiggerThan
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EquationSign::CalculatedAlwaysTrue => "calculated_always_true",
            EquationSign::CalculatedAlwaysFalse => "calculated_always_false",
            EquationSign::SmallerThan => "smaller_than",
            EquationSign::SmallerOrEqual => "smaller_or_equal",
            EquationSign::Equals => "equals",
            EquationSign::BiggerOrEqual => "bigger_or_equal",
            EquationSign::BiggerThan => "bigger_than",
            EquationSign::TextAlwaysTrue => "text_always_true",
            EquationSign::TextAlwaysFalse => "text_always_false",
            EquationSign::TextEquals => "text_equals",
            EquationSign::TextNotEquals => "text_not_equals",
            EquationSign::TextMatches => "text_matches",
            EquationSign::TextNotMatches => "text_not_matches",
            EquationSign::StartsWith => "starts_with",
            EquationSign::EndsWith => "ends_with",
            EquationSign::Contains => "contains",
        }
    }
}

impl fmt::Display for EquationSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuleCondition
// ---------------------------------------------------------------------------

/// One condition node: `rule <sign> comparison`, both operands holding
/// `$variable` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub sign: EquationSign,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub comparison: String,
}

impl RuleCondition {
    pub fn new(sign: EquationSign, rule: impl Into<String>, comparison: impl Into<String>) -> Self {
        Self {
            sign,
            rule: rule.into(),
            comparison: comparison.into(),
        }
    }

    pub fn always() -> Self {
        Self::new(EquationSign::CalculatedAlwaysTrue, "", "")
    }
}

impl Default for RuleCondition {
    fn default() -> Self {
        Self::always()
    }
}
