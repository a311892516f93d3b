//! Locale-aware number formatting for indicator values.

use serde::{Deserialize, Serialize};

/// Display locale for numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Fr,
    En,
}

impl Locale {
    fn group_separator(self) -> char {
        match self {
            Locale::Fr => '\u{202f}',
            Locale::En => ',',
        }
    }

    fn decimal_separator(self) -> char {
        match self {
            Locale::Fr => ',',
            Locale::En => '.',
        }
    }
}

/// How many (optional) decimals a number is rendered with.
///
/// Decimals are optional in the `#,##0.##` sense: trailing zeros are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberFormat {
    #[default]
    Integer,
    OneDecimal,
    TwoDecimals,
}

impl NumberFormat {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            NumberFormat::Integer => "Integer",
            NumberFormat::OneDecimal => "Float, precision 1",
            NumberFormat::TwoDecimals => "Float, precision 2",
        }
    }

    #[must_use]
    pub fn decimals(self) -> usize {
        match self {
            NumberFormat::Integer => 0,
            NumberFormat::OneDecimal => 1,
            NumberFormat::TwoDecimals => 2,
        }
    }

    /// Render `value` with grouping and at most [`decimals`](Self::decimals)
    /// fraction digits.
    #[must_use]
    pub fn format(self, value: f64, locale: Locale) -> String {
        if !value.is_finite() {
            return value.to_string();
        }

        let rendered = format!("{:.*}", self.decimals(), value.abs());
        let (int_part, frac_part) = match rendered.split_once('.') {
            Some((i, f)) => (i, f.trim_end_matches('0')),
            None => (rendered.as_str(), ""),
        };

        let is_zero = int_part.chars().all(|c| c == '0') && frac_part.is_empty();

        let mut out = String::with_capacity(rendered.len() + 4);
        if value.is_sign_negative() && !is_zero {
            out.push('-');
        }
        out.push_str(&group_digits(int_part, locale.group_separator()));
        if !frac_part.is_empty() {
            out.push(locale.decimal_separator());
            out.push_str(frac_part);
        }
        out
    }
}

fn group_digits(digits: &str, separator: char) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}
