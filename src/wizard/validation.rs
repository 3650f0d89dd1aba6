//! Local step guards — pure validation, no network round trips.

use std::sync::LazyLock;

use regex::Regex;

/// Minimum trimmed length for free-text answers.
pub const MIN_DETAIL_CHARS: usize = 25;

/// Decimal money amount: digits with an optional 1-2 digit fraction.
static MONEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d{1,2})?$").unwrap());

/// True when the trimmed text meets the free-text minimum.
pub fn detail_long_enough(text: &str) -> bool {
    text.trim().chars().count() >= MIN_DETAIL_CHARS
}

/// True when the trimmed text is a plausible money amount ("12", "12.50").
pub fn is_money_amount(text: &str) -> bool {
    MONEY_RE.is_match(text.trim())
}
