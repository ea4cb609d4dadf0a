//! Formatting utilities
//!
//! Brazilian-locale money formatting for CLI output: `.` thousands
//! separator, `,` decimal separator.

use rust_decimal::Decimal;

/// Format as Brazilian Real with symbol: "R$ 1.234,56"
///
/// # Examples
/// ```
/// use apurador::utils::format_currency;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(format_currency(dec!(1234.56)), "R$ 1.234,56");
/// assert_eq!(format_currency(dec!(-500)), "R$ -500,00");
/// ```
pub fn format_currency(value: Decimal) -> String {
    format!("R$ {}", format_decimal_br(value))
}

/// Format number only (no symbol): "1.234,56"
pub fn format_decimal_br(value: Decimal) -> String {
    let rounded = value.round_dp(2);
    let sign = if rounded < Decimal::ZERO { "-" } else { "" };
    let text = format!("{:.2}", rounded.abs());
    let (integer_part, decimal_part) = text.split_once('.').unwrap_or((&text, "00"));

    let digits: Vec<char> = integer_part.chars().rev().collect();
    let mut grouped = String::with_capacity(integer_part.len() + integer_part.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*c);
    }
    let grouped: String = grouped.chars().rev().collect();

    format!("{sign}{grouped},{decimal_part}")
}
