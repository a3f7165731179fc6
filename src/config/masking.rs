//! Masking of configuration values for startup diagnostics.
//!
//! Only the tail of a value is shown so an operator can tell which credential
//! was loaded. This is cosmetic and not a security control.

/// Mask all but the last few characters of a value
///
/// Values of four characters or fewer are masked entirely. Longer values keep
/// a quarter of their length visible, capped at four characters.
pub fn mask_value(value: &str) -> String {
    let len = value.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }

    let visible = std::cmp::min(4, len / 4);
    let tail: String = value.chars().skip(len - visible).collect();
    format!("{}{}", "*".repeat(len - visible), tail)
}
