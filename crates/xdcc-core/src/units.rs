//! Size and speed figures as bots print them.
//!
//! Bots print binary multiples with loose suffixes (`K`, `KB`, `KiB/s`, `M`,
//! `GB`) and either `.` or `,` as the decimal separator.

const KIB: f64 = 1024.0;

/// Replace a `,` decimal separator with `.`.
#[must_use]
pub fn normalize_decimal(raw: &str) -> String {
    raw.trim().replace(',', ".")
}

fn parse_number(raw: &str) -> Option<f64> {
    let value: f64 = normalize_decimal(raw).parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_bytes(value: f64) -> u64 {
    value as u64
}

/// Parse a packet size such as `1536` + `K` into bytes.
///
/// `K`/`KB` multiply by 1024, `M`/`MB` by 1024², `G`/`GB` by 1024³; any other
/// suffix leaves the figure as bytes. IEC spellings (`GiB`) count the same.
/// Range markers `<` and `>` that some bots put around sizes are ignored.
#[must_use]
pub fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let cleaned: String = value.chars().filter(|ch| !matches!(ch, '<' | '>')).collect();
    let number = parse_number(&cleaned)?;
    let unit = unit.trim().to_ascii_lowercase().replace('i', "");
    let multiplier = match unit.as_str() {
        "k" | "kb" => KIB,
        "m" | "mb" => KIB * KIB,
        "g" | "gb" => KIB * KIB * KIB,
        _ => 1.0,
    };
    Some(to_bytes(number * multiplier))
}

/// Parse a speed such as `12.5` + `KB` into bytes per second.
///
/// Any unit starting with `k` counts as kibibytes.
#[must_use]
pub fn parse_speed(value: &str, unit: &str) -> Option<u64> {
    let number = parse_number(value)?;
    let multiplier = if unit.trim().to_ascii_lowercase().starts_with('k') {
        KIB
    } else {
        1.0
    };
    Some(to_bytes(number * multiplier))
}
