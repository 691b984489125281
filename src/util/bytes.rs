//! Human-readable byte counts for cache reports.

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count into IEC units with at most two significant decimals.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} B");
    }

    let precision = if value >= 10.0 { 1 } else { 2 };
    let rendered = format!("{value:.precision$}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}

/// `used` against a `budget`, e.g. `1.5 KiB / 50 MiB (0.0%)`.
pub fn format_budget(used: usize, budget: usize) -> String {
    let percent = if budget == 0 {
        0.0
    } else {
        used as f64 * 100.0 / budget as f64
    };
    format!(
        "{} / {} ({percent:.1}%)",
        format_bytes(used as u64),
        format_bytes(budget as u64)
    )
}
