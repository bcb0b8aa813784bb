use chrono::NaiveDate;

const BAR_WIDTH: u64 = 40;

/// Compact form used in one-line summaries: `950`, `12.35k`, `1.20M`.
pub fn format_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.2}M", count as f64 / 1_000_000.)
    } else if count >= 1000 {
        format!("{:.2}k", count as f64 / 1000.)
    } else {
        count.to_string()
    }
}

/// Full count with thousands separators: `1,234,567`.
pub fn format_count_full(count: u64) -> String {
    let digits = count.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(digit);
    }
    result
}

pub fn format_date_short(date: NaiveDate) -> String {
    date.format("%m/%d").to_string()
}

/// Horizontal bar proportional to `value / max`. A nonzero value always gets at least one cell.
pub fn bar(value: u64, max: u64) -> String {
    if max == 0 || value == 0 {
        return String::new();
    }
    let cells = (value * BAR_WIDTH).div_ceil(max).clamp(1, BAR_WIDTH);
    "█".repeat(cells as usize)
}

pub fn percentage(value: u64, total: u64) -> f64 {
    if total == 0 {
        0.
    } else {
        value as f64 * 100. / total as f64
    }
}
