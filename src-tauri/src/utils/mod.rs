use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const BR_DATE_FORMAT: &str = "%d/%m/%Y";
// 9999-12-31, the last date spreadsheets can represent.
const MAX_EXCEL_SERIAL: f64 = 2_958_466.0;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parses numbers printed on Brazilian bills (`1.234,56`, `350`, `12,5`).
///
/// The first comma becomes the decimal point, then every dot except the last
/// is dropped as a thousands separator. Only the leading numeric part is read;
/// anything unreadable yields 0.
pub fn parse_br_number(raw: &str) -> f64 {
    read_br_number(raw).unwrap_or(0.0)
}

/// Like [`parse_br_number`], but `None` when no leading number is present.
pub fn read_br_number(raw: &str) -> Option<f64> {
    let replaced = raw.trim().replacen(',', ".", 1);
    let last_dot = replaced.rfind('.');
    let sanitized: String = replaced
        .char_indices()
        .filter(|(idx, ch)| *ch != '.' || Some(*idx) == last_dot)
        .map(|(_, ch)| ch)
        .collect();
    leading_float(&sanitized)
}

fn leading_float(text: &str) -> Option<f64> {
    let mut end = 0;
    let mut seen_dot = false;
    for (idx, ch) in text.char_indices() {
        match ch {
            '0'..='9' => end = idx + 1,
            '.' if !seen_dot => seen_dot = true,
            '-' | '+' if idx == 0 => {}
            _ => break,
        }
    }
    if end == 0 {
        return None;
    }
    text[..end].parse::<f64>().ok()
}

/// Renders a value the way bills print it: comma decimal separator, dots
/// between thousands, at least two decimals. Extra decimals are kept so that
/// [`parse_br_number`] reads back the same value.
pub fn format_br_number(value: f64) -> String {
    let plain = value.abs().to_string();
    let (int_part, frac_part) = plain.split_once('.').unwrap_or((plain.as_str(), ""));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{},{:0<2}", sign, grouped, frac_part)
}

/// Reads the integer at the start of `raw`, ignoring leading whitespace.
pub fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let mut end = 0;
    for (idx, ch) in trimmed.char_indices() {
        match ch {
            '0'..='9' => end = idx + ch.len_utf8(),
            '-' | '+' if idx == 0 => {}
            _ => break,
        }
    }
    if end == 0 {
        return None;
    }
    trimmed[..end].parse::<i64>().ok()
}

/// Parses a `DD/MM/YYYY` date. Single-digit day and month are accepted.
pub fn parse_br_date(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.trim().split('/');
    let day = parts.next()?.trim().parse::<u32>().ok()?;
    let month = parts.next()?.trim().parse::<u32>().ok()?;
    let year = parts.next()?.trim().parse::<i32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn format_br_date(date: NaiveDate) -> String {
    date.format(BR_DATE_FORMAT).to_string()
}

/// Parses a `MM/YYYY` reference month into `(year, month)`.
pub fn parse_reference_month(raw: &str) -> Option<(i32, u32)> {
    let (month, year) = raw.trim().split_once('/')?;
    let month = month.trim().parse::<u32>().ok()?;
    let year = year.trim().parse::<i32>().ok()?;
    Some((year, month))
}

/// Converts a spreadsheet serial day number (1900 date system) to a date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.trunc() as i64))
}

pub fn year_in_supported_range(date: NaiveDate) -> bool {
    date.year() > 1900 && date.year() < 2100
}
