use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::models::{InvoiceRecord, Payment};
use crate::utils::{format_br_number, parse_br_date, parse_br_number};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("no invoice rows were recognized in the pasted text")]
    NoRecords,
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid whitespace regex"))
}

// Nº, reading date, reading, reference, consumption, due date, type, amount, payment.
// The type column only takes letters so it can never eat the amount that follows.
fn history_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(\d+)\s*",
            r"(\d{2}/\d{2}/\d{4})\s*",
            r"(\d+)\s*",
            r"(\d{1,2}/\d{4})\s*",
            r"([\d.,]+)\s*",
            r"(\d{2}/\d{2}/\d{4})\s*",
            r"([a-zA-Z]+)\s*",
            r"([\d.,]+)\s*",
            r"(EM ABERTO|\d{2}/\d{2}/\d{4})",
        ))
        .expect("invalid history row regex")
    })
}

/// Extracts invoice rows from text copied out of a utility's billing history
/// table.
///
/// Line breaks in the pasted text are meaningless (the table wraps wherever the
/// browser wrapped it), so the text is flattened to one line and scanned for
/// nine-column rows. Rows sharing reference month, consumption and amount are
/// kept once, first occurrence wins. The result is ordered by reading date,
/// most recent first; unreadable dates go last.
pub fn parse_history(raw: &str) -> Vec<InvoiceRecord> {
    let flattened = whitespace_re().replace_all(raw, " ");

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for caps in history_row_re().captures_iter(&flattened) {
        let reference_month = caps[4].to_string();
        let consumption_kwh = parse_br_number(&caps[5]);
        let amount = parse_br_number(&caps[8]);

        let key = (reference_month.clone(), consumption_kwh.to_bits(), amount.to_bits());
        if !seen.insert(key) {
            continue;
        }

        records.push(InvoiceRecord {
            sequence: caps[1].to_string(),
            reading_date: caps[2].to_string(),
            reading: caps[3].to_string(),
            reference_month,
            consumption_kwh,
            due_date: caps[6].to_string(),
            invoice_type: caps[7].to_string(),
            amount,
            payment: Payment::from(caps[9].to_string()),
        });
    }

    records.sort_by(|a, b| reading_date(b).cmp(&reading_date(a)));
    records
}

/// Same as [`parse_history`], but an empty result is reported as
/// [`HistoryError::NoRecords`] so callers can warn the user.
pub fn parse_history_checked(raw: &str) -> Result<Vec<InvoiceRecord>, HistoryError> {
    let records = parse_history(raw);
    if records.is_empty() {
        return Err(HistoryError::NoRecords);
    }
    Ok(records)
}

fn reading_date(record: &InvoiceRecord) -> NaiveDate {
    parse_br_date(&record.reading_date).unwrap_or(NaiveDate::MIN)
}

/// Renders a record as one row of the billing table, in the same shape
/// [`parse_history`] reads.
pub fn format_history_row(record: &InvoiceRecord) -> String {
    format!(
        "{} {} {} {} {} {} {} {} {}",
        record.sequence,
        record.reading_date,
        record.reading,
        record.reference_month,
        format_br_number(record.consumption_kwh),
        record.due_date,
        record.invoice_type,
        format_br_number(record.amount),
        record.payment.as_str(),
    )
}

pub fn format_history_text(records: &[InvoiceRecord]) -> String {
    records
        .iter()
        .map(format_history_row)
        .collect::<Vec<_>>()
        .join("\n")
}
