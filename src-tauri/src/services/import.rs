use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

use crate::db::ClientStore;
use crate::models::{Client, ClientStatus, ImportSummary, Measure, NOT_AVAILABLE, NOT_INFORMED};
use crate::utils::{excel_serial_to_date, format_br_date, now_rfc3339, parse_br_date, sha256_file, year_in_supported_range};

pub const IMPORTED_EVENT: &str = "Imported from spreadsheet";
pub const UPDATED_EVENT: &str = "Updated from spreadsheet";

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One spreadsheet row, columns in sheet order:
/// number, install date, name, address, panels, power.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawClientRow {
    pub client_number: String,
    pub install_date: String,
    pub name: String,
    pub address: String,
    pub panels: String,
    pub power: String,
}

impl RawClientRow {
    fn from_record(record: &csv::StringRecord) -> Self {
        let cell = |idx: usize| record.get(idx).unwrap_or_default().trim().to_string();
        RawClientRow {
            client_number: cell(0),
            install_date: cell(1),
            name: cell(2),
            address: cell(3),
            panels: cell(4),
            power: cell(5),
        }
    }

    fn is_blank(&self) -> bool {
        [
            &self.client_number,
            &self.install_date,
            &self.name,
            &self.address,
            &self.panels,
            &self.power,
        ]
        .iter()
        .all(|cell| cell.is_empty())
    }
}

/// Normalizes an install date cell to `DD/MM/YYYY`.
///
/// Numeric cells are spreadsheet serial dates. Slash-separated day/month/year
/// text is kept as typed when it is a real date; other recognizable formats
/// are converted. Anything else is dropped.
pub fn normalize_install_date(raw: &str) -> Option<String> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(serial) = cleaned.parse::<f64>() {
        return excel_serial_to_date(serial).map(format_br_date);
    }

    let parts: Vec<&str> = cleaned.split('/').collect();
    if parts.len() == 3 && parts[0].len() <= 2 && parts[1].len() <= 2 && parts[2].len() == 4 {
        return parse_br_date(cleaned)
            .filter(|date| year_in_supported_range(*date))
            .map(|_| cleaned.to_string());
    }

    let parsed = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(cleaned, fmt).ok())
                .map(|datetime| datetime.date())
        });

    parsed.filter(|date| year_in_supported_range(*date)).map(format_br_date)
}

fn measure_cell(raw: &str) -> Measure {
    if raw.is_empty() {
        return Measure::Number(0.0);
    }
    match raw.parse::<f64>() {
        Ok(value) => Measure::Number(value),
        Err(_) => Measure::Text(raw.to_string()),
    }
}

fn text_cell(raw: &str, fallback: &str) -> String {
    if raw.is_empty() {
        fallback.to_string()
    } else {
        raw.to_string()
    }
}

/// Builds the client a row describes. Identity and timestamps are left for
/// the caller to fill in.
pub fn client_from_row(row: &RawClientRow) -> Client {
    Client {
        id: String::new(),
        client_number: Some(text_cell(&row.client_number, NOT_AVAILABLE)),
        name: Some(text_cell(&row.name, NOT_INFORMED)),
        address: Some(text_cell(&row.address, NOT_INFORMED)),
        install_date: normalize_install_date(&row.install_date),
        panels: Some(measure_cell(&row.panels)),
        power: Some(measure_cell(&row.power)),
        status: ClientStatus::Expired,
        report_sent: false,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

/// Inserts or updates one client. Returns true when a new client was created.
///
/// Rows are matched on client number. Rows without one always create a new
/// client, since `N/A` would otherwise merge unrelated people.
pub fn import_row(store: &dyn ClientStore, row: &RawClientRow) -> Result<bool> {
    let mut client = client_from_row(row);
    let now = now_rfc3339();
    client.updated_at = now.clone();

    let existing = match client.client_number.as_deref() {
        Some(number) if number != NOT_AVAILABLE => store.find_client_by_number(number)?,
        _ => None,
    };

    match existing {
        Some(existing) => {
            client.id = existing.id;
            client.created_at = existing.created_at;
            client.status = existing.status;
            client.report_sent = existing.report_sent;
            store.upsert_client(&client)?;
            store.log_event(&client.id, UPDATED_EVENT)?;
            Ok(false)
        }
        None => {
            client.id = uuid::Uuid::new_v4().to_string();
            client.created_at = now;
            store.upsert_client(&client)?;
            store.log_event(&client.id, IMPORTED_EVENT)?;
            Ok(true)
        }
    }
}

/// Picks the field separator from the header line. Spreadsheets saved with a
/// comma decimal separator write `;` between fields.
fn sniff_delimiter(header: &[u8]) -> u8 {
    let count = |byte: u8| header.iter().filter(|&&b| b == byte).count();
    if count(b';') > count(b',') {
        b';'
    } else {
        b','
    }
}

/// Imports every data row of a CSV export of the client sheet. The first line
/// is the header. A bad row is counted and skipped; it never stops the batch.
pub fn import_reader<R: Read>(store: &dyn ClientStore, reader: R) -> ImportSummary {
    let mut summary = ImportSummary::default();
    let mut buffered = BufReader::new(reader);
    let mut header = Vec::new();
    if let Err(err) = buffered.read_until(b'\n', &mut header) {
        warn!("spreadsheet header unreadable: {}", err);
        summary.failed += 1;
        summary.errors.push(format!("line 1: {}", err));
        return summary;
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(sniff_delimiter(&header))
        .from_reader(header.as_slice().chain(buffered));

    for (idx, result) in csv_reader.records().enumerate() {
        // Line 1 is the header.
        let line = idx + 2;
        let outcome = result
            .map_err(anyhow::Error::from)
            .map(|record| RawClientRow::from_record(&record))
            .and_then(|row| {
                if row.is_blank() {
                    return Ok(None);
                }
                import_row(store, &row).map(Some)
            });

        match outcome {
            Ok(Some(true)) => summary.imported += 1,
            Ok(Some(false)) => summary.updated += 1,
            Ok(None) => {}
            Err(err) => {
                warn!("spreadsheet line {} skipped: {:#}", line, err);
                summary.failed += 1;
                summary.errors.push(format!("line {}: {}", line, err));
            }
        }
    }

    info!(
        "spreadsheet import finished: {} new, {} updated, {} failed",
        summary.imported, summary.updated, summary.failed
    );
    summary
}

pub fn import_file(store: &dyn ClientStore, path: &Path) -> Result<ImportSummary> {
    let file_hash = sha256_file(path).with_context(|| format!("Hash {}", path.display()))?;
    if let Some(previous) = store.last_import_of(&file_hash)? {
        info!("{} was already imported at {}, re-applying", path.display(), previous);
    }

    let file = File::open(path).with_context(|| format!("Open {}", path.display()))?;
    let summary = import_reader(store, file);

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    store.log_import(&file_name, &file_hash, &summary)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    const SHEET: &str = "N°,DATA,NOME,ENDERECO,N° PLACA,POTENCIA
101,15/03/2021,Ana Souza,\"Rua A, 123, Campinas\",12,\"6,6\"
102,44927,Bruno Lima,Sitio Bonito,8,4.4
,,,,,
103,,,,,
";

    #[test]
    fn install_dates_normalize_to_day_month_year() {
        assert_eq!(normalize_install_date("15/03/2021").as_deref(), Some("15/03/2021"));
        assert_eq!(normalize_install_date("5/3/2021").as_deref(), Some("5/3/2021"));
        assert_eq!(normalize_install_date("44927").as_deref(), Some("01/01/2023"));
        assert_eq!(normalize_install_date("2021-03-15").as_deref(), Some("15/03/2021"));
        assert_eq!(normalize_install_date("2021-03-15 00:00:00").as_deref(), Some("15/03/2021"));
        assert_eq!(normalize_install_date("31/02/2021"), None);
        assert_eq!(normalize_install_date("15/03/1850"), None);
        assert_eq!(normalize_install_date("soon"), None);
        assert_eq!(normalize_install_date("  "), None);
    }

    #[test]
    fn empty_cells_get_placeholders() {
        let client = client_from_row(&RawClientRow {
            client_number: "103".to_string(),
            ..RawClientRow::default()
        });
        assert_eq!(client.name.as_deref(), Some(NOT_INFORMED));
        assert_eq!(client.address.as_deref(), Some(NOT_INFORMED));
        assert_eq!(client.install_date, None);
        assert_eq!(client.panels, Some(Measure::Number(0.0)));
        assert_eq!(client.power, Some(Measure::Number(0.0)));
        assert_eq!(client.status, ClientStatus::Expired);

        let unnumbered = client_from_row(&RawClientRow::default());
        assert_eq!(unnumbered.client_number.as_deref(), Some(NOT_AVAILABLE));
    }

    #[test]
    fn imports_rows_and_skips_blank_lines() {
        let db = Database::open_in_memory().unwrap();
        let summary = import_reader(&db, SHEET.as_bytes());
        assert_eq!(summary.imported, 3);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.failed, 0);

        let ana = db.find_client_by_number("101").unwrap().unwrap();
        assert_eq!(ana.address.as_deref(), Some("Rua A, 123, Campinas"));
        assert_eq!(ana.power, Some(Measure::Text("6,6".to_string())));
        assert_eq!(ana.panels, Some(Measure::Number(12.0)));

        let bruno = db.find_client_by_number("102").unwrap().unwrap();
        assert_eq!(bruno.install_date.as_deref(), Some("01/01/2023"));
        assert_eq!(bruno.power, Some(Measure::Number(4.4)));

        let events = db.list_events(&ana.id).unwrap();
        assert_eq!(events[0].event, IMPORTED_EVENT);
    }

    #[test]
    fn reimport_updates_by_client_number_and_keeps_status() {
        let db = Database::open_in_memory().unwrap();
        import_reader(&db, SHEET.as_bytes());
        let ana = db.find_client_by_number("101").unwrap().unwrap();
        db.update_client_status(&ana.id, ClientStatus::Monitoring, true).unwrap();

        let changed = "N°,DATA,NOME,ENDERECO,N° PLACA,POTENCIA\n101,15/03/2021,Ana Souza Lima,\"Rua A, 123, Campinas\",14,7\n";
        let summary = import_reader(&db, changed.as_bytes());
        assert_eq!(summary.imported, 0);
        assert_eq!(summary.updated, 1);

        let updated = db.get_client(&ana.id).unwrap().unwrap();
        assert_eq!(updated.name.as_deref(), Some("Ana Souza Lima"));
        assert_eq!(updated.panels, Some(Measure::Number(14.0)));
        assert_eq!(updated.status, ClientStatus::Monitoring);
        assert!(updated.report_sent);
        assert_eq!(updated.created_at, ana.created_at);
        assert_eq!(db.list_clients().unwrap().len(), 3);
        assert_eq!(db.list_events(&ana.id).unwrap()[0].event, UPDATED_EVENT);
    }

    #[test]
    fn semicolon_separated_exports_are_read() {
        let db = Database::open_in_memory().unwrap();
        let sheet = "N°;DATA;NOME;ENDERECO;N° PLACA;POTENCIA\n\
                     101;15/03/2021;Ana Souza;Rua A, 123, Campinas;12;6,6\n\
                     102;44927;Bruno Lima;Sitio Bonito;8;4,4\n";
        let summary = import_reader(&db, sheet.as_bytes());
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed, 0);

        let ana = db.find_client_by_number("101").unwrap().unwrap();
        assert_eq!(ana.name.as_deref(), Some("Ana Souza"));
        assert_eq!(ana.address.as_deref(), Some("Rua A, 123, Campinas"));
        assert_eq!(ana.install_date.as_deref(), Some("15/03/2021"));
        assert_eq!(ana.power, Some(Measure::Text("6,6".to_string())));

        let bruno = db.find_client_by_number("102").unwrap().unwrap();
        assert_eq!(bruno.install_date.as_deref(), Some("01/01/2023"));
    }

    #[test]
    fn delimiter_follows_the_header() {
        assert_eq!(sniff_delimiter("N°;DATA;NOME;ENDERECO".as_bytes()), b';');
        assert_eq!(sniff_delimiter(b"h1,h2,h3"), b',');
        assert_eq!(sniff_delimiter(b""), b',');
    }

    #[test]
    fn rows_without_number_never_merge() {
        let db = Database::open_in_memory().unwrap();
        let sheet = "h1,h2,h3,h4,h5,h6\n,01/01/2020,Ana,Campinas,1,1\n,01/01/2020,Bia,Valinhos,1,1\n";
        let summary = import_reader(&db, sheet.as_bytes());
        assert_eq!(summary.imported, 2);
        assert_eq!(db.list_clients().unwrap().len(), 2);
    }

    #[test]
    fn malformed_utf8_rows_are_counted_as_failures() {
        let db = Database::open_in_memory().unwrap();
        let mut bytes = b"h1,h2,h3,h4,h5,h6\n".to_vec();
        bytes.extend_from_slice(b"201,01/01/2020,\xff\xfe,Rua,1,1\n");
        bytes.extend_from_slice(b"202,01/01/2020,Carla,Rua,1,1\n");

        let summary = import_reader(&db, bytes.as_slice());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.imported, 1);
        assert!(summary.errors[0].starts_with("line 2"));
    }
}
