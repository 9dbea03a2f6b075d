use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::read_br_number;

/// Placeholder written by older imports when a cell was empty.
pub const NOT_AVAILABLE: &str = "N/A";
/// Placeholder the spreadsheet importer writes for missing name/address.
pub const NOT_INFORMED: &str = "Não informado";
/// Payment column value for an invoice that has not been paid yet.
pub const OPEN_PAYMENT_MARKER: &str = "EM ABERTO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ClientStatus {
    Active,
    #[default]
    Expired,
    Monitoring,
    RecurringMaintenance,
    OmComplete,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Expired => "expired",
            ClientStatus::Monitoring => "monitoring",
            ClientStatus::RecurringMaintenance => "recurring_maintenance",
            ClientStatus::OmComplete => "om_complete",
        }
    }

    /// Maps a stored status value onto the current status set.
    ///
    /// The returned flag is true for the retired `report_sent` and `om_sold`
    /// statuses, which both meant the report had already been delivered.
    pub fn from_stored(raw: &str) -> (ClientStatus, bool) {
        match raw.trim() {
            "active" => (ClientStatus::Active, false),
            "expired" => (ClientStatus::Expired, false),
            "monitoring" => (ClientStatus::Monitoring, false),
            "recurring_maintenance" => (ClientStatus::RecurringMaintenance, false),
            "om_complete" => (ClientStatus::OmComplete, false),
            "report_sent" | "om_sold" => (ClientStatus::Expired, true),
            _ => (ClientStatus::Expired, false),
        }
    }
}

impl From<String> for ClientStatus {
    fn from(raw: String) -> Self {
        ClientStatus::from_stored(&raw).0
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numeric client attribute as it arrives from spreadsheets and the store:
/// either a real number or whatever text was typed in the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measure {
    Number(f64),
    Text(String),
}

impl Measure {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Measure::Number(value) => Some(*value),
            Measure::Text(text) => read_br_number(text),
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::Number(value) => write!(f, "{}", value),
            Measure::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Client {
    pub id: String,
    pub client_number: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub install_date: Option<String>,
    pub panels: Option<Measure>,
    pub power: Option<Measure>,
    pub status: ClientStatus,
    pub report_sent: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Payment {
    Open,
    PaidOn(String),
}

impl Payment {
    pub fn as_str(&self) -> &str {
        match self {
            Payment::Open => OPEN_PAYMENT_MARKER,
            Payment::PaidOn(date) => date,
        }
    }
}

impl From<String> for Payment {
    fn from(raw: String) -> Self {
        let trimmed = raw.trim();
        if trimmed == OPEN_PAYMENT_MARKER {
            Payment::Open
        } else {
            Payment::PaidOn(trimmed.to_string())
        }
    }
}

impl From<Payment> for String {
    fn from(payment: Payment) -> Self {
        payment.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub sequence: String,
    pub reading_date: String,
    pub reading: String,
    pub reference_month: String,
    pub consumption_kwh: f64,
    pub due_date: String,
    pub invoice_type: String,
    pub amount: f64,
    pub payment: Payment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerUnit {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub balance_kwh: f64,
    pub history: Vec<InvoiceRecord>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvent {
    pub id: String,
    pub client_id: String,
    pub event: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDetail {
    pub client: Client,
    pub consumer_units: Vec<ConsumerUnit>,
    pub events: Vec<ClientEvent>,
    pub missing_fields: Vec<String>,
    pub can_generate_report: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub kwh_price: f64,
    pub balance_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            kwh_price: 0.99,
            balance_debounce_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    #[default]
    All,
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSentFilter {
    #[default]
    All,
    Sent,
    NotSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    ClientNumber,
    Name,
    City,
    InstallDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub search: String,
    pub status: Option<ClientStatus>,
    pub city: Option<String>,
    pub completeness: Completeness,
    pub report_sent: ReportSentFilter,
    pub sort_by: SortKey,
    pub sort_order: SortOrder,
}

impl FilterCriteria {
    /// True when anything differs from the reset state.
    pub fn has_active_filters(&self) -> bool {
        *self != FilterCriteria::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub visible: usize,
    pub total: usize,
    pub incomplete: usize,
    pub report_sent: usize,
    pub cities: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub clients: Vec<Client>,
    pub stats: FilterStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientListing {
    pub clients: Vec<Client>,
    pub stats: FilterStats,
    pub cities: Vec<String>,
    pub has_active_filters: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthRow {
    pub reference_month: String,
    pub consumption_kwh: f64,
    pub paid: f64,
    pub estimated_cost: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSeries {
    pub unit_name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportTotals {
    pub consumption_kwh: f64,
    pub paid: f64,
    pub estimated_cost: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitBalance {
    pub unit_name: String,
    pub balance_kwh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsReport {
    pub client: Client,
    pub kwh_price: f64,
    pub months: Vec<MonthRow>,
    pub series: Vec<UnitSeries>,
    pub totals: ReportTotals,
    pub balances: Vec<UnitBalance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub monitoring: usize,
    pub recurring_maintenance: usize,
    pub om_complete: usize,
    pub report_sent: usize,
    pub total_power_kwp: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_statuses_map_to_expired_with_report_flag() {
        assert_eq!(ClientStatus::from_stored("report_sent"), (ClientStatus::Expired, true));
        assert_eq!(ClientStatus::from_stored("om_sold"), (ClientStatus::Expired, true));
        assert_eq!(ClientStatus::from_stored("new"), (ClientStatus::Expired, false));
        assert_eq!(ClientStatus::from_stored(""), (ClientStatus::Expired, false));
        assert_eq!(
            ClientStatus::from_stored("recurring_maintenance"),
            (ClientStatus::RecurringMaintenance, false)
        );
    }

    #[test]
    fn unknown_statuses_deserialize_as_expired() {
        let parse = |raw: &str| serde_json::from_str::<ClientStatus>(raw).unwrap();
        assert_eq!(parse("\"monitoring\""), ClientStatus::Monitoring);
        assert_eq!(parse("\"om_sold\""), ClientStatus::Expired);
        assert_eq!(parse("\"arquivado\""), ClientStatus::Expired);
        assert_eq!(serde_json::to_string(&ClientStatus::OmComplete).unwrap(), "\"om_complete\"");

        let criteria: FilterCriteria = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(criteria.status, Some(ClientStatus::Expired));
    }

    #[test]
    fn measure_accepts_numbers_and_text() {
        let from_number: Measure = serde_json::from_str("5.5").unwrap();
        let from_text: Measure = serde_json::from_str("\"7,25\"").unwrap();
        assert_eq!(from_number.as_f64(), Some(5.5));
        assert_eq!(from_text.as_f64(), Some(7.25));
        assert_eq!(Measure::Text("abc".to_string()).as_f64(), None);
        assert_eq!(Measure::Text("4,5 kWp".to_string()).as_f64(), Some(4.5));
        assert_eq!(Measure::Text("1.234,5".to_string()).as_f64(), Some(1234.5));
    }

    #[test]
    fn payment_serializes_as_plain_string() {
        let open = serde_json::to_string(&Payment::Open).unwrap();
        assert_eq!(open, "\"EM ABERTO\"");
        let paid: Payment = serde_json::from_str("\" 10/02/2024 \"").unwrap();
        assert_eq!(paid, Payment::PaidOn("10/02/2024".to_string()));
    }

    #[test]
    fn client_deserializes_with_defaults() {
        let client: Client = serde_json::from_str(r#"{"id":"c1","power":"4,5"}"#).unwrap();
        assert_eq!(client.status, ClientStatus::Expired);
        assert!(!client.report_sent);
        assert_eq!(client.power, Some(Measure::Text("4,5".to_string())));
        assert!(client.name.is_none());
    }

    #[test]
    fn default_criteria_are_inactive() {
        let mut criteria = FilterCriteria::default();
        assert!(!criteria.has_active_filters());
        criteria.sort_order = SortOrder::Desc;
        assert!(criteria.has_active_filters());
    }
}
