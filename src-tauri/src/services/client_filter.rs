use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::models::{
    Client, Completeness, FilterCriteria, FilterOutcome, FilterStats, Measure, ReportSentFilter, SortKey,
    SortOrder, NOT_AVAILABLE, NOT_INFORMED,
};
use crate::utils::{leading_integer, parse_br_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingField {
    Name,
    Address,
    InstallDate,
    Panels,
    Power,
}

impl MissingField {
    pub fn label(&self) -> &'static str {
        match self {
            MissingField::Name => "Name",
            MissingField::Address => "Address",
            MissingField::InstallDate => "Install date",
            MissingField::Panels => "Panel count",
            MissingField::Power => "Power (kWp)",
        }
    }
}

/// City part of an address: the text after the last comma, or the whole
/// address when there is no comma. `N/A` and absent addresses have no city.
pub fn client_city(address: Option<&str>) -> String {
    let address = match address {
        Some(address) if address != NOT_AVAILABLE => address,
        _ => return String::new(),
    };
    match address.rsplit_once(',') {
        Some((_, city)) => city.trim().to_string(),
        None => address.trim().to_string(),
    }
}

/// Sorted, de-duplicated cities offered in the city filter.
pub fn distinct_cities(clients: &[Client]) -> Vec<String> {
    clients
        .iter()
        .map(|client| client_city(client.address.as_deref()))
        .filter(|city| !city.is_empty() && city != NOT_AVAILABLE)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn text_missing(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(text) => {
            let trimmed = text.trim();
            trimmed.is_empty() || text == NOT_AVAILABLE || text == NOT_INFORMED
        }
    }
}

fn measure_missing(value: Option<&Measure>) -> bool {
    match value {
        None => true,
        Some(Measure::Number(number)) => *number == 0.0,
        Some(Measure::Text(text)) => text_missing(Some(text)) || text.trim() == "0",
    }
}

pub fn missing_fields(client: &Client) -> Vec<MissingField> {
    let mut missing = Vec::new();
    if text_missing(client.name.as_deref()) {
        missing.push(MissingField::Name);
    }
    if text_missing(client.address.as_deref()) {
        missing.push(MissingField::Address);
    }
    if text_missing(client.install_date.as_deref()) {
        missing.push(MissingField::InstallDate);
    }
    if measure_missing(client.panels.as_ref()) {
        missing.push(MissingField::Panels);
    }
    if measure_missing(client.power.as_ref()) {
        missing.push(MissingField::Power);
    }
    missing
}

pub fn has_incomplete_data(client: &Client) -> bool {
    !missing_fields(client).is_empty()
}

fn matches_search(client: &Client, needle: &str) -> bool {
    [&client.name, &client.address, &client.client_number]
        .iter()
        .any(|field| {
            field
                .as_deref()
                .map(|value| value.to_lowercase().contains(needle))
                .unwrap_or(false)
        })
}

fn number_key(client: &Client) -> i64 {
    client
        .client_number
        .as_deref()
        .and_then(leading_integer)
        .unwrap_or(0)
}

fn text_key(value: Option<&str>) -> String {
    value.unwrap_or_default().to_lowercase()
}

fn install_date_key(client: &Client) -> NaiveDate {
    client
        .install_date
        .as_deref()
        .and_then(parse_br_date)
        // NaiveDate's default is 1970-01-01.
        .unwrap_or_default()
}

fn compare(a: &Client, b: &Client, key: SortKey) -> Ordering {
    match key {
        SortKey::ClientNumber => number_key(a).cmp(&number_key(b)),
        SortKey::Name => text_key(a.name.as_deref()).cmp(&text_key(b.name.as_deref())),
        SortKey::City => client_city(a.address.as_deref())
            .to_lowercase()
            .cmp(&client_city(b.address.as_deref()).to_lowercase()),
        SortKey::InstallDate => install_date_key(a).cmp(&install_date_key(b)),
    }
}

/// Narrows `clients` to the ones matching `criteria`, in display order.
///
/// Stages run in a fixed order (search, status, report flag, city,
/// completeness) and a stage at its default is skipped. Sorting is stable,
/// so clients that compare equal keep their incoming order.
///
/// `stats.visible` counts the filtered list; every other figure is taken from
/// the full collection so it does not move while the user filters.
pub fn apply_filters(clients: &[Client], criteria: &FilterCriteria) -> FilterOutcome {
    let search = criteria.search.to_lowercase();

    let mut visible: Vec<Client> = clients
        .iter()
        .filter(|client| search.is_empty() || matches_search(client, &search))
        .filter(|client| criteria.status.map_or(true, |status| client.status == status))
        .filter(|client| match criteria.report_sent {
            ReportSentFilter::All => true,
            ReportSentFilter::Sent => client.report_sent,
            ReportSentFilter::NotSent => !client.report_sent,
        })
        .filter(|client| match &criteria.city {
            Some(city) => client_city(client.address.as_deref()) == *city,
            None => true,
        })
        .filter(|client| match criteria.completeness {
            Completeness::All => true,
            Completeness::Complete => !has_incomplete_data(client),
            Completeness::Incomplete => has_incomplete_data(client),
        })
        .cloned()
        .collect();

    visible.sort_by(|a, b| {
        let ordering = compare(a, b, criteria.sort_by);
        match criteria.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    let stats = FilterStats {
        visible: visible.len(),
        total: clients.len(),
        incomplete: clients.iter().filter(|client| has_incomplete_data(client)).count(),
        report_sent: clients.iter().filter(|client| client.report_sent).count(),
        cities: distinct_cities(clients).len(),
    };

    FilterOutcome { clients: visible, stats }
}
