use std::collections::HashMap;

use crate::models::{
    Client, ClientStatus, ConsumerUnit, DashboardStats, MonthRow, ReportTotals, SavingsReport, UnitBalance,
    UnitSeries,
};
use crate::utils::{parse_reference_month, round2};

#[derive(Default)]
struct MonthBucket {
    consumption: f64,
    paid: f64,
    per_unit: HashMap<String, f64>,
}

/// A report needs at least one unit, and every unit needs a positive balance
/// and some invoice history.
pub fn can_generate_report(units: &[ConsumerUnit]) -> bool {
    !units.is_empty()
        && units
            .iter()
            .all(|unit| unit.balance_kwh > 0.0 && !unit.history.is_empty())
}

/// Groups the invoice history of every unit by reference month and computes
/// what the client would have paid without solar at `kwh_price`.
pub fn build_report(client: &Client, units: &[ConsumerUnit], kwh_price: f64) -> SavingsReport {
    let mut buckets: HashMap<String, MonthBucket> = HashMap::new();
    let mut unit_order: Vec<String> = Vec::new();

    for unit in units {
        for record in &unit.history {
            if !record.reference_month.contains('/') {
                continue;
            }
            let bucket = buckets.entry(record.reference_month.clone()).or_default();
            bucket.consumption += record.consumption_kwh;
            bucket.paid += record.amount;
            *bucket.per_unit.entry(unit.name.clone()).or_insert(0.0) += record.consumption_kwh;
        }
    }

    let mut labels: Vec<String> = buckets.keys().cloned().collect();
    labels.sort_by_key(|label| parse_reference_month(label).unwrap_or((0, 0)));

    // Series follow the order in which units first show up month by month.
    for label in &labels {
        let mut names: Vec<&String> = buckets[label].per_unit.keys().collect();
        names.sort_by_key(|name| units.iter().position(|unit| &unit.name == *name));
        for name in names {
            if !unit_order.contains(name) {
                unit_order.push(name.clone());
            }
        }
    }

    let series = unit_order
        .iter()
        .map(|name| UnitSeries {
            unit_name: name.clone(),
            values: labels
                .iter()
                .map(|label| buckets[label].per_unit.get(name).copied().unwrap_or(0.0))
                .collect(),
        })
        .collect();

    let months: Vec<MonthRow> = labels
        .iter()
        .map(|label| {
            let bucket = &buckets[label];
            let estimated_cost = bucket.consumption * kwh_price;
            MonthRow {
                reference_month: label.clone(),
                consumption_kwh: bucket.consumption,
                paid: bucket.paid,
                estimated_cost,
                savings: estimated_cost - bucket.paid,
            }
        })
        .collect();

    let mut totals = months.iter().fold(ReportTotals::default(), |mut acc, row| {
        acc.consumption_kwh += row.consumption_kwh;
        acc.paid += row.paid;
        acc.savings += row.savings;
        acc
    });
    totals.estimated_cost = totals.consumption_kwh * kwh_price;

    let balances = units
        .iter()
        .map(|unit| UnitBalance {
            unit_name: unit.name.clone(),
            balance_kwh: unit.balance_kwh,
        })
        .collect();

    SavingsReport {
        client: client.clone(),
        kwh_price,
        months,
        series,
        totals,
        balances,
    }
}

pub fn dashboard_stats(clients: &[Client]) -> DashboardStats {
    let count = |status: ClientStatus| clients.iter().filter(|c| c.status == status).count();
    let total_power: f64 = clients
        .iter()
        .filter_map(|client| client.power.as_ref().and_then(|power| power.as_f64()))
        .sum();

    DashboardStats {
        total: clients.len(),
        active: count(ClientStatus::Active),
        expired: count(ClientStatus::Expired),
        monitoring: count(ClientStatus::Monitoring),
        recurring_maintenance: count(ClientStatus::RecurringMaintenance),
        om_complete: count(ClientStatus::OmComplete),
        report_sent: clients.iter().filter(|c| c.report_sent).count(),
        total_power_kwp: round2(total_power),
    }
}
