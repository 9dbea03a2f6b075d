use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::models::{
    Client, ClientEvent, ClientStatus, ConsumerUnit, ImportSummary, InvoiceRecord, Measure,
};
use crate::utils::now_rfc3339;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for clients, their consumer units and the surrounding
/// bookkeeping. Components receive a store instead of opening one.
pub trait ClientStore: Send {
    fn list_clients(&self) -> StoreResult<Vec<Client>>;
    fn get_client(&self, id: &str) -> StoreResult<Option<Client>>;
    fn find_client_by_number(&self, client_number: &str) -> StoreResult<Option<Client>>;
    fn upsert_client(&self, client: &Client) -> StoreResult<()>;
    fn update_client_status(&self, id: &str, status: ClientStatus, report_sent: bool) -> StoreResult<()>;
    fn delete_client(&self, id: &str) -> StoreResult<()>;

    fn list_consumer_units(&self, client_id: &str) -> StoreResult<Vec<ConsumerUnit>>;
    fn add_consumer_unit(&self, client_id: &str, name: &str) -> StoreResult<ConsumerUnit>;
    fn delete_consumer_unit(&self, client_id: &str, unit_id: &str) -> StoreResult<()>;
    fn update_unit_balance(&self, client_id: &str, unit_id: &str, balance_kwh: f64) -> StoreResult<()>;
    fn replace_unit_history(&self, client_id: &str, unit_id: &str, history: &[InvoiceRecord]) -> StoreResult<()>;

    fn log_event(&self, client_id: &str, event: &str) -> StoreResult<()>;
    fn list_events(&self, client_id: &str) -> StoreResult<Vec<ClientEvent>>;

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    fn log_import(&self, file_name: &str, file_hash: &str, summary: &ImportSummary) -> StoreResult<()>;
    fn last_import_of(&self, file_hash: &str) -> StoreResult<Option<String>>;
}

pub struct Database {
    conn: Connection,
}

const CLIENT_COLUMNS: &str = "id, client_number, name, address, install_date, panels, power,
                              status, report_sent, created_at, updated_at";

const UNIT_COLUMNS: &str = "id, client_id, name, balance_kwh, history_json, created_at, updated_at";

struct ClientRow {
    id: String,
    client_number: Option<String>,
    name: Option<String>,
    address: Option<String>,
    install_date: Option<String>,
    panels: Option<String>,
    power: Option<String>,
    status: String,
    report_sent: bool,
    created_at: String,
    updated_at: String,
}

impl ClientRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ClientRow {
            id: row.get(0)?,
            client_number: row.get(1)?,
            name: row.get(2)?,
            address: row.get(3)?,
            install_date: row.get(4)?,
            panels: row.get(5)?,
            power: row.get(6)?,
            status: row.get(7)?,
            report_sent: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_client(self) -> StoreResult<Client> {
        let (status, legacy_report_sent) = ClientStatus::from_stored(&self.status);
        Ok(Client {
            id: self.id,
            client_number: self.client_number,
            name: self.name,
            address: self.address,
            install_date: self.install_date,
            panels: decode_measure(self.panels)?,
            power: decode_measure(self.power)?,
            status,
            report_sent: self.report_sent || legacy_report_sent,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct UnitRow {
    id: String,
    client_id: String,
    name: String,
    balance_kwh: f64,
    history_json: String,
    created_at: String,
    updated_at: String,
}

impl UnitRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(UnitRow {
            id: row.get(0)?,
            client_id: row.get(1)?,
            name: row.get(2)?,
            balance_kwh: row.get(3)?,
            history_json: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_unit(self) -> StoreResult<ConsumerUnit> {
        Ok(ConsumerUnit {
            id: self.id,
            client_id: self.client_id,
            name: self.name,
            balance_kwh: self.balance_kwh,
            history: serde_json::from_str(&self.history_json)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn decode_measure(raw: Option<String>) -> StoreResult<Option<Measure>> {
    Ok(raw.map(|text| serde_json::from_str(&text)).transpose()?)
}

fn encode_measure(value: Option<&Measure>) -> StoreResult<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn ensure_changed(changed: usize, kind: &'static str, id: &str) -> StoreResult<()> {
    if changed == 0 {
        return Err(StoreError::NotFound {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

impl Database {
    pub fn new(db_path: PathBuf) -> StoreResult<Self> {
        let conn = Connection::open(&db_path)?;
        info!("opened client database at {}", db_path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> StoreResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_clients.sql",
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../migrations/001_create_clients.sql")),
            ),
            (
                "002_create_events_and_settings.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../migrations/002_create_events_and_settings.sql"
                )),
            ),
            (
                "003_create_import_logs.sql",
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../migrations/003_create_import_logs.sql")),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
                info!("applied migration {}", name);
            }
        }

        Ok(())
    }

    fn query_clients(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<Client>> {
        let sql = format!("SELECT {} FROM clients {}", CLIENT_COLUMNS, filter);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, ClientRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ClientRow::into_client).collect()
    }
}

impl ClientStore for Database {
    fn list_clients(&self) -> StoreResult<Vec<Client>> {
        self.query_clients("ORDER BY created_at, rowid", &[])
    }

    fn get_client(&self, id: &str) -> StoreResult<Option<Client>> {
        Ok(self.query_clients("WHERE id = ?1", &[&id])?.into_iter().next())
    }

    fn find_client_by_number(&self, client_number: &str) -> StoreResult<Option<Client>> {
        Ok(self
            .query_clients("WHERE client_number = ?1 ORDER BY created_at, rowid LIMIT 1", &[&client_number])?
            .into_iter()
            .next())
    }

    fn upsert_client(&self, client: &Client) -> StoreResult<()> {
        self.conn.execute(
            // A REPLACE would delete the row first and cascade to its units.
            "INSERT INTO clients (
                id, client_number, name, address, install_date, panels, power,
                status, report_sent, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                client_number = excluded.client_number,
                name = excluded.name,
                address = excluded.address,
                install_date = excluded.install_date,
                panels = excluded.panels,
                power = excluded.power,
                status = excluded.status,
                report_sent = excluded.report_sent,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                client.id,
                client.client_number,
                client.name,
                client.address,
                client.install_date,
                encode_measure(client.panels.as_ref())?,
                encode_measure(client.power.as_ref())?,
                client.status.as_str(),
                client.report_sent,
                client.created_at,
                client.updated_at
            ],
        )?;
        Ok(())
    }

    fn update_client_status(&self, id: &str, status: ClientStatus, report_sent: bool) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE clients SET status = ?2, report_sent = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), report_sent, now_rfc3339()],
        )?;
        ensure_changed(changed, "client", id)
    }

    fn delete_client(&self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM clients WHERE id = ?1", params![id])?;
        ensure_changed(changed, "client", id)
    }

    fn list_consumer_units(&self, client_id: &str) -> StoreResult<Vec<ConsumerUnit>> {
        let sql = format!(
            "SELECT {} FROM consumer_units WHERE client_id = ?1 ORDER BY created_at, rowid",
            UNIT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![client_id], UnitRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(UnitRow::into_unit).collect()
    }

    fn add_consumer_unit(&self, client_id: &str, name: &str) -> StoreResult<ConsumerUnit> {
        if self.get_client(client_id)?.is_none() {
            return Err(StoreError::NotFound {
                kind: "client",
                id: client_id.to_string(),
            });
        }

        let now = now_rfc3339();
        let unit = ConsumerUnit {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            name: name.trim().to_string(),
            balance_kwh: 0.0,
            history: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.conn.execute(
            "INSERT INTO consumer_units (id, client_id, name, balance_kwh, history_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?6)",
            params![
                unit.id,
                unit.client_id,
                unit.name,
                unit.balance_kwh,
                unit.created_at,
                unit.updated_at
            ],
        )?;
        Ok(unit)
    }

    fn delete_consumer_unit(&self, client_id: &str, unit_id: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM consumer_units WHERE id = ?1 AND client_id = ?2",
            params![unit_id, client_id],
        )?;
        ensure_changed(changed, "consumer unit", unit_id)
    }

    fn update_unit_balance(&self, client_id: &str, unit_id: &str, balance_kwh: f64) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE consumer_units SET balance_kwh = ?3, updated_at = ?4 WHERE id = ?1 AND client_id = ?2",
            params![unit_id, client_id, balance_kwh, now_rfc3339()],
        )?;
        ensure_changed(changed, "consumer unit", unit_id)
    }

    fn replace_unit_history(&self, client_id: &str, unit_id: &str, history: &[InvoiceRecord]) -> StoreResult<()> {
        let history_json = serde_json::to_string(history)?;
        let changed = self.conn.execute(
            "UPDATE consumer_units SET history_json = ?3, updated_at = ?4 WHERE id = ?1 AND client_id = ?2",
            params![unit_id, client_id, history_json, now_rfc3339()],
        )?;
        ensure_changed(changed, "consumer unit", unit_id)
    }

    fn log_event(&self, client_id: &str, event: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO client_events (id, client_id, event, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3)",
            params![client_id, event, now_rfc3339()],
        )?;
        Ok(())
    }

    fn list_events(&self, client_id: &str) -> StoreResult<Vec<ClientEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, client_id, event, created_at
             FROM client_events WHERE client_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![client_id], |row| {
            Ok(ClientEvent {
                id: row.get(0)?,
                client_id: row.get(1)?,
                event: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    fn log_import(&self, file_name: &str, file_hash: &str, summary: &ImportSummary) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO import_logs (id, file_name, file_hash, imported, updated, failed, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file_name,
                file_hash,
                summary.imported as i64,
                summary.updated as i64,
                summary.failed as i64,
                now_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn last_import_of(&self, file_hash: &str) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT created_at FROM import_logs WHERE file_hash = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )?;
        Ok(stmt.query_row(params![file_hash], |row| row.get(0)).optional()?)
    }
}
