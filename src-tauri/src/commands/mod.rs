pub mod clients;
pub mod consumer_units;
pub mod import;
pub mod reports;
pub mod settings;
