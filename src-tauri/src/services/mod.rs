pub mod client_filter;
pub mod debounce;
pub mod history_parser;
pub mod import;
pub mod report;
pub mod settings;
pub mod state;
