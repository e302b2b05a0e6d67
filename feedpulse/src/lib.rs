// Library interface for feedpulse modules
// This allows tests and the binary to import modules

pub mod driver;
pub mod entry;
pub mod ingestion;
pub mod reconcile;
pub mod refresh;
pub mod snapshot;
pub mod widget;
