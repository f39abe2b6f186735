mod controller;

pub use controller::{RemoteSource, SyncController, SyncReport, SyncStatus};
