pub mod error;
pub mod integrations;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod roadmap;
pub mod settings;
pub mod table;
