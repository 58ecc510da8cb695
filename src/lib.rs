//! Aggregation, export and theming for the food dashboard.
//!
//! Rows come from the hosted Postgres backend through [`db::DataSource`];
//! [`processing`] and [`timeline`] turn them into chart-ready view models,
//! and [`export`] writes those out as JSON or CSV.

pub mod db;
pub mod export;
pub mod format;
pub mod models;
pub mod processing;
pub mod report;
pub mod service;
pub mod theme;
pub mod timeline;
