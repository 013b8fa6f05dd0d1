pub mod config;
pub mod db;
pub mod model;
pub mod money;
pub mod report;
pub mod tax;
