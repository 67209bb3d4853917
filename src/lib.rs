pub mod accounting;
pub mod config;
pub mod data;
pub mod networth;
pub mod portfolio;
pub mod prices;
pub mod sources;
