//! Telegram bot that watches marketplace searches and posts newly listed items.

pub mod commands;
pub mod config;
pub mod db;
pub mod handlers;
pub mod language;
pub mod marketplace;
pub mod model;
pub mod notifier;
pub mod novelty;
pub mod poller;
pub mod transport;
