pub mod app;
pub mod catalog;
pub mod columns;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod filter;
pub mod output;
pub mod planner;
pub mod store;
pub mod worker;
