pub mod analysis;
pub mod app;
pub mod audit;
pub mod commit;
pub mod config;
pub mod domain;
pub mod editor;
pub mod error;
pub mod fs_util;
pub mod glob;
pub mod location;
pub mod monitor;
pub mod output;
pub mod public;
pub mod staging;
