#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logger;
pub mod ops;
pub mod progress;
pub mod retention;
pub mod size;
pub mod stats;
pub mod storage;
