// src/lib.rs

//! FTBFS Tracker Library
//!
//! Polls a build farm for failed builds, classifies each failure by its log
//! tail and keeps a store of currently failing packages.

#[cfg(feature = "dashboard")]
pub mod dashboard;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
