pub mod config;
pub mod device_calendar;
pub mod error;
pub mod kv_store;
pub mod logging;
pub mod storage;
