pub mod assistant;
pub mod config_store;
pub mod facematch;
pub mod ocr;
pub mod service;
pub mod snapshots;
pub mod stream;
