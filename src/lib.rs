//! JSHunter - JavaScript reconnaissance pipeline.
//!
//! Crawls web endpoints with a headless browser, harvests every reachable
//! JavaScript asset, recovers sourcemaps, discovers lazy-loaded chunks, and
//! scans the code for security-relevant findings. Work is coordinated
//! through a durable record store whose status fields act as the queue of
//! truth, so a crash and restart resume without loss.

pub mod cli;
pub mod config;
pub mod hooks;
pub mod models;
pub mod recovery;
pub mod repository;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
