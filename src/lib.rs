//! Client-side load balancing through name resolution.
//!
//! A [`balance::DnsBalancer`] binds one domain to a weighted pool of
//! endpoints. Resolution requests for that domain are answered from the pool
//! by weighted round robin, falling back to backup endpoints when every
//! primary is down, while a health monitor keeps the pool's flags current.

pub mod balance;
pub mod config;
pub mod core;
pub mod health;
pub mod logging;
pub mod resolver;
