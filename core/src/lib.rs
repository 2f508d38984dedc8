pub mod combiner;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod hypo_guard;
pub mod modulation;
pub mod rate_limit;
pub mod safety;
pub mod sentinel;
pub mod status;
pub mod trigger;
pub mod verdict;
