//! Query Front End
//!
//! Accepts query text, plans it into node jobs and hands the leaves to the
//! dispatcher over the `otl_job` topic. Progress and results are read back
//! from the job store.

pub mod handlers;
pub mod manager;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;
