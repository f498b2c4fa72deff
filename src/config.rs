//! Process Configuration
//!
//! Defaults for a single standalone dispatcher, overridden from command-line flags.

use crate::pool::types::EngineType;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// HTTP front end.
    pub bind: SocketAddr,
    /// Host of this dispatcher; computing nodes with the same host id are local.
    pub host_id: String,
    /// Preferred engine types, most preferred first.
    pub engine_priority: Vec<EngineType>,
    /// Resource keys compared first when picking the least-loaded node.
    pub resource_order: Vec<String>,
    /// `None` plans subsearches per engine type.
    pub subsearch_is_node_job: Option<bool>,
    /// Seconds a computed result stays reusable.
    pub default_cache_ttl: u64,
    /// Seconds before a query is canceled; `0` disables the timeout.
    pub default_timeout: u64,
    pub shared_post_processing: bool,
    pub worker_timeout: Duration,
    pub health_check_interval: Duration,
    pub queue_check_interval: Duration,
    /// In-process priority queue instead of Redis.
    pub standalone: bool,
    /// Single dispatcher: coordination locks are no-ops.
    pub one_process_mode: bool,
    pub redis_url: String,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 6081)),
            host_id: "localhost".to_string(),
            engine_priority: vec![
                EngineType::new("SPARK"),
                EngineType::new("EEP"),
                EngineType::post_processing(),
            ],
            resource_order: vec!["job_capacity".to_string()],
            subsearch_is_node_job: None,
            default_cache_ttl: 60,
            default_timeout: 0,
            shared_post_processing: true,
            worker_timeout: Duration::from_secs(15),
            health_check_interval: Duration::from_secs(5),
            queue_check_interval: Duration::from_secs(1),
            standalone: true,
            one_process_mode: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Applies flags on top of the defaults. `args[0]` is the program name.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = || {
                args.get(i + 1)
                    .map(String::as_str)
                    .ok_or_else(|| anyhow!("{} needs a value", flag))
            };

            match flag {
                "--bind" => {
                    let raw = value()?;
                    config.bind = raw
                        .parse()
                        .with_context(|| format!("invalid --bind {}", raw))?;
                    i += 2;
                }
                "--host-id" => {
                    config.host_id = value()?.to_string();
                    i += 2;
                }
                "--engine-priority" => {
                    config.engine_priority = split_list(value()?).map(EngineType::new).collect();
                    i += 2;
                }
                "--resource-order" => {
                    config.resource_order = split_list(value()?).map(str::to_string).collect();
                    i += 2;
                }
                "--subsearch-is-node-job" => {
                    config.subsearch_is_node_job = Some(value()?.parse()?);
                    i += 2;
                }
                "--cache-ttl" => {
                    config.default_cache_ttl = value()?.parse()?;
                    i += 2;
                }
                "--timeout" => {
                    config.default_timeout = value()?.parse()?;
                    i += 2;
                }
                "--local-post-processing" => {
                    config.shared_post_processing = false;
                    i += 1;
                }
                "--worker-timeout" => {
                    config.worker_timeout = Duration::from_secs(value()?.parse()?);
                    i += 2;
                }
                "--redis" => {
                    config.redis_url = value()?.to_string();
                    config.standalone = false;
                    config.one_process_mode = false;
                    i += 2;
                }
                "--standalone" => {
                    config.standalone = true;
                    i += 1;
                }
                "--one-process" => {
                    config.one_process_mode = true;
                    i += 1;
                }
                "--log-level" => {
                    config.log_level = value()?.to_string();
                    i += 2;
                }
                other => {
                    tracing::warn!("Ignoring unknown argument {}", other);
                    i += 1;
                }
            }
        }

        Ok(config)
    }

    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(flags: &[&str]) -> Vec<String> {
        std::iter::once("otl_dispatcher")
            .chain(flags.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_defaults_rank_post_processing_last() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.engine_priority.last(), Some(&EngineType::post_processing()));
        assert!(config.standalone);
        assert_eq!(config.default_timeout, 0);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = OrchestratorConfig::from_args(&args(&[
            "--bind",
            "0.0.0.0:7000",
            "--engine-priority",
            "EEP, SPARK",
            "--resource-order",
            "memory,job_capacity",
            "--worker-timeout",
            "30",
            "--log-level",
            "debug",
        ]))
        .unwrap();

        assert_eq!(config.bind.port(), 7000);
        assert_eq!(
            config.engine_priority,
            vec![EngineType::new("EEP"), EngineType::new("SPARK")]
        );
        assert_eq!(config.resource_order, vec!["memory", "job_capacity"]);
        assert_eq!(config.worker_timeout, Duration::from_secs(30));
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_redis_flag_leaves_standalone_mode() {
        let config =
            OrchestratorConfig::from_args(&args(&["--redis", "redis://cache:6379"])).unwrap();

        assert!(!config.standalone);
        assert!(!config.one_process_mode);
        assert_eq!(config.redis_url, "redis://cache:6379");
    }

    #[test]
    fn test_missing_value_is_an_error() {
        assert!(OrchestratorConfig::from_args(&args(&["--bind"])).is_err());
        assert!(OrchestratorConfig::from_args(&args(&["--bind", "not-an-address"])).is_err());
    }
}
