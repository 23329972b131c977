use crate::auth::{JwtSecret, SecretError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("no node urls were provided")]
	NoNodes,
	#[error("node url {0:?} is not a valid url")]
	BadUrl(String),
	#[error("fcu-invalid-threshold must be in (0, 1], got {0}")]
	BadThreshold(f64),
	#[error(transparent)]
	Secret(#[from] SecretError),
}

/// Options the core consumes, already parsed and validated. Any failure
/// here is fatal at startup.
pub struct Config {
	pub nodes: Vec<String>,
	pub secret: JwtSecret,
	pub port: u16,
	pub listen_addr: String,
	pub fcu_invalid_threshold: f64,
}

impl Config {
	pub fn load(
		nodes: &str,
		jwt_secret: &Path,
		port: u16,
		listen_addr: String,
		fcu_invalid_threshold: f64,
	) -> Result<Self, ConfigError> {
		let nodes = parse_node_list(nodes);
		if nodes.is_empty() {
			return Err(ConfigError::NoNodes);
		}
		for url in &nodes {
			if reqwest::Url::parse(url).is_err() {
				return Err(ConfigError::BadUrl(url.clone()));
			}
		}
		if !(fcu_invalid_threshold > 0.0 && fcu_invalid_threshold <= 1.0) {
			return Err(ConfigError::BadThreshold(fcu_invalid_threshold));
		}
		let secret = JwtSecret::from_file(jwt_secret)?;
		Ok(Self {
			nodes,
			secret,
			port,
			listen_addr,
			fcu_invalid_threshold,
		})
	}
}

fn parse_node_list(nodes: &str) -> Vec<String> {
	nodes
		.split(',')
		.map(str::trim)
		.filter(|url| !url.is_empty())
		.map(str::to_owned)
		.collect()
}
