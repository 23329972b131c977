use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
	#[error("error reading jwt secret file: {0}")]
	Io(#[from] std::io::Error),
	#[error("jwt secret is not valid hex: {0}")]
	Hex(#[from] hex::FromHexError),
	#[error("jwt secret must decode to 32 bytes, got {0}")]
	BadLength(usize),
}

/// Claims carried by every engine-port token. The engine auth scheme only
/// requires an issued-at timestamp.
#[derive(Serialize)]
struct Claims {
	iat: u64,
}

/// Shared HS256 secret for the backends' authenticated engine port.
#[derive(Clone)]
pub struct JwtSecret {
	key: EncodingKey,
}

impl JwtSecret {
	pub fn new(bytes: &[u8]) -> Self {
		Self {
			key: EncodingKey::from_secret(bytes),
		}
	}

	/// Load the secret from a file holding a hex-encoded 32-byte key, with
	/// or without a 0x prefix.
	pub fn from_file(path: &Path) -> Result<Self, SecretError> {
		let raw = std::fs::read_to_string(path)?;
		let bytes = hex::decode(raw.trim().trim_start_matches("0x"))?;
		if bytes.len() != 32 {
			return Err(SecretError::BadLength(bytes.len()));
		}
		Ok(Self::new(&bytes))
	}

	/// Mint a token over the current wall-clock second. Tokens are cheap;
	/// callers must mint one per probe rather than cache them.
	pub fn sign(&self) -> Result<String, jsonwebtoken::errors::Error> {
		let iat = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_or(0, |d| d.as_secs());
		jsonwebtoken::encode(&Header::new(Algorithm::HS256), &Claims { iat }, &self.key)
	}
}
