//! Where the worker loads the session module from.

use serde::{Deserialize, Serialize};

/// Location or contents of the session module binary.
///
/// Inline bytes travel base64 encoded so the `PBC_LOAD` command stays a plain
/// JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleSource {
	/// A fetchable location, resolved by the module loader.
	Url(String),
	/// The module binary itself.
	Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl ModuleSource {
	/// Module at a fetchable location.
	pub fn url(url: impl Into<String>) -> Self {
		ModuleSource::Url(url.into())
	}

	/// Module from an in-memory binary.
	pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
		ModuleSource::Bytes(bytes.into())
	}

	/// Short description for logs; never dumps the binary.
	pub fn describe(&self) -> String {
		match self {
			ModuleSource::Url(url) => format!("url {url}"),
			ModuleSource::Bytes(bytes) => format!("{} inline bytes", bytes.len()),
		}
	}
}

mod base64_bytes {
	use base64::Engine as _;
	use base64::engine::general_purpose::STANDARD;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		STANDARD
			.decode(encoded.as_bytes())
			.map_err(serde::de::Error::custom)
	}
}
