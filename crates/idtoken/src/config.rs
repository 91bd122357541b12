//! Verifier Configuration Types
//!
//! These structures are plain data: every field is optional at the type level so
//! they can be deserialized from any serde front-end. Validation happens in the
//! verifier factories ([`IdTokenVerifier::new`](crate::IdTokenVerifier::new),
//! [`MultiIssuerVerifier::new`](crate::MultiIssuerVerifier::new)).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Default clock skew tolerance applied when enforcing `exp`/`iat`.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Signature algorithms a verifier can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC-SHA256 with a shared secret
    HS256,
    /// RSASSA-PKCS1-v1_5 with SHA-256 over an RSA public key
    RS256,
}

impl SigningAlgorithm {
    /// The JOSE name of the algorithm.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "RS256" => Ok(Self::RS256),
            other => Err(ConfigError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::HS256 => Algorithm::HS256,
            SigningAlgorithm::RS256 => Algorithm::RS256,
        }
    }
}

impl TryFrom<Algorithm> for SigningAlgorithm {
    type Error = ();

    fn try_from(alg: Algorithm) -> Result<Self, Self::Error> {
        match alg {
            Algorithm::HS256 => Ok(Self::HS256),
            Algorithm::RS256 => Ok(Self::RS256),
            _ => Err(()),
        }
    }
}

/// How `exp` and `iat` are checked against the current time.
///
/// The ordered presence/identity checks run identically under both policies;
/// `Enforce` only adds the time comparison once they have passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClockPolicy {
    /// Only require `exp` and `iat` to be present.
    PresenceOnly,
    /// Reject expired tokens and tokens issued in the future.
    Enforce {
        /// Clock skew tolerance in seconds
        #[serde(default = "default_leeway_secs")]
        leeway_secs: u64,
    },
}

fn default_leeway_secs() -> u64 {
    DEFAULT_CLOCK_SKEW.as_secs()
}

impl Default for ClockPolicy {
    fn default() -> Self {
        Self::Enforce {
            leeway_secs: default_leeway_secs(),
        }
    }
}

impl ClockPolicy {
    /// Enforce time claims with the given clock skew tolerance.
    pub fn enforce(leeway: Duration) -> Self {
        Self::Enforce {
            leeway_secs: leeway.as_secs(),
        }
    }
}

/// Configuration for a single-issuer [`IdTokenVerifier`](crate::IdTokenVerifier).
///
/// # Example
///
/// ```rust
/// use idtoken::VerifierConfig;
///
/// let config: VerifierConfig = serde_json::from_str(r#"{
///     "algorithm": "HS256",
///     "signature_key": "__client_secret__",
///     "client_id": "__client_id__",
///     "issuer": "https://tenant.example.com/"
/// }"#).unwrap();
/// assert_eq!(config.algorithm.as_deref(), Some("HS256"));
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifierConfig {
    /// `HS256` or `RS256`
    #[serde(default)]
    pub algorithm: Option<String>,
    /// HMAC secret (HS256) or PEM public key / certificate (RS256)
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub signature_key: Option<SecretString>,
    /// Expected audience and authorized party
    #[serde(default)]
    pub client_id: Option<String>,
    /// Expected `iss` claim
    #[serde(default)]
    pub issuer: Option<String>,
    /// Time claim policy
    #[serde(default)]
    pub clock: ClockPolicy,
}

impl VerifierConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signature algorithm.
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Set the static signature key.
    pub fn with_signature_key(mut self, key: impl Into<String>) -> Self {
        self.signature_key = Some(SecretString::new(key.into()));
        self
    }

    /// Set the expected client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the expected issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Set the time claim policy.
    pub fn with_clock_policy(mut self, clock: ClockPolicy) -> Self {
        self.clock = clock;
        self
    }
}

/// Configuration for a [`MultiIssuerVerifier`](crate::MultiIssuerVerifier).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MultiIssuerConfig {
    /// Audiences this application accepts
    #[serde(default)]
    pub valid_audiences: Vec<String>,
    /// Issuers this application trusts
    #[serde(default)]
    pub authorized_iss: Vec<String>,
    /// Accepted signature algorithms (`HS256`, `RS256`)
    #[serde(default)]
    pub supported_algs: Vec<String>,
    /// Shared HMAC secret, required when HS256 is supported
    #[serde(
        default,
        alias = "signature_key",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub client_secret: Option<SecretString>,
    /// Whether `client_secret` is base64 encoded
    #[serde(default)]
    pub secret_base64_encoded: bool,
    /// Time claim policy
    #[serde(default)]
    pub clock: ClockPolicy,
}

impl MultiIssuerConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an accepted audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.valid_audiences.push(audience.into());
        self
    }

    /// Add a trusted issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.authorized_iss.push(issuer.into());
        self
    }

    /// Add an accepted algorithm.
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.supported_algs.push(algorithm.into());
        self
    }

    /// Set the shared HMAC secret.
    pub fn with_client_secret(mut self, secret: impl Into<String>, base64_encoded: bool) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self.secret_base64_encoded = base64_encoded;
        self
    }

    /// Set the time claim policy.
    pub fn with_clock_policy(mut self, clock: ClockPolicy) -> Self {
        self.clock = clock;
        self
    }
}

// Custom deserialization for optional SecretString
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(SecretString::new))
}
