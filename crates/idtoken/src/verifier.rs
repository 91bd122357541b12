//! Token verifiers
//!
//! [`IdTokenVerifier`] checks tokens from one issuer signed with one algorithm.
//! [`MultiIssuerVerifier`] accepts a set of issuers, audiences and algorithms.
//! Both validate the decoded claims with the same ordered [`ClaimValidator`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::cache::SharedKeyCache;
use crate::claims::{ClaimSet, ClaimValidator};
use crate::config::{MultiIssuerConfig, SigningAlgorithm, VerifierConfig};
use crate::error::{ConfigError, InvalidTokenError, Result, SignatureError};
use crate::jwks::{HttpTransport, KeySetFetcher, KeySetTransport};
use crate::signature::{self, KeyLookup, decoding_key_from_pem, decoding_key_from_secret};

/// Path of the key-set document relative to an issuer.
pub const JWKS_PATH: &str = ".well-known/jwks.json";

/// Where a verifier gets its verification key.
enum KeySource {
    /// Key material given in the configuration
    Static(DecodingKey),
    /// Keys downloaded from a key-set endpoint, selected by `kid`
    Fetcher(Arc<KeySetFetcher>),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(<redacted>)"),
            Self::Fetcher(fetcher) => f.debug_tuple("Fetcher").field(fetcher).finish(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn static_key(algorithm: SigningAlgorithm, key: &SecretString) -> Result<DecodingKey, ConfigError> {
    match algorithm {
        SigningAlgorithm::HS256 => Ok(decoding_key_from_secret(key.expose_secret().as_bytes())),
        SigningAlgorithm::RS256 => decoding_key_from_pem(key.expose_secret())
            .map_err(|e| ConfigError::InvalidSignatureKey(e.to_string())),
    }
}

/// Verifier for tokens from a single issuer.
///
/// # Example
///
/// ```rust
/// use idtoken::{IdTokenVerifier, VerifierConfig};
///
/// let config = VerifierConfig::new()
///     .with_algorithm("HS256")
///     .with_signature_key("__client_secret__")
///     .with_client_id("__client_id__")
///     .with_issuer("https://tenant.example.com/");
///
/// let verifier = IdTokenVerifier::new(config, None)?;
/// assert!(verifier.decode("not-a-token").is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct IdTokenVerifier {
    algorithm: SigningAlgorithm,
    key: KeySource,
    validator: ClaimValidator,
}

impl IdTokenVerifier {
    /// Validate `config` and build a verifier.
    ///
    /// Fields are checked in order: `algorithm`, key source, `client_id`,
    /// `issuer`. A static `signature_key` and a `fetcher` are mutually
    /// exclusive, and a fetcher is only usable with RS256.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] for the first rejected field.
    pub fn new(
        config: VerifierConfig,
        fetcher: Option<Arc<KeySetFetcher>>,
    ) -> Result<Self, ConfigError> {
        let algorithm = non_blank(config.algorithm.as_deref())
            .and_then(|alg| alg.parse::<SigningAlgorithm>().ok())
            .ok_or(ConfigError::InvalidAlgorithm)?;

        let signature_key = config
            .signature_key
            .filter(|key| !key.expose_secret().is_empty());
        if signature_key.is_none() && fetcher.is_none() {
            return Err(ConfigError::MissingSignatureKey);
        }

        let client_id = non_blank(config.client_id.as_deref())
            .ok_or(ConfigError::MissingClientId)?
            .to_string();
        let issuer = non_blank(config.issuer.as_deref())
            .ok_or(ConfigError::MissingIssuer)?
            .to_string();

        let key = match (signature_key, fetcher) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingKeySources),
            (None, Some(_)) if algorithm != SigningAlgorithm::RS256 => {
                return Err(ConfigError::FetcherRequiresRs256);
            }
            (None, Some(fetcher)) => KeySource::Fetcher(fetcher),
            (Some(key), None) => KeySource::Static(static_key(algorithm, &key)?),
            (None, None) => return Err(ConfigError::MissingSignatureKey),
        };

        debug!(
            algorithm = %algorithm,
            issuer = %issuer,
            key_source = ?key,
            "Created ID token verifier"
        );

        Ok(Self {
            algorithm,
            key,
            validator: ClaimValidator::new(issuer, client_id).with_clock_policy(config.clock),
        })
    }

    /// Verify the signature of `token` and validate its claims.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyFetch`](crate::Error::KeyFetch) if the key set could not be retrieved
    /// - [`Error::InvalidToken`](crate::Error::InvalidToken) if the signature or a claim check fails
    pub fn decode(&self, token: &str) -> Result<ClaimSet> {
        let keys;
        let lookup = match &self.key {
            KeySource::Static(key) => KeyLookup::Static(key),
            KeySource::Fetcher(fetcher) => {
                keys = fetcher.fetch_keys()?;
                KeyLookup::KeySet(&keys)
            }
        };

        let claims = signature::verify(token, &[self.algorithm], lookup)
            .map_err(InvalidTokenError::from)?;
        let claims = self.validator.validate(claims).inspect_err(|e| {
            debug!(reason = %e, "ID token claims rejected");
        })?;

        debug!(subject = ?claims.subject(), "ID token verified");
        Ok(claims)
    }

    /// Configured signature algorithm.
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Expected issuer.
    pub fn issuer(&self) -> &str {
        self.validator.issuers().first().map_or("", String::as_str)
    }

    /// Expected client identifier.
    pub fn client_id(&self) -> &str {
        self.validator.audiences().first().map_or("", String::as_str)
    }

    /// The claim validator in use.
    pub fn validator(&self) -> &ClaimValidator {
        &self.validator
    }
}

/// Verifier accepting tokens from several issuers for several audiences.
///
/// The unverified `iss` claim of an RS256 token picks which issuer's key set
/// to verify against. It is never trusted: the verified claims go through the
/// ordered checks like any other token.
pub struct MultiIssuerVerifier {
    algorithms: Vec<SigningAlgorithm>,
    secret: Option<DecodingKey>,
    fetchers: HashMap<String, Arc<KeySetFetcher>>,
    validator: ClaimValidator,
}

impl fmt::Debug for MultiIssuerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiIssuerVerifier")
            .field("algorithms", &self.algorithms)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("fetchers", &self.fetchers)
            .field("validator", &self.validator)
            .finish()
    }
}

impl MultiIssuerVerifier {
    /// Build a verifier that downloads each issuer's keys from
    /// `<issuer>/.well-known/jwks.json` over HTTP, caching them in `cache`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for a rejected
    /// configuration and [`Error::KeyFetch`](crate::Error::KeyFetch) if the HTTP
    /// client cannot be built.
    pub fn new(config: MultiIssuerConfig, cache: SharedKeyCache) -> Result<Self> {
        let transport: Arc<dyn KeySetTransport> = Arc::new(HttpTransport::new()?);
        Ok(Self::with_transport(config, cache, transport)?)
    }

    /// Like [`MultiIssuerVerifier::new`] with a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] for the first rejected field.
    pub fn with_transport(
        config: MultiIssuerConfig,
        cache: SharedKeyCache,
        transport: Arc<dyn KeySetTransport>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, |issuer| {
            let url = jwks_url(issuer)?;
            Ok(Arc::new(KeySetFetcher::with_transport(
                url,
                Arc::clone(&cache),
                Arc::clone(&transport),
            )))
        })
    }

    /// Build a verifier from explicit per-issuer fetchers.
    ///
    /// When RS256 is supported every authorized issuer needs an entry.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] for the first rejected field.
    pub fn with_fetchers(
        config: MultiIssuerConfig,
        fetchers: HashMap<String, Arc<KeySetFetcher>>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, |issuer| {
            fetchers
                .get(issuer)
                .cloned()
                .ok_or_else(|| ConfigError::MissingIssuerFetcher(issuer.to_string()))
        })
    }

    fn build(
        config: MultiIssuerConfig,
        mut fetcher_for: impl FnMut(&str) -> Result<Arc<KeySetFetcher>, ConfigError>,
    ) -> Result<Self, ConfigError> {
        if config.valid_audiences.iter().all(String::is_empty) {
            return Err(ConfigError::MissingAudiences);
        }

        if config.supported_algs.is_empty() {
            return Err(ConfigError::MissingSupportedAlgorithms);
        }
        let mut algorithms = Vec::with_capacity(config.supported_algs.len());
        for name in &config.supported_algs {
            let algorithm = name.parse::<SigningAlgorithm>()?;
            if !algorithms.contains(&algorithm) {
                algorithms.push(algorithm);
            }
        }

        if config.authorized_iss.iter().all(String::is_empty) {
            return Err(ConfigError::MissingAuthorizedIssuers);
        }

        let secret = if algorithms.contains(&SigningAlgorithm::HS256) {
            let secret = config
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().as_str())
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::MissingClientSecret)?;
            let bytes = if config.secret_base64_encoded {
                decode_base64_secret(secret)?
            } else {
                secret.as_bytes().to_vec()
            };
            Some(decoding_key_from_secret(&bytes))
        } else {
            None
        };

        let mut fetchers = HashMap::new();
        if algorithms.contains(&SigningAlgorithm::RS256) {
            for issuer in config.authorized_iss.iter().filter(|i| !i.is_empty()) {
                fetchers.insert(issuer.clone(), fetcher_for(issuer)?);
            }
        }

        debug!(
            algorithms = ?algorithms,
            issuers = ?config.authorized_iss,
            audiences = ?config.valid_audiences,
            "Created multi-issuer verifier"
        );

        Ok(Self {
            algorithms,
            secret,
            fetchers,
            validator: ClaimValidator::for_issuers(config.authorized_iss, config.valid_audiences)
                .with_clock_policy(config.clock),
        })
    }

    /// Verify the signature of `token` and validate its claims.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyFetch`](crate::Error::KeyFetch) if the key set could not be retrieved
    /// - [`Error::InvalidToken`](crate::Error::InvalidToken) if the signature or a claim check fails
    pub fn decode(&self, token: &str) -> Result<ClaimSet> {
        let header = signature::peek_header(token).map_err(InvalidTokenError::from)?;
        let algorithm = SigningAlgorithm::try_from(header.alg)
            .ok()
            .filter(|alg| self.algorithms.contains(alg))
            .ok_or_else(|| {
                warn!(
                    algorithm = ?header.alg,
                    allowed = ?self.algorithms,
                    "JWT algorithm not allowed"
                );
                InvalidTokenError::from(SignatureError::AlgorithmNotAllowed)
            })?;

        let keys;
        let lookup = match algorithm {
            SigningAlgorithm::HS256 => KeyLookup::Static(
                self.secret
                    .as_ref()
                    .ok_or(InvalidTokenError::from(SignatureError::AlgorithmNotAllowed))?,
            ),
            SigningAlgorithm::RS256 => {
                // Selection only: the verified claims decide trust
                let issuer = unverified_issuer(token);
                let fetcher = issuer
                    .as_deref()
                    .and_then(|iss| self.fetchers.get(iss))
                    .ok_or_else(|| {
                        warn!(issuer = ?issuer, "No key set for token issuer");
                        InvalidTokenError::InvalidIss
                    })?;
                keys = fetcher.fetch_keys()?;
                KeyLookup::KeySet(&keys)
            }
        };

        let claims =
            signature::verify(token, &[algorithm], lookup).map_err(InvalidTokenError::from)?;
        let claims = self.validator.validate(claims).inspect_err(|e| {
            debug!(reason = %e, "ID token claims rejected");
        })?;

        debug!(issuer = ?claims.issuer(), subject = ?claims.subject(), "ID token verified");
        Ok(claims)
    }

    /// Accepted algorithms, without duplicates.
    pub fn algorithms(&self) -> &[SigningAlgorithm] {
        &self.algorithms
    }

    /// Key-set fetchers by issuer; empty unless RS256 is supported.
    pub fn fetchers(&self) -> &HashMap<String, Arc<KeySetFetcher>> {
        &self.fetchers
    }

    /// The claim validator in use.
    pub fn validator(&self) -> &ClaimValidator {
        &self.validator
    }
}

/// Key-set location for an issuer.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidIssuerUrl`] unless `issuer` is an absolute
/// `http` or `https` URL.
pub fn jwks_url(issuer: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidIssuerUrl(issuer.to_string());

    // Join relative to the issuer path, not its parent
    let base = if issuer.ends_with('/') {
        Url::parse(issuer)
    } else {
        Url::parse(&format!("{issuer}/"))
    }
    .map_err(|_| invalid())?;

    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let url = base.join(JWKS_PATH).map_err(|_| invalid())?;
    Ok(url.to_string())
}

// Accepts the URL-safe and the standard alphabet, padded or not
fn decode_base64_secret(secret: &str) -> Result<Vec<u8>, ConfigError> {
    let trimmed = secret.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|_| ConfigError::InvalidClientSecretEncoding)
}

fn unverified_issuer(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Map<String, Value> = serde_json::from_slice(&bytes).ok()?;
    claims.get("iss")?.as_str().map(str::to_string)
}
