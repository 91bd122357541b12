//! Error taxonomy for token verification.
//!
//! Three categories surface to callers:
//!
//! - [`ConfigError`] - raised by the verifier factories, never by `decode`
//! - [`KeyFetchError`] - the remote key set could not be retrieved
//! - [`InvalidTokenError`] - signature or claim validation failed
//!
//! All of them are terminal for the call that produced them.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Verifier configuration was rejected at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The key set could not be fetched.
    #[error(transparent)]
    KeyFetch(#[from] KeyFetchError),

    /// The token failed signature or claim validation.
    #[error(transparent)]
    InvalidToken(#[from] InvalidTokenError),
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<SignatureError> for Error {
    fn from(err: SignatureError) -> Self {
        Self::InvalidToken(InvalidTokenError::Signature(err))
    }
}

/// Configuration rejected by a verifier factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `algorithm` is absent or not one of the supported values.
    #[error("Config key \"algorithm\" is required to be HS256 or RS256")]
    InvalidAlgorithm,

    /// Neither a static key nor a key-set fetcher was provided.
    #[error("Config key \"signature_key\" is required if no key-set fetcher is provided")]
    MissingSignatureKey,

    /// `client_id` is absent or empty.
    #[error("Config key \"client_id\" is required")]
    MissingClientId,

    /// `issuer` is absent or empty.
    #[error("Config key \"issuer\" is required")]
    MissingIssuer,

    /// A static key and a key-set fetcher were both provided.
    #[error("Config keys \"signature_key\" and a key-set fetcher are mutually exclusive")]
    ConflictingKeySources,

    /// Key sets only carry public keys, which HS256 cannot use.
    #[error("A key-set fetcher requires the RS256 algorithm")]
    FetcherRequiresRs256,

    /// The static RS256 key is not a usable PEM public key or certificate.
    #[error("Config key \"signature_key\" is not a valid RSA public key or certificate: {0}")]
    InvalidSignatureKey(String),

    /// `valid_audiences` is absent or empty.
    #[error("Config key \"valid_audiences\" is required")]
    MissingAudiences,

    /// `supported_algs` is absent or empty.
    #[error("Config key \"supported_algs\" is required")]
    MissingSupportedAlgorithms,

    /// `supported_algs` names an algorithm this crate does not verify.
    #[error("Config key \"supported_algs\" contains unsupported algorithm \"{0}\"; expected HS256 or RS256")]
    UnsupportedAlgorithm(String),

    /// `authorized_iss` is absent or empty.
    #[error("Config key \"authorized_iss\" is required")]
    MissingAuthorizedIssuers,

    /// An authorized issuer cannot be turned into a key-set URL.
    #[error("Config key \"authorized_iss\" contains an invalid URL \"{0}\"")]
    InvalidIssuerUrl(String),

    /// HS256 is accepted but no shared secret was configured.
    #[error("Config key \"client_secret\" is required when HS256 is supported")]
    MissingClientSecret,

    /// `secret_base64_encoded` is set but the secret does not decode.
    #[error("Config key \"client_secret\" is not valid base64")]
    InvalidClientSecretEncoding,

    /// RS256 is accepted but an authorized issuer has no key source.
    #[error("No key-set fetcher configured for issuer \"{0}\"")]
    MissingIssuerFetcher(String),
}

/// Failure to retrieve a remote key set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFetchError {
    /// The request could not be completed.
    #[error("Key set request to {url} failed: {message}")]
    Transport {
        /// Key-set location
        url: String,
        /// Underlying transport error
        message: String,
    },

    /// The endpoint answered with a non-success status.
    #[error("Key set endpoint {url} returned status {status}")]
    Status {
        /// Key-set location
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Cryptographic or structural failure while checking a token signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Token is not a well-formed compact JWS.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The header names an algorithm outside the configured allow-list.
    #[error("Algorithm not allowed")]
    AlgorithmNotAllowed,

    /// The signature does not validate under the resolved key.
    #[error("Signature verification failed")]
    InvalidSignature,

    /// Key-set lookup needs a `kid` header.
    #[error("\"kid\" empty, unable to lookup correct key")]
    MissingKeyId,

    /// The `kid` header names no key in the key set.
    #[error("\"kid\" invalid, unable to lookup correct key")]
    UnknownKeyId(String),

    /// The resolved key material cannot be used for verification.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl From<jsonwebtoken::errors::Error> for SignatureError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::AlgorithmNotAllowed
            }
            ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat => Self::InvalidKey(err.to_string()),
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// A token that must not be trusted.
///
/// `Display` yields the fixed reason string; callers match on it or on the
/// variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTokenError {
    /// Signature verification failed; carries the underlying message.
    #[error("{0}")]
    Signature(#[from] SignatureError),

    /// Expiration time (`exp`) absent or empty.
    #[error("Missing token exp")]
    MissingExp,

    /// Issue time (`iat`) absent or empty.
    #[error("Missing token iat")]
    MissingIat,

    /// Issuer absent or not one of the expected values.
    #[error("Invalid token iss")]
    InvalidIss,

    /// Audience (`aud`) absent or empty.
    #[error("Missing token aud")]
    MissingAud,

    /// No expected audience appears in the token audience.
    #[error("Invalid token aud")]
    InvalidAud,

    /// Multi-audience token without a matching authorized party.
    #[error("Invalid token azp")]
    InvalidAzp,

    /// `exp` is not a numeric timestamp.
    #[error("Invalid token exp")]
    InvalidExp,

    /// `iat` is not a numeric timestamp.
    #[error("Invalid token iat")]
    InvalidIat,

    /// `exp` plus leeway is not after the current time.
    #[error("Token expired")]
    Expired,

    /// `iat` minus leeway is after the current time.
    #[error("Token issued in the future")]
    IssuedInFuture,
}

impl InvalidTokenError {
    /// Human-readable reason, identical to the `Display` output.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
