//! # idtoken - OpenID Connect ID Token Verification
//!
//! Verifies signed identity tokens (JWTs) issued by an identity provider and
//! checks that they were issued for this application.
//!
//! ## Design Principles
//!
//! - **Configuration decides, tokens don't**: the algorithm named in a token
//!   header is only compared against the configured allow-list
//! - **Ordered claim checks**: the first failing check determines the reported
//!   reason, so error messages are stable
//! - **Fail fast**: configuration is validated once, at construction
//!
//! ## Architecture
//!
//! - [`error`] - Error taxonomy (`ConfigError`, `KeyFetchError`, `InvalidTokenError`)
//! - [`config`] - Serde-deserializable verifier configuration
//! - [`cache`] - Key cache trait with no-op, in-memory and TTL implementations
//! - [`jwks`] - Key-set fetching and certificate PEM conversion
//! - [`signature`] - Algorithm-restricted signature verification
//! - [`claims`] - Claim set and ordered claim validation
//! - [`verifier`] - Single-issuer and multi-issuer verifiers
//!
//! ## Quick Start
//!
//! ```rust
//! use idtoken::{IdTokenVerifier, VerifierConfig};
//!
//! let config = VerifierConfig::new()
//!     .with_algorithm("HS256")
//!     .with_signature_key("__client_secret__")
//!     .with_client_id("__client_id__")
//!     .with_issuer("https://tenant.example.com/");
//!
//! let verifier = IdTokenVerifier::new(config, None)?;
//!
//! match verifier.decode("eyJhbGciOi...") {
//!     Ok(claims) => println!("Hello {:?}", claims.subject()),
//!     Err(e) => println!("Rejected: {e}"),
//! }
//! # Ok::<(), idtoken::ConfigError>(())
//! ```
//!
//! ## Key Sets
//!
//! RS256 verifiers may download their keys instead of holding a static one:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use idtoken::{IdTokenVerifier, KeySet, KeySetFetcher, TtlKeyCache, VerifierConfig};
//!
//! let cache = Arc::new(TtlKeyCache::<Arc<KeySet>>::default());
//! let fetcher = KeySetFetcher::new("https://tenant.example.com/.well-known/jwks.json", cache)?;
//!
//! let config = VerifierConfig::new()
//!     .with_algorithm("RS256")
//!     .with_client_id("__client_id__")
//!     .with_issuer("https://tenant.example.com/");
//! let verifier = IdTokenVerifier::new(config, Some(Arc::new(fetcher)))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Fetching blocks the calling thread. Inside an async runtime, call `decode`
//! from `spawn_blocking`.
//!
//! ## Standards
//!
//! - **RFC 7515** - JSON Web Signature (HS256, RS256)
//! - **RFC 7517** - JSON Web Key Set (`x5c` certificate chains)
//! - **RFC 7519** - JSON Web Token
//! - **OpenID Connect Core 1.0** - ID token validation (`aud`, `azp`)

pub mod cache;
pub mod claims;
pub mod config;
pub mod error;
pub mod jwks;
pub mod signature;
pub mod verifier;

#[doc(inline)]
pub use error::{ConfigError, Error, InvalidTokenError, KeyFetchError, Result, SignatureError};

#[doc(inline)]
pub use config::{ClockPolicy, DEFAULT_CLOCK_SKEW, MultiIssuerConfig, SigningAlgorithm, VerifierConfig};

#[doc(inline)]
pub use cache::{KeyCache, MemoryKeyCache, NoopKeyCache, SharedKeyCache, TtlKeyCache};

#[doc(inline)]
pub use jwks::{
    HttpTransport, KeyFamily, KeySet, KeySetFetcher, KeySetTransport, SigningKey, TransportOptions,
};

#[doc(inline)]
pub use signature::KeyLookup;

#[doc(inline)]
pub use claims::{ClaimSet, ClaimValidator};

#[doc(inline)]
pub use verifier::{IdTokenVerifier, MultiIssuerVerifier};
