//! Key set (JWKS) fetching and caching
//!
//! A [`KeySetFetcher`] downloads a JSON key-set document, keeps the entries that
//! carry an X.509 certificate chain, armours the first certificate of each as
//! PEM and caches the resulting [`KeySet`] under the document URL.
//!
//! - **Cache first**: a hit never touches the network
//! - **Tolerant parsing**: malformed documents or entries degrade to an empty
//!   or partial key set, only transport failures are errors
//! - **Single-flight misses**: concurrent misses on one fetcher are serialised
//!   and re-check the cache before issuing a request
//!
//! Fetching is synchronous; the calling thread blocks for the HTTP round-trip.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::SharedKeyCache;
use crate::error::{KeyFetchError, SignatureError};
use crate::signature::decoding_key_from_pem;

/// Line terminator used when armouring certificates.
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
/// Line terminator used when armouring certificates.
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

const PEM_LINE_WIDTH: usize = 64;
const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Key type announced by a key-set entry (`kty`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// `"RSA"`
    Rsa,
    /// `"EC"`
    Ec,
    /// Missing or any other value
    Unknown,
}

impl KeyFamily {
    fn from_kty(kty: Option<&str>) -> Self {
        match kty {
            Some("RSA") => Self::Rsa,
            Some("EC") => Self::Ec,
            _ => Self::Unknown,
        }
    }
}

/// A single verification key from a key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    kid: String,
    pem: String,
    family: KeyFamily,
}

impl SigningKey {
    /// Create a key from its identifier and PEM material.
    pub fn new(kid: impl Into<String>, pem: impl Into<String>, family: KeyFamily) -> Self {
        Self {
            kid: kid.into(),
            pem: pem.into(),
            family,
        }
    }

    /// Key identifier, unique within its key set.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// PEM-armoured certificate.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Key type announced by the key set.
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Build a key usable for RS256 verification.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::InvalidKey`] for non-RSA entries or PEM that
    /// does not hold an RSA public key.
    pub fn decoding_key(&self) -> Result<DecodingKey, SignatureError> {
        if self.family == KeyFamily::Ec {
            return Err(SignatureError::InvalidKey(format!(
                "key '{}' is not an RSA key",
                self.kid
            )));
        }
        decoding_key_from_pem(&self.pem)
    }
}

/// Keys published at one source location, indexed by key identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    source: String,
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    /// Create an empty key set for a source location.
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            keys: HashMap::new(),
        }
    }

    /// Create a key set from already converted keys.
    ///
    /// Later keys replace earlier ones with the same identifier.
    pub fn from_keys(source: impl Into<String>, keys: impl IntoIterator<Item = SigningKey>) -> Self {
        let mut set = Self::empty(source);
        for key in keys {
            set.insert(key);
        }
        set
    }

    fn insert(&mut self, key: SigningKey) {
        self.keys.insert(key.kid.clone(), key);
    }

    /// URL the key set was fetched from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Find a key by identifier.
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over the keys in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.values()
    }

    /// Mapping from key identifier to PEM material.
    pub fn pem_map(&self) -> HashMap<String, String> {
        self.keys
            .iter()
            .map(|(kid, key)| (kid.clone(), key.pem.clone()))
            .collect()
    }
}

/// Armour a base64 DER certificate as PEM.
///
/// The body is wrapped at 64 characters and every line, including the last,
/// ends with [`LINE_ENDING`].
pub fn convert_cert_to_pem(cert_base64: &str) -> String {
    let mut output = String::with_capacity(cert_base64.len() + cert_base64.len() / 32 + 64);
    output.push_str(PEM_BEGIN);
    output.push_str(LINE_ENDING);

    let mut rest = cert_base64;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(PEM_LINE_WIDTH)
            .map_or(rest.len(), |(idx, _)| idx);
        let (line, tail) = rest.split_at(split);
        output.push_str(line);
        output.push_str(LINE_ENDING);
        rest = tail;
    }

    output.push_str(PEM_END);
    output.push_str(LINE_ENDING);
    output
}

/// Parse a key-set document.
///
/// Returns `None` when the body is not a JSON object with a non-empty `keys`
/// array. Entries without a non-empty `kid` or `x5c` are skipped; the first
/// `x5c` value of every other entry is armoured as published, minus whitespace.
pub fn parse_key_set(source: &str, body: &[u8]) -> Option<KeySet> {
    let document: Value = match serde_json::from_slice(body) {
        Ok(document) => document,
        Err(e) => {
            warn!(jwks_uri = %source, error = %e, "Key set document is not valid JSON");
            return None;
        }
    };

    let entries = document.get("keys").and_then(Value::as_array)?;
    if entries.is_empty() {
        return None;
    }

    let mut set = KeySet::empty(source);
    for entry in entries {
        let kid = entry
            .get("kid")
            .and_then(Value::as_str)
            .filter(|kid| !kid.is_empty());
        let cert = entry
            .get("x5c")
            .and_then(Value::as_array)
            .and_then(|chain| chain.first())
            .and_then(Value::as_str)
            .filter(|cert| !cert.is_empty());

        let (Some(kid), Some(cert)) = (kid, cert) else {
            debug!(jwks_uri = %source, "Skipping key set entry without kid or x5c");
            continue;
        };

        // Providers may wrap long values; the armour adds its own line breaks
        let body: String = cert.split_whitespace().collect();
        if body.is_empty() {
            debug!(jwks_uri = %source, kid = kid, "Skipping key set entry with blank x5c");
            continue;
        }

        let family = KeyFamily::from_kty(entry.get("kty").and_then(Value::as_str));
        set.insert(SigningKey::new(kid, convert_cert_to_pem(&body), family));
    }

    Some(set)
}

/// Blocking HTTP GET used to download key-set documents.
pub trait KeySetTransport: Send + Sync + fmt::Debug {
    /// Fetch `url` and return the response body.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError`] if the request fails or the status is not a
    /// success.
    fn get(&self, url: &str) -> Result<Vec<u8>, KeyFetchError>;
}

/// Options for the default HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Total request timeout (default: 10 seconds)
    pub timeout: Duration,
    /// Connection timeout (default: 5 seconds)
    pub connect_timeout: Duration,
    /// User agent for requests
    pub user_agent: String,
    /// Proxy URL for all requests
    pub proxy: Option<String>,
    /// Follow up to 10 redirects (default: `false`, a 3xx is an error)
    pub follow_redirects: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: format!("idtoken/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            follow_redirects: false,
        }
    }
}

/// [`KeySetTransport`] backed by a blocking `reqwest` client.
///
/// Must not be created or used from inside an async runtime worker; wrap calls
/// in `spawn_blocking` there.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport with default options.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, KeyFetchError> {
        Self::with_options(&TransportOptions::default())
    }

    /// Create a transport with custom options.
    ///
    /// Redirects are only followed when [`TransportOptions::follow_redirects`]
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Client`] if the proxy URL is invalid or the
    /// HTTP client cannot be built.
    pub fn with_options(options: &TransportOptions) -> Result<Self, KeyFetchError> {
        let redirect = if options.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.as_str())
            .redirect(redirect);

        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| KeyFetchError::Client(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| KeyFetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap a caller-configured client (TLS roots, proxies, timeouts).
    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl KeySetTransport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, KeyFetchError> {
        let response = self.client.get(url).send().map_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to fetch key set");
            KeyFetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %url, status = %status, "Key set endpoint returned error status");
            return Err(KeyFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().map_err(|e| {
            error!(jwks_uri = %url, error = %e, "Failed to read key set response");
            KeyFetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(body.to_vec())
    }
}

/// Fetches and caches the key set published at one URL.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use idtoken::{KeySet, KeySetFetcher, TtlKeyCache};
///
/// let cache = Arc::new(TtlKeyCache::<Arc<KeySet>>::new(Duration::from_secs(600)));
/// let fetcher = KeySetFetcher::new("https://tenant.example.com/.well-known/jwks.json", cache)?;
///
/// let keys = fetcher.fetch_keys()?;
/// for key in keys.iter() {
///     println!("{}", key.kid());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct KeySetFetcher {
    url: String,
    cache: SharedKeyCache,
    transport: Arc<dyn KeySetTransport>,
    fetch_lock: Mutex<()>,
}

impl fmt::Debug for KeySetFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySetFetcher")
            .field("url", &self.url)
            .field("cache", &self.cache)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl KeySetFetcher {
    /// Create a fetcher using the default HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Client`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, cache: SharedKeyCache) -> Result<Self, KeyFetchError> {
        Ok(Self::with_transport(url, cache, Arc::new(HttpTransport::new()?)))
    }

    /// Create a fetcher with a custom transport.
    pub fn with_transport(
        url: impl Into<String>,
        cache: SharedKeyCache,
        transport: Arc<dyn KeySetTransport>,
    ) -> Self {
        Self {
            url: url.into(),
            cache,
            transport,
            fetch_lock: Mutex::new(()),
        }
    }

    /// Key-set location.
    pub fn source_url(&self) -> &str {
        &self.url
    }

    /// Return the key set, from cache or from the network.
    ///
    /// Documents without usable keys yield an empty set and are not cached;
    /// the failure then surfaces at signature verification.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError`] if the document cannot be retrieved.
    pub fn fetch_keys(&self) -> Result<Arc<KeySet>, KeyFetchError> {
        if let Some(keys) = self.cache.get(&self.url) {
            debug!(jwks_uri = %self.url, "Using cached key set");
            return Ok(keys);
        }

        // Serialising misses only pays off when the result is kept
        let _guard = self
            .cache
            .stores_entries()
            .then(|| self.fetch_lock.lock());

        // Another caller may have filled the cache while we waited
        if let Some(keys) = self.cache.get(&self.url) {
            debug!(jwks_uri = %self.url, "Using key set fetched by concurrent caller");
            return Ok(keys);
        }

        info!(jwks_uri = %self.url, "Fetching key set from endpoint");
        let body = self.transport.get(&self.url)?;

        let Some(keys) = parse_key_set(&self.url, &body) else {
            warn!(jwks_uri = %self.url, "Key set document has no keys");
            return Ok(Arc::new(KeySet::empty(self.url.as_str())));
        };

        info!(
            jwks_uri = %self.url,
            key_count = keys.len(),
            "Successfully fetched key set"
        );

        let keys = Arc::new(keys);
        self.cache.put(&self.url, Arc::clone(&keys));
        Ok(keys)
    }
}
