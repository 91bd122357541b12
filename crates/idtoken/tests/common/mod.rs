//! Common test utilities for integration tests
//!
//! Provides a mock key-set server, token minting helpers and the RSA fixtures
//! shared by the verification scenarios.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// PKCS#8 private key whose certificate is [`SIGNING_CERT`]
pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
/// Self-signed certificate for [`SIGNING_KEY`]
pub const SIGNING_CERT: &str = include_str!("../fixtures/signing_cert.pem");
/// SubjectPublicKeyInfo PEM for [`SIGNING_KEY`]
pub const SIGNING_PUBLIC: &str = include_str!("../fixtures/signing_public.pem");
/// A second, unrelated key pair (key rotation, forged signatures)
pub const ROTATED_KEY: &str = include_str!("../fixtures/rotated_key.pem");
pub const ROTATED_CERT: &str = include_str!("../fixtures/rotated_cert.pem");

pub const CLIENT_ID: &str = "__client_id__";
pub const CLIENT_SECRET: &str = "__client_secret__";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Mock identity provider publishing a key set
pub struct MockKeySetServer {
    pub server: MockServer,
}

impl MockKeySetServer {
    /// Start a new mock server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer identifier for a tenant path (`""` for the root tenant)
    pub fn issuer(&self, tenant: &str) -> String {
        if tenant.is_empty() {
            format!("{}/", self.server.uri())
        } else {
            format!("{}/{}/", self.server.uri(), tenant)
        }
    }

    /// Key-set URL for a tenant path
    pub fn jwks_url(&self, tenant: &str) -> String {
        format!("{}{}", self.server.uri(), tenant_path(tenant))
    }

    /// Serve `document` at the tenant's key-set path, expecting `calls` requests
    pub async fn mock_document(&self, tenant: &str, document: Value, calls: u64) {
        Mock::given(method("GET"))
            .and(path(tenant_path(tenant)))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve one certificate under `kid`
    pub async fn mock_key_set(&self, tenant: &str, kid: &str, cert_pem: &str, calls: u64) {
        self.mock_document(tenant, json!({ "keys": [jwk(kid, cert_pem)] }), calls)
            .await;
    }

    /// Answer the tenant's key-set path with a bare status code
    pub async fn mock_status(&self, tenant: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(tenant_path(tenant)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Redirect the tenant's key-set path to `location`
    pub async fn mock_redirect(&self, tenant: &str, location: &str) {
        Mock::given(method("GET"))
            .and(path(tenant_path(tenant)))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", location))
            .mount(&self.server)
            .await;
    }

    /// Reset all mounted mocks
    pub async fn reset(&self) {
        self.server.reset().await;
    }
}

fn tenant_path(tenant: &str) -> String {
    if tenant.is_empty() {
        JWKS_PATH.to_string()
    } else {
        format!("/{tenant}{JWKS_PATH}")
    }
}

/// Base64 DER body of a PEM certificate, as published in `x5c`
pub fn x5c(cert_pem: &str) -> String {
    cert_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect()
}

/// Key-set entry for a certificate
pub fn jwk(kid: &str, cert_pem: &str) -> Value {
    json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": kid,
        "x5c": [x5c(cert_pem)],
    })
}

/// Sign `claims` with HS256
pub fn hs256_token(claims: &Value, secret: &[u8]) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .expect("Failed to encode HS256 token")
}

/// Sign `claims` with RS256, optionally naming the key
pub fn rs256_token(claims: &Value, private_pem: &str, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.typ = Some("JWT".to_string());
    header.kid = kid.map(str::to_string);

    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("Invalid RSA key");
    encode(&header, claims, &key).expect("Failed to encode RS256 token")
}

/// Current time as Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Claims that pass every check for `issuer` and [`CLIENT_ID`]
pub fn valid_claims(issuer: &str) -> Value {
    let now = current_timestamp();
    json!({
        "sub": "user-123",
        "iss": issuer,
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 3600,
    })
}

/// Run blocking verifier code off the async runtime.
///
/// Verifiers and their HTTP clients must be created, used and dropped here.
pub async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
