//! Signature verification
//!
//! [`verify`] checks a compact JWS against an explicit algorithm allow-list and
//! decodes its claims. The algorithm named in the token header is only ever
//! compared against that list; it never selects how verification happens.
//! Claim semantics (expiry, issuer, audience) are left to
//! [`ClaimValidator`](crate::ClaimValidator) so that its ordering is preserved.

use jsonwebtoken::{Algorithm, DecodingKey, Header, TokenData, Validation, decode, decode_header};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION;
use x509_parser::pem::parse_x509_pem;

use crate::claims::ClaimSet;
use crate::config::SigningAlgorithm;
use crate::error::SignatureError;
use crate::jwks::KeySet;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Where the verification key comes from.
#[derive(Debug, Clone, Copy)]
pub enum KeyLookup<'a> {
    /// One pre-built key, used regardless of the `kid` header.
    Static(&'a DecodingKey),
    /// Keys indexed by `kid`; the token header must name one of them.
    KeySet(&'a KeySet),
}

/// Build an RS256 decoding key from PEM.
///
/// Accepts an X.509 `CERTIFICATE` (its SubjectPublicKeyInfo is used), a
/// SubjectPublicKeyInfo `PUBLIC KEY` or a PKCS#1 `RSA PUBLIC KEY`.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidKey`] if the PEM cannot be parsed or does
/// not hold an RSA key.
pub fn decoding_key_from_pem(pem: &str) -> Result<DecodingKey, SignatureError> {
    let pem = pem.trim();

    if pem.starts_with("-----BEGIN CERTIFICATE-----") {
        let (_, block) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| SignatureError::InvalidKey(format!("invalid certificate PEM: {e}")))?;
        if block.label != CERTIFICATE_LABEL {
            return Err(SignatureError::InvalidKey(format!(
                "unexpected PEM label {}",
                block.label
            )));
        }

        let cert = block
            .parse_x509()
            .map_err(|e| SignatureError::InvalidKey(format!("invalid certificate: {e}")))?;
        let spki = cert.public_key();
        if spki.algorithm.algorithm != OID_PKCS1_RSAENCRYPTION {
            return Err(SignatureError::InvalidKey(
                "certificate does not carry an RSA public key".to_string(),
            ));
        }

        // The bit string of an rsaEncryption SPKI is the PKCS#1 RSAPublicKey
        return Ok(DecodingKey::from_rsa_der(&spki.subject_public_key.data));
    }

    DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(SignatureError::from)
}

/// Build an HS256 decoding key from a shared secret.
pub fn decoding_key_from_secret(secret: &[u8]) -> DecodingKey {
    DecodingKey::from_secret(secret)
}

/// Read the token header without verifying anything.
///
/// # Errors
///
/// Returns [`SignatureError::Malformed`] if the header cannot be decoded.
pub fn peek_header(token: &str) -> Result<Header, SignatureError> {
    decode_header(token).map_err(|e| {
        debug!(error = %e, "Failed to decode JWT header");
        SignatureError::Malformed(e.to_string())
    })
}

/// Verify `token` and decode its claims.
///
/// Fails unless the header algorithm is one of `algorithms`, the key resolves
/// and the signature validates. Claims are returned exactly as encoded.
///
/// # Errors
///
/// Returns [`SignatureError`] describing the first failure.
pub fn verify(
    token: &str,
    algorithms: &[SigningAlgorithm],
    key: KeyLookup<'_>,
) -> Result<ClaimSet, SignatureError> {
    let header = peek_header(token)?;

    let algorithm = SigningAlgorithm::try_from(header.alg)
        .ok()
        .filter(|alg| algorithms.contains(alg))
        .ok_or_else(|| {
            warn!(
                algorithm = ?header.alg,
                allowed = ?algorithms,
                "JWT algorithm not allowed"
            );
            SignatureError::AlgorithmNotAllowed
        })?;

    let resolved;
    let decoding_key = match key {
        KeyLookup::Static(key) => key,
        KeyLookup::KeySet(keys) => {
            let kid = header
                .kid
                .as_deref()
                .filter(|kid| !kid.is_empty())
                .ok_or(SignatureError::MissingKeyId)?;
            let signing_key = keys.get(kid).ok_or_else(|| {
                warn!(kid = kid, jwks_uri = %keys.source(), "Key ID not found in key set");
                SignatureError::UnknownKeyId(kid.to_string())
            })?;
            resolved = signing_key.decoding_key()?;
            &resolved
        }
    };

    let token_data: TokenData<Map<String, Value>> =
        decode(token, decoding_key, &claims_passthrough(algorithm.into())).map_err(|e| {
            warn!(error = %e, algorithm = %algorithm, "JWT signature verification failed");
            SignatureError::from(e)
        })?;

    debug!(algorithm = %algorithm, kid = ?header.kid, "JWT signature verified");
    Ok(ClaimSet::from(token_data.claims))
}

/// Signature-only validation: the single algorithm already checked against the
/// allow-list, and no registered-claim checks.
fn claims_passthrough(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::{KeyFamily, SigningKey};
    use jsonwebtoken::{EncodingKey, encode};
    use serde_json::json;

    const SIGNING_KEY: &str = include_str!("../tests/fixtures/signing_key.pem");
    const SIGNING_CERT: &str = include_str!("../tests/fixtures/signing_cert.pem");
    const SIGNING_PUBLIC: &str = include_str!("../tests/fixtures/signing_public.pem");
    const ROTATED_KEY: &str = include_str!("../tests/fixtures/rotated_key.pem");

    fn hs256_token(claims: &Value, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn rs256_token(claims: &Value, private_pem: &str, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_hs256_round_trip_preserves_json_types() {
        let claims = json!({ "sub": "u", "exp": 10, "aud": ["a", "b"], "nested": { "n": 1.5 } });
        let token = hs256_token(&claims, b"s");
        let key = decoding_key_from_secret(b"s");

        let decoded = verify(&token, &[SigningAlgorithm::HS256], KeyLookup::Static(&key)).unwrap();
        assert_eq!(Value::Object(decoded.into_inner()), claims);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = hs256_token(&json!({ "sub": "u" }), b"s");
        let key = decoding_key_from_secret(b"other");

        let err = verify(&token, &[SigningAlgorithm::HS256], KeyLookup::Static(&key)).unwrap_err();
        assert_eq!(err, SignatureError::InvalidSignature);
    }

    #[test]
    fn test_algorithm_outside_allow_list_is_rejected() {
        // Well-formed HS256 token presented to an RS256-only verifier
        let token = hs256_token(&json!({ "sub": "u" }), SIGNING_PUBLIC.as_bytes());
        let key = decoding_key_from_pem(SIGNING_PUBLIC).unwrap();

        let err = verify(&token, &[SigningAlgorithm::RS256], KeyLookup::Static(&key)).unwrap_err();
        assert_eq!(err, SignatureError::AlgorithmNotAllowed);
    }

    #[test]
    fn test_unsupported_header_algorithm_is_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS384),
            &json!({ "sub": "u" }),
            &EncodingKey::from_secret(b"s"),
        )
        .unwrap();
        let key = decoding_key_from_secret(b"s");

        let err = verify(&token, &[SigningAlgorithm::HS256], KeyLookup::Static(&key)).unwrap_err();
        assert_eq!(err, SignatureError::AlgorithmNotAllowed);
    }

    #[test]
    fn test_alg_none_is_malformed() {
        // {"alg":"none","typ":"JWT"}.{"sub":"u"}.
        let token = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.eyJzdWIiOiJ1In0.";
        let key = decoding_key_from_secret(b"s");

        let err = verify(token, &[SigningAlgorithm::HS256], KeyLookup::Static(&key)).unwrap_err();
        assert!(matches!(err, SignatureError::Malformed(_)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let key = decoding_key_from_secret(b"s");
        for token in ["", "abc", "a.b", "a.b.c"] {
            let err =
                verify(token, &[SigningAlgorithm::HS256], KeyLookup::Static(&key)).unwrap_err();
            assert!(matches!(err, SignatureError::Malformed(_)), "{token}: {err:?}");
        }
    }

    #[test]
    fn test_rs256_with_certificate_pem() {
        let claims = json!({ "sub": "u" });
        let token = rs256_token(&claims, SIGNING_KEY, None);
        let key = decoding_key_from_pem(SIGNING_CERT).unwrap();

        let decoded = verify(&token, &[SigningAlgorithm::RS256], KeyLookup::Static(&key)).unwrap();
        assert_eq!(decoded.get("sub"), Some(&json!("u")));
    }

    #[test]
    fn test_rs256_with_public_key_pem() {
        let token = rs256_token(&json!({ "sub": "u" }), SIGNING_KEY, None);
        let key = decoding_key_from_pem(SIGNING_PUBLIC).unwrap();
        assert!(verify(&token, &[SigningAlgorithm::RS256], KeyLookup::Static(&key)).is_ok());
    }

    #[test]
    fn test_rs256_signed_by_other_key_fails() {
        let token = rs256_token(&json!({ "sub": "u" }), ROTATED_KEY, None);
        let key = decoding_key_from_pem(SIGNING_CERT).unwrap();

        let err = verify(&token, &[SigningAlgorithm::RS256], KeyLookup::Static(&key)).unwrap_err();
        assert_eq!(err, SignatureError::InvalidSignature);
    }

    #[test]
    fn test_key_set_lookup_by_kid() {
        let keys = KeySet::from_keys(
            "https://tenant.example.com/.well-known/jwks.json",
            [SigningKey::new("k1", SIGNING_CERT, KeyFamily::Rsa)],
        );
        let claims = json!({ "sub": "u" });

        let token = rs256_token(&claims, SIGNING_KEY, Some("k1"));
        assert!(verify(&token, &[SigningAlgorithm::RS256], KeyLookup::KeySet(&keys)).is_ok());

        let token = rs256_token(&claims, SIGNING_KEY, None);
        let err = verify(&token, &[SigningAlgorithm::RS256], KeyLookup::KeySet(&keys)).unwrap_err();
        assert_eq!(err, SignatureError::MissingKeyId);
        assert_eq!(err.to_string(), "\"kid\" empty, unable to lookup correct key");

        let token = rs256_token(&claims, SIGNING_KEY, Some("k2"));
        let err = verify(&token, &[SigningAlgorithm::RS256], KeyLookup::KeySet(&keys)).unwrap_err();
        assert_eq!(err, SignatureError::UnknownKeyId("k2".to_string()));
    }

    #[test]
    fn test_invalid_pem_is_rejected() {
        assert!(matches!(
            decoding_key_from_pem("not a key"),
            Err(SignatureError::InvalidKey(_))
        ));
        assert!(matches!(
            decoding_key_from_pem("-----BEGIN CERTIFICATE-----\nQUJD\n-----END CERTIFICATE-----\n"),
            Err(SignatureError::InvalidKey(_))
        ));
    }
}
