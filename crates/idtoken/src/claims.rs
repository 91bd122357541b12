//! Decoded claims and ordered claim validation
//!
//! [`ClaimValidator::validate`] applies its checks in a fixed order and reports
//! the first failure:
//!
//! 1. `exp` present
//! 2. `iat` present
//! 3. `iss` present and expected
//! 4. `aud` present
//! 5. an expected audience appears in `aud`
//! 6. multi-audience tokens carry an expected `azp` that is one of their audiences
//!
//! Under [`ClockPolicy::Enforce`] the time claims are compared with the
//! current time after those six checks pass.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ClockPolicy;
use crate::error::InvalidTokenError;

/// Claims decoded from a verified token.
///
/// Values keep their JSON types; nothing is added or normalised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    /// Look up a claim by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the underlying map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Issuer (`iss`) if it is a string.
    pub fn issuer(&self) -> Option<&str> {
        self.get("iss").and_then(Value::as_str)
    }

    /// Subject (`sub`) if it is a string.
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// Authorized party (`azp`) if it is a string.
    pub fn authorized_party(&self) -> Option<&str> {
        self.get("azp").and_then(Value::as_str)
    }

    /// Expiration time (`exp`) in seconds since the epoch.
    pub fn expires_at(&self) -> Option<i64> {
        self.get("exp").and_then(timestamp)
    }

    /// Issue time (`iat`) in seconds since the epoch.
    pub fn issued_at(&self) -> Option<i64> {
        self.get("iat").and_then(timestamp)
    }

    /// Audience normalised to a list; a single value becomes one element.
    pub fn audience(&self) -> Vec<&Value> {
        match self.get("aud") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values.iter().collect(),
            Some(value) => vec![value],
        }
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(claims: Map<String, Value>) -> Self {
        Self(claims)
    }
}

impl From<ClaimSet> for Value {
    fn from(claims: ClaimSet) -> Self {
        Value::Object(claims.0)
    }
}

fn timestamp(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Whether a claim is missing or carries an empty value (`null`, `false`, `0`,
/// `""`, `"0"`, `[]`, `{}`).
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty() || s == "0",
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
    }
}

/// Ordered semantic checks on a decoded claim set.
///
/// # Example
///
/// ```rust
/// use idtoken::{ClaimSet, ClaimValidator, ClockPolicy};
/// use serde_json::json;
///
/// let validator = ClaimValidator::new("https://tenant.example.com/", "__client_id__")
///     .with_clock_policy(ClockPolicy::PresenceOnly);
///
/// let claims: ClaimSet = serde_json::from_value(json!({
///     "exp": 1, "iat": 1,
///     "iss": "https://tenant.example.com/",
///     "aud": "__client_id__",
/// })).unwrap();
/// assert!(validator.validate(claims).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimValidator {
    issuers: Vec<String>,
    audiences: Vec<String>,
    clock: ClockPolicy,
}

impl ClaimValidator {
    /// Validator for one issuer and one client identifier.
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::for_issuers(vec![issuer.into()], vec![client_id.into()])
    }

    /// Validator accepting any of `issuers` and any of `audiences`.
    ///
    /// With a single audience this behaves exactly like [`ClaimValidator::new`].
    pub fn for_issuers(issuers: Vec<String>, audiences: Vec<String>) -> Self {
        Self {
            issuers,
            audiences,
            clock: ClockPolicy::default(),
        }
    }

    /// Set the time claim policy.
    pub fn with_clock_policy(mut self, clock: ClockPolicy) -> Self {
        self.clock = clock;
        self
    }

    /// Time claim policy in effect.
    pub fn clock_policy(&self) -> ClockPolicy {
        self.clock
    }

    /// Accepted issuers.
    pub fn issuers(&self) -> &[String] {
        &self.issuers
    }

    /// Accepted audiences.
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Validate against the current time; returns the claims unchanged.
    ///
    /// # Errors
    ///
    /// Returns the [`InvalidTokenError`] of the first failing check.
    pub fn validate(&self, claims: ClaimSet) -> Result<ClaimSet, InvalidTokenError> {
        self.validate_at(claims, Utc::now().timestamp())
    }

    /// Validate against `now` (seconds since the epoch).
    ///
    /// # Errors
    ///
    /// Returns the [`InvalidTokenError`] of the first failing check.
    pub fn validate_at(&self, claims: ClaimSet, now: i64) -> Result<ClaimSet, InvalidTokenError> {
        if is_blank(claims.get("exp")) {
            return Err(InvalidTokenError::MissingExp);
        }

        if is_blank(claims.get("iat")) {
            return Err(InvalidTokenError::MissingIat);
        }

        // Missing and mismatched issuers share one reason
        match claims.issuer() {
            Some(iss) if !iss.is_empty() && self.issuers.iter().any(|i| i == iss) => {}
            _ => return Err(InvalidTokenError::InvalidIss),
        }

        if is_blank(claims.get("aud")) {
            return Err(InvalidTokenError::MissingAud);
        }

        let audience = claims.audience();
        let accepted = |value: &Value| {
            value
                .as_str()
                .is_some_and(|aud| self.audiences.iter().any(|a| a == aud))
        };

        if !audience.iter().any(|&value| accepted(value)) {
            return Err(InvalidTokenError::InvalidAud);
        }

        // Multi-audience tokens must name which of their audiences they were
        // issued to, and that audience must be one we accept
        if audience.len() > 1 {
            match claims.get("azp") {
                Some(azp) if accepted(azp) && audience.contains(&azp) => {}
                _ => return Err(InvalidTokenError::InvalidAzp),
            }
        }

        if let ClockPolicy::Enforce { leeway_secs } = self.clock {
            let leeway = i64::try_from(leeway_secs).unwrap_or(i64::MAX);

            let exp = claims.expires_at().ok_or(InvalidTokenError::InvalidExp)?;
            if exp.saturating_add(leeway) <= now {
                return Err(InvalidTokenError::Expired);
            }

            let iat = claims.issued_at().ok_or(InvalidTokenError::InvalidIat)?;
            if iat.saturating_sub(leeway) > now {
                return Err(InvalidTokenError::IssuedInFuture);
            }
        }

        Ok(claims)
    }
}
