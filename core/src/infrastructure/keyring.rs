// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Result tokens.
//!
//! The keyring makes and checks the short-lived tokens that gate the
//! `/result` family: only the caller that scheduled a process gets its
//! result. Tokens are HS256 over a pre-shared key, which can be randomly
//! generated at startup and handed to every service that needs it.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures across both authentication gates. Each check failing yields its
/// own kind so that handlers can pick 401 vs 403 precisely.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingCredentials,

    #[error("authorization header is not a Bearer token")]
    NotBearer,

    #[error("token rejected: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("token pid does not match the requested process")]
    WrongPid,

    #[error("jwt header carries no key id")]
    MissingKeyId,

    #[error("key id '{0}' not in the provider key set")]
    UnknownKeyId(String),

    #[error("token issuer or audience rejected")]
    WrongClaims,

    #[error("identity provider discovery failed: {0}")]
    Discovery(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultClaims {
    pid: String,
    exp: i64,
}

/// Signs and validates per-process result tokens with a pre-shared key.
#[derive(Clone)]
pub struct Keyring {
    key: Vec<u8>,
}

impl Keyring {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Sign with the default timeout. In practice the only sign entry point
    /// there should be a need for.
    pub fn sign(&self, pid: &str) -> Result<String, AuthError> {
        self.sign_with_expiry(pid, Utc::now() + Duration::minutes(5))
    }

    /// Sign with an explicit expiry. Mostly an implementation detail kept
    /// public for tests (already-expired tokens) and as an escape hatch.
    pub fn sign_with_expiry(&self, pid: &str, exp: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = ResultClaims {
            pid: pid.to_string(),
            exp: exp.timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.key),
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// A token is valid for `pid` when the signature checks out, it has not
    /// expired, and its pid claim equals `pid`. All three run; each failure
    /// has its own error kind.
    pub fn validate(&self, token: &str, pid: &str) -> Result<(), AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<ResultClaims>(
            token,
            &DecodingKey::from_secret(&self.key),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        if data.claims.pid != pid {
            return Err(AuthError::WrongPid);
        }
        Ok(())
    }
}
