// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Caller authentication against an OpenID Connect provider.
//!
//! The gate fetches the provider's discovery document and key set once at
//! startup; bearer tokens on `/query` are then verified locally against the
//! cached keys (RS256, issuer and audience pinned). Providers rotate keys,
//! so a long-lived process should periodically [`CallerGate::refresh`].

use std::collections::HashMap;

use jsonwebtoken::{
    decode, decode_header, errors::ErrorKind, jwk::JwkSet, Algorithm, DecodingKey, Validation,
};
use tracing::{info, warn};

use crate::infrastructure::keyring::AuthError;

#[derive(Debug, serde::Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Verifies caller bearer tokens against the provider's rotating key set.
#[derive(Clone)]
pub struct CallerGate {
    keys: HashMap<String, DecodingKey>,
    issuer: String,
    audience: String,
    jwks_uri: String,
}

impl CallerGate {
    /// Run OpenID Connect discovery against `authserver` and build the gate
    /// from the advertised key set.
    pub async fn from_provider(authserver: &str, audience: &str) -> Result<Self, AuthError> {
        let http = reqwest::Client::new();
        let wellknown = format!(
            "{}/.well-known/openid-configuration",
            authserver.trim_end_matches('/')
        );

        let config: DiscoveryDocument = http
            .get(&wellknown)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        let jwks: JwkSet = http
            .get(&config.jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        info!(issuer = %config.issuer, "caller gate configured from provider");
        Ok(Self::from_jwks(
            jwks,
            config.issuer,
            audience.to_string(),
            config.jwks_uri,
        ))
    }

    /// Build the gate from an already-fetched key set.
    pub fn from_jwks(jwks: JwkSet, issuer: String, audience: String, jwks_uri: String) -> Self {
        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                warn!("provider key without a kid; skipping");
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => warn!(%kid, "unusable provider key: {e}"),
            }
        }
        Self {
            keys,
            issuer,
            audience,
            jwks_uri,
        }
    }

    /// Re-fetch the provider key set, picking up rotated keys.
    pub async fn refresh(&mut self) -> Result<(), AuthError> {
        let jwks: JwkSet = reqwest::get(&self.jwks_uri)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        *self = Self::from_jwks(
            jwks,
            self.issuer.clone(),
            self.audience.clone(),
            self.jwks_uri.clone(),
        );
        Ok(())
    }

    /// Verify a caller token: key id known, signature valid, issuer and
    /// audience as configured.
    pub fn verify(&self, token: &str) -> Result<(), AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;
        let key = self
            .keys
            .get(&kid)
            .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<serde_json::Value>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => AuthError::WrongClaims,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;
        Ok(())
    }
}
