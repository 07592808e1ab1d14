//! OIDC token verification against the cached JWKS.
//!
//! Verification enforces the signature, `exp`, `nbf`, `aud`, and `iss`. The
//! custom Buildkite claims (`job_id`, `organization_slug`, `pipeline_slug`)
//! are deserialized as optional and checked by the handler, which owns the
//! per-claim error messages.

use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::Deserialize;
use tracing::warn;

use crate::{Error, Result};

/// Claims extracted from a verified Buildkite OIDC token.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcClaims {
    /// Audience; may be a single string or an array
    #[serde(default)]
    pub aud: serde_json::Value,
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Buildkite job UUID
    #[serde(default)]
    pub job_id: Option<String>,
    /// Organization the job belongs to
    #[serde(default)]
    pub organization_slug: Option<String>,
    /// Pipeline the job belongs to
    #[serde(default)]
    pub pipeline_slug: Option<String>,
}

/// Verify `token` against `keys` with the expected audience and issuer.
///
/// # Errors
///
/// Returns [`Error::Oidc`] when the token is malformed, signed by an unknown
/// key, expired, not yet valid, or carries the wrong audience or issuer.
pub fn verify(token: &str, keys: &JwkSet, audience: &str, issuer: &str) -> Result<OidcClaims> {
    let header = jsonwebtoken::decode_header(token)?;

    let kid = header.kid.as_deref().ok_or_else(|| {
        Error::Forbidden("cannot verify token: JWT header missing 'kid'".to_string())
    })?;

    let decoding_key = find_key_in_jwks(keys, kid).ok_or_else(|| {
        Error::Forbidden(format!("cannot verify token: no key matches kid {kid}"))
    })?;

    let mut validation = build_validation(&header);
    validation.set_audience(&[audience]);
    validation.set_issuer(&[issuer]);
    validation.validate_nbf = true;

    let data = jsonwebtoken::decode::<OidcClaims>(token, &decoding_key, &validation)?;
    Ok(data.claims)
}

/// Find a JWK by `kid` and convert it to a [`DecodingKey`].
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    Validation::new(alg)
}
