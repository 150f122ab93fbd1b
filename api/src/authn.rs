//! Caller authentication
//!
//! Requests carry a bearer identity token; the verifier yields a principal
//! (email) for the authorization layer. Signature validation belongs to the
//! identity provider integration, which sits outside the core; the claims
//! decode is what the core consumes.

use appctl::errors::Error;
use appctl::server::auth::bearer_token;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl Claims {
    pub fn principal_email(&self) -> String {
        self.email
            .clone()
            .or_else(|| self.sub.clone())
            .unwrap_or_default()
    }
}

pub fn principal_urn(email: &str) -> String {
    format!("urn:user:{email}")
}

/// Authenticate a request from its Authorization header. With authn
/// disabled everything passes, with an anonymous principal when no usable
/// token is attached.
pub fn authenticate(cfg: &Config, headers: &HeaderMap) -> Result<Claims, Error> {
    let token = bearer_token(headers);

    if !cfg.authn_enabled {
        warn!("Authentication disabled, no login is required!");
        return Ok(token
            .and_then(|token| decode_claims(&token).ok())
            .unwrap_or(Claims {
                email: Some("anonymous".to_string()),
                sub: None,
            }));
    }

    let Some(token) = token else {
        return Err(Error::Authentication("Authorization header missing".into()));
    };
    let claims = decode_claims(&token)
        .map_err(|e| Error::Authentication(format!("bearer token could not be parsed: {e}")))?;
    if claims.principal_email().is_empty() {
        return Err(Error::Authentication(
            "token carries no usable principal".into(),
        ));
    }
    Ok(claims)
}

/// Decode the claims segment of a JWT. The signature is checked by the
/// identity provider boundary, not here.
pub fn decode_claims(token: &str) -> Result<Claims, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(b""), &validation)
        .map_err(|e| Error::Authentication(format!("failed to decode token: {e}")))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::Engine;

    fn jwt_with_claims(claims: &str) -> String {
        let b64 = |s: &str| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s);
        format!(
            "{}.{}.{}",
            b64(r#"{"alg":"HS256","typ":"JWT"}"#),
            b64(claims),
            b64("sig")
        )
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_decode_extracts_email() {
        let token = jwt_with_claims(r#"{"email":"dev@arryved.com","aud":"x"}"#);
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.principal_email(), "dev@arryved.com");
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let cfg = Config::default();
        assert!(authenticate(&cfg, &HeaderMap::new()).is_err());
    }

    #[test]
    fn test_garbage_token_is_unauthenticated() {
        let cfg = Config::default();
        assert!(authenticate(&cfg, &headers_with("not-a-jwt")).is_err());
    }

    #[test]
    fn test_disabled_authn_passes_with_anonymous() {
        let cfg = Config {
            authn_enabled: false,
            ..Config::default()
        };
        let claims = authenticate(&cfg, &HeaderMap::new()).unwrap();
        assert_eq!(claims.principal_email(), "anonymous");
    }

    #[test]
    fn test_principal_urn_shape() {
        assert_eq!(principal_urn("dev@arryved.com"), "urn:user:dev@arryved.com");
    }
}
