use std::time::Duration;

use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CubeConfig;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Signing secret is empty")]
    EmptySecret,
    #[error("Failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("Invalid token: {0}")]
    InvalidToken(jsonwebtoken::errors::Error),
}

/// Claim set carried by analytics API tokens. Both claims are absent when no TTL is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Mints HS256 bearer tokens for the analytics API.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Option<Duration>,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Option<Duration>) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        })
    }

    pub fn from_config(config: &CubeConfig) -> Result<Self, AuthError> {
        Self::new(&config.api_secret, config.token_ttl())
    }

    pub fn mint(&self) -> Result<String, AuthError> {
        let claims = match self.ttl {
            Some(ttl) => {
                let now = get_current_timestamp();
                TokenClaims {
                    iat: Some(now),
                    exp: Some(now + ttl.as_secs()),
                }
            }
            None => TokenClaims::default(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(AuthError::Signing)
    }

    /// Validates `token` under HS256 with this signer's secret.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.leeway = 0;
        decode::<TokenClaims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_with_same_secret() {
        let signer = TokenSigner::new("simple-secret", Some(Duration::from_secs(60))).unwrap();
        let token = signer.mint().unwrap();
        let claims = signer.verify(&token).unwrap();
        let (iat, exp) = (claims.iat.unwrap(), claims.exp.unwrap());
        assert_eq!(exp - iat, 60);
    }

    #[test]
    fn test_token_rejected_with_other_secret() {
        let signer = TokenSigner::new("simple-secret", None).unwrap();
        let other = TokenSigner::new("another-secret", None).unwrap();
        let token = signer.mint().unwrap();
        assert!(matches!(
            other.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_no_ttl_mints_empty_claim_set() {
        let signer = TokenSigner::new("simple-secret", None).unwrap();
        let token = signer.mint().unwrap();
        assert_eq!(signer.verify(&token).unwrap(), TokenClaims::default());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let signer = TokenSigner::new("simple-secret", None).unwrap();
        let token = signer
            .sign(&TokenClaims {
                iat: Some(1_000),
                exp: Some(1_060),
            })
            .unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(matches!(
            TokenSigner::new("", None),
            Err(AuthError::EmptySecret)
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let signer = TokenSigner::new("very-secret", None).unwrap();
        assert!(!format!("{signer:?}").contains("very-secret"));
    }
}
