//! JWT 令牌服务

use application::{TokenClaims, TokenError, TokenService};
use chrono::{DateTime, Duration, Utc};
use config::JwtConfig;
use domain::{UserId, UserRole};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    email: String,
    role: UserRole,
    iat: i64,
    exp: i64,
    iss: String,
}

/// HS256 签名的令牌服务
#[derive(Clone)]
pub struct JwtTokenService {
    issuer: String,
    ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenService {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        Self {
            issuer: config.issuer.clone(),
            ttl: Duration::hours(config.expiration_hours),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|err| TokenError::Generation(err.to_string()))
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| TokenError::Invalid(format!("时间戳超出范围: {secs}")))
}

impl TokenService for JwtTokenService {
    fn issue(&self, user_id: UserId, email: &str, role: UserRole) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.into(),
            email: email.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        self.sign(&claims)
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(err.to_string()),
            },
        )?;
        let claims = data.claims;

        Ok(TokenClaims {
            user_id: UserId::from(claims.sub),
            email: claims.email,
            role: claims.role,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }
}
