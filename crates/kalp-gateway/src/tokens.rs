use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use kalp_db::Database;
use kalp_types::api::Claims;

/// Tokens are valid for 30 days unless revoked by logout.
const TOKEN_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid or expired token")]
    Invalid,

    #[error("token has been revoked")]
    Revoked,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Issues and validates bearer tokens (HS256 JWTs).
#[derive(Clone)]
pub struct TokenAuthority {
    secret: Arc<str>,
    db: Arc<Database>,
}

impl TokenAuthority {
    pub fn new(secret: &str, db: Arc<Database>) -> Self {
        Self {
            secret: secret.into(),
            db,
        }
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            jti: Uuid::new_v4(),
            exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp()
                as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Check signature, expiry and revocation.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| TokenError::Invalid)?;

        if self.db.is_token_revoked(&token_data.claims.jti.to_string())? {
            return Err(TokenError::Revoked);
        }

        Ok(token_data.claims)
    }

    pub fn revoke(&self, claims: &Claims) -> anyhow::Result<()> {
        self.db.revoke_token(&claims.jti.to_string(), claims.exp as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(secret: &str) -> TokenAuthority {
        TokenAuthority::new(secret, Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_issue_then_verify() {
        let tokens = authority("secret");
        let uid = Uuid::new_v4();
        let token = tokens.issue(uid, "ada").unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, uid);
        assert_eq!(claims.username, "ada");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = authority("one").issue(Uuid::new_v4(), "ada").unwrap();
        assert!(matches!(authority("two").verify(&token), Err(TokenError::Invalid)));
        assert!(matches!(authority("one").verify("not-a-jwt"), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_revoked_token_rejected() {
        let tokens = authority("secret");
        let token = tokens.issue(Uuid::new_v4(), "ada").unwrap();
        let claims = tokens.verify(&token).unwrap();
        tokens.revoke(&claims).unwrap();
        assert!(matches!(tokens.verify(&token), Err(TokenError::Revoked)));

        // A fresh token for the same user is unaffected
        let again = tokens.issue(claims.sub, "ada").unwrap();
        assert!(tokens.verify(&again).is_ok());
    }
}
