// src/auth.rs
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString
    },
    Argon2,
};
use serde::{Deserialize, Serialize};
use jsonwebtoken::{encode, decode, Header, Algorithm, Validation, EncodingKey, DecodingKey};
use chrono::{Utc, Duration};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use crate::{AppError, AppState};
use uuid::Uuid;

// --- 1. 密码处理 (Argon2) ---

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!("密码哈希失败: {}", e);
            AppError::Internal
        })?
        .to_string();
    Ok(password_hash)
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(password_hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok()
}

// --- 2. JWT (Access Token) 处理 ---

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,         // 用户 ID
    pub email: String,
    pub exp: usize,       // 过期时间
}

/// 签发与校验 Access Token 的密钥对，启动时由 JWT_SECRET 构建一次
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// 生成短效的 Access Token (用于 API 请求)
    pub fn create_jwt(&self, user_id: i32, email: &str) -> Result<String, AppError> {
        let expiration = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or(AppError::Internal)?
            .timestamp();

        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            exp: expiration as usize,
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            tracing::error!("JWT 签发失败: {}", e);
            AppError::Internal
        })
    }

    pub fn decode_jwt(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| {
                // 过期或签名错误统一返回 401，前端拦截器据此刷新 Token
                tracing::warn!("JWT 验证失败: {}", e);
                AppError::Auth("Token expired or invalid".into())
            })
    }
}

// --- 3. Refresh Token / 重置密码 Token ---

/// 生成唯一的随机字符串作为刷新令牌或重置令牌
pub fn generate_opaque_token() -> String {
    Uuid::new_v4().to_string()
}

// --- 4. 核心：认证提取器 (AuthUser Extractor) ---
// 用于在 Handler 中通过 (user: AuthUser) 自动获取当前登录用户

#[derive(Debug)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 1. 从 HTTP Header 提取 Bearer Token
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Auth("Missing or malformed token".into()))?;

        // 2. 验证 Token 有效性
        let state = AppState::from_ref(state);
        let claims = state.keys.decode_jwt(bearer.token())?;

        // 3. 验证通过，构建 AuthUser
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn jwt_carries_user_identity() {
        let keys = JwtKeys::new("test-secret", 15);
        let token = keys.create_jwt(42, "ada@example.com").unwrap();
        let claims = keys.decode_jwt(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "ada@example.com");
    }

    #[test]
    fn jwt_signed_with_other_secret_is_rejected() {
        let token = JwtKeys::new("one", 15).create_jwt(1, "a@b.c").unwrap();
        let err = JwtKeys::new("two", 15).decode_jwt(&token).unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn expired_jwt_is_rejected() {
        // 默认 leeway 为 60 秒，这里直接签发 10 分钟前过期的 token
        let keys = JwtKeys::new("secret", -10);
        let token = keys.create_jwt(7, "old@example.com").unwrap();
        assert!(keys.decode_jwt(&token).is_err());
    }

    #[test]
    fn opaque_tokens_are_unique() {
        assert_ne!(generate_opaque_token(), generate_opaque_token());
    }
}
