//! Principal resolution from request headers. Token validation proper lives
//! with the authentication collaborator; this resolves the static token
//! table from settings and the admin IP allowlist.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use log::warn;

use crate::query::security::Principal;
use crate::settings::Settings;

pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

pub struct Authenticator {
    tokens: HashMap<String, Principal>,
    admin_ips: Vec<IpAddr>,
    partial_update_token: Option<String>,
}

impl Authenticator {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut tokens = HashMap::new();
        for entry in &settings.auth_tokens {
            // token=login or token=login:superuser
            let mut parts = entry.splitn(2, '=');
            let token = parts.next().unwrap_or("").trim();
            let principal = parts.next().unwrap_or("").trim();
            if token.is_empty() || principal.is_empty() {
                warn!("ignoring malformed auth token entry '{}'", entry);
                continue;
            }
            let (login, superuser) = match principal.split_once(':') {
                Some((login, flag)) => (login, flag == "superuser"),
                None => (principal, false),
            };
            tokens.insert(
                token.to_string(),
                Principal {
                    login: login.to_string(),
                    superuser,
                },
            );
        }
        let admin_ips = settings
            .index_admin_ip_allow_list
            .iter()
            .filter_map(|ip| ip.trim().parse().ok())
            .collect();
        Self {
            tokens,
            admin_ips,
            partial_update_token: if settings.partial_update_rest_token.is_empty() {
                None
            } else {
                Some(settings.partial_update_rest_token.clone())
            },
        }
    }

    /// Resolve the principal from `X-Session-Token` or a bearer token.
    pub fn principal(&self, headers: &HeaderMap) -> Option<Principal> {
        let token = headers
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .map(str::to_string)
            })?;
        self.tokens.get(token.trim()).cloned()
    }

    /// Whether `remote` may call the internal admin endpoints.
    pub fn is_admin_ip(&self, remote: &SocketAddr) -> bool {
        self.admin_ips.contains(&remote.ip())
    }

    /// Whether a supplied token authorises privileged partial updates.
    pub fn is_partial_update_token(&self, token: &str) -> bool {
        self.partial_update_token
            .as_deref()
            .map(|t| t == token)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn authenticator() -> Authenticator {
        let mut settings = Settings::default();
        settings.auth_tokens = vec![
            "tok-alice=alice".to_string(),
            "tok-admin=admin:superuser".to_string(),
        ];
        Authenticator::from_settings(&settings)
    }

    #[test]
    fn session_token_header_resolves() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("tok-alice"));
        let principal = auth.principal(&headers).unwrap();
        assert_eq!(principal.login, "alice");
        assert!(!principal.superuser);
    }

    #[test]
    fn bearer_token_resolves_superuser() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-admin"));
        let principal = auth.principal(&headers).unwrap();
        assert!(principal.superuser);
    }

    #[test]
    fn unknown_token_is_anonymous() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("nope"));
        assert!(auth.principal(&headers).is_none());
        assert!(auth.principal(&HeaderMap::new()).is_none());
    }

    #[test]
    fn localhost_is_admin_by_default() {
        let auth = authenticator();
        assert!(auth.is_admin_ip(&"127.0.0.1:9999".parse().unwrap()));
        assert!(!auth.is_admin_ip(&"10.1.2.3:9999".parse().unwrap()));
    }
}
