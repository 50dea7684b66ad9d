//! Server-side captcha verification for the contact form.
//!
//! The secret never leaves the server. Every failure is folded into a
//! rejected [`CaptchaVerdict`] with a user-facing reason; the details go to
//! the log.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::CaptchaConfig;

/// Result of verifying a captcha token.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaVerdict {
    pub ok: bool,
    /// Score from score-based captchas.
    pub score: Option<f64>,
    /// Why the token was rejected.
    pub reason: Option<String>,
}

impl CaptchaVerdict {
    #[must_use]
    pub fn accept(score: Option<f64>) -> Self {
        Self {
            ok: true,
            score,
            reason: None,
        }
    }

    #[must_use]
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            score: None,
            reason: Some(reason.into()),
        }
    }
}

/// Verifies captcha tokens.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Verify `token`, passing the client's address when known.
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> CaptchaVerdict;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// reCAPTCHA-compatible `siteverify` client.
#[derive(Debug, Clone)]
pub struct RecaptchaVerifier {
    client: Client,
    secret: Option<String>,
    verify_url: String,
    min_score: f64,
}

impl RecaptchaVerifier {
    pub fn new(config: &CaptchaConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            secret: config.secret_key.clone(),
            verify_url: config.verify_url.clone(),
            min_score: config.min_score,
        })
    }

    async fn call(
        &self,
        secret: &str,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<CaptchaVerdict, reqwest::Error> {
        let mut form = vec![("secret", secret), ("response", token)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = self.client.post(&self.verify_url).form(&form).send().await?;

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "Captcha API error");
            return Ok(CaptchaVerdict::reject(
                "Captcha verification service unavailable",
            ));
        }

        let data: SiteVerifyResponse = response.json().await?;

        if !data.success {
            let codes = if data.error_codes.is_empty() {
                "unknown".to_string()
            } else {
                data.error_codes.join(", ")
            };
            tracing::warn!(error_codes = %codes, "Captcha verification failed");
            return Ok(CaptchaVerdict::reject("Captcha verification failed"));
        }

        match data.score {
            Some(score) if score < self.min_score => {
                tracing::warn!(score, min_score = self.min_score, "Captcha score too low");
                Ok(CaptchaVerdict {
                    score: Some(score),
                    ..CaptchaVerdict::reject("Suspicious activity detected")
                })
            }
            score => Ok(CaptchaVerdict::accept(score)),
        }
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> CaptchaVerdict {
        let Some(secret) = self.secret.as_deref() else {
            tracing::error!("Captcha secret key not configured");
            return CaptchaVerdict::reject("Server configuration error");
        };

        if token.is_empty() {
            return CaptchaVerdict::reject("Missing captcha token");
        }

        match self.call(secret, token, remote_ip).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::error!(error = %e, "Captcha verification error");
                CaptchaVerdict::reject("Captcha verification failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_secret_rejects() {
        let verifier = RecaptchaVerifier::new(&CaptchaConfig::default()).unwrap();
        let verdict = verifier.verify("token", None).await;
        assert!(!verdict.ok);
        assert_eq!(verdict.reason.as_deref(), Some("Server configuration error"));
    }

    #[tokio::test]
    async fn test_empty_token_rejects_without_network() {
        let verifier = RecaptchaVerifier::new(&CaptchaConfig {
            secret_key: Some("secret".to_string()),
            verify_url: "http://127.0.0.1:9/unreachable".to_string(),
            ..CaptchaConfig::default()
        })
        .unwrap();
        let verdict = verifier.verify("", None).await;
        assert_eq!(verdict.reason.as_deref(), Some("Missing captcha token"));
    }

    #[test]
    fn test_siteverify_response_parsing() {
        let parsed: SiteVerifyResponse = serde_json::from_str(
            r#"{"success": false, "error-codes": ["invalid-input-response"]}"#,
        )
        .unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_codes, vec!["invalid-input-response"]);
        assert!(parsed.score.is_none());
    }
}
