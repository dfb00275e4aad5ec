// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bearer tokens for EKS API servers, minted from a presigned STS
//! GetCallerIdentity request and refreshed in the background.

use crate::config::env::{EnvBinding, Field};
use crate::constants::eks::{
    CLUSTER_ID_HEADER, PRESIGN_EXPIRY, REFRESH_MARGIN, TOKEN_EXPIRY, TOKEN_PREFIX,
};
use crate::error::{Result, TesterError};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::header::{HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Connection details for an EKS cluster reached without a kubeconfig.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EksSettings {
    pub region: String,
    pub cluster_name: String,
    pub cluster_api_server_endpoint: String,
    /// PEM encoded cluster CA bundle
    pub cluster_ca_decoded: String,
}

impl EksSettings {
    pub fn is_complete(&self) -> bool {
        !self.region.is_empty()
            && !self.cluster_name.is_empty()
            && !self.cluster_api_server_endpoint.is_empty()
    }
}

impl EnvBinding for EksSettings {
    fn env_fields(&mut self) -> Vec<Field<'_>> {
        vec![
            Field::string("region", &mut self.region),
            Field::string("cluster_name", &mut self.cluster_name),
            Field::string("cluster_api_server_endpoint", &mut self.cluster_api_server_endpoint),
            Field::string("cluster_ca_decoded", &mut self.cluster_ca_decoded),
        ]
    }
}

/// Build the `k8s-aws-v1.` token for `cluster_name` from `credentials`.
pub fn presign_token(
    credentials: &Credentials,
    region: &str,
    cluster_name: &str,
    now: SystemTime,
) -> Result<String> {
    let sts_url = format!("https://sts.{region}.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15");

    let identity: Identity = credentials.clone().into();
    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(PRESIGN_EXPIRY);

    let params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("sts")
        .time(now)
        .settings(settings)
        .build()
        .map_err(|e| TesterError::EksToken(format!("invalid signing params: {e}")))?
        .into();

    let headers = [(CLUSTER_ID_HEADER, cluster_name)];
    let signable = SignableRequest::new("GET", sts_url.as_str(), headers.into_iter(), SignableBody::Bytes(&[]))
        .map_err(|e| TesterError::EksToken(format!("invalid request: {e}")))?;
    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| TesterError::EksToken(format!("signing failed: {e}")))?
        .into_parts();
    let (_headers, query) = instructions.into_parts();

    let mut presigned = Url::parse(&sts_url)
        .map_err(|e| TesterError::EksToken(format!("invalid STS url: {e}")))?;
    {
        let mut pairs = presigned.query_pairs_mut();
        for (key, value) in &query {
            pairs.append_pair(key, value);
        }
    }

    Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(presigned.as_str())))
}

struct Minter {
    provider: SharedCredentialsProvider,
    region: String,
    cluster_name: String,
}

impl Minter {
    async fn mint(&self) -> Result<(String, Instant)> {
        let credentials = self
            .provider
            .provide_credentials()
            .await
            .map_err(|e| TesterError::EksToken(format!("failed to load AWS credentials: {e}")))?;
        let token = presign_token(&credentials, &self.region, &self.cluster_name, SystemTime::now())?;
        Ok((token, Instant::now() + TOKEN_EXPIRY))
    }
}

/// Shared view on the current token. Cloning is cheap; the refresh task stops
/// once every clone is dropped.
#[derive(Clone)]
pub struct TokenSource {
    current: watch::Receiver<String>,
}

impl TokenSource {
    /// Mint the first token and start refreshing it ahead of expiry.
    pub async fn start(settings: &EksSettings) -> Result<Self> {
        let sdk = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;
        let provider = sdk
            .credentials_provider()
            .ok_or_else(|| TesterError::EksToken("no AWS credentials provider available".to_string()))?;

        let minter = Minter {
            provider,
            region: settings.region.clone(),
            cluster_name: settings.cluster_name.clone(),
        };
        let (token, expires_at) = minter.mint().await?;
        info!(cluster = %settings.cluster_name, "minted EKS token");

        let (tx, rx) = watch::channel(token);
        tokio::spawn(refresh(minter, tx, expires_at));
        Ok(Self { current: rx })
    }

    #[cfg(test)]
    pub(crate) fn fixed(token: &str) -> Self {
        let (_, rx) = watch::channel(token.to_string());
        Self { current: rx }
    }

    /// Attach the current token as a bearer credential.
    pub fn authorize<B>(&self, mut req: http::Request<B>) -> http::Request<B> {
        let token = self.current.borrow().clone();
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                req.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "EKS token is not a valid header value"),
        }
        req
    }
}

async fn refresh(minter: Minter, tx: watch::Sender<String>, mut expires_at: Instant) {
    loop {
        let wake = expires_at.checked_sub(REFRESH_MARGIN).unwrap_or_else(Instant::now);
        tokio::select! {
            _ = tx.closed() => {
                debug!("EKS token source dropped, stopping refresh");
                return;
            }
            _ = sleep_until(wake) => {}
        }

        match minter.mint().await {
            Ok((token, next_expiry)) => {
                debug!(cluster = %minter.cluster_name, "refreshed EKS token");
                expires_at = next_expiry;
                if tx.send(token).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to refresh EKS token, retrying shortly");
                expires_at = Instant::now() + REFRESH_MARGIN + Duration::from_secs(30);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", None, None, "test")
    }

    fn decode(token: &str) -> String {
        let encoded = token.strip_prefix(TOKEN_PREFIX).unwrap();
        String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_presign_token_shape() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let token = presign_token(&credentials(), "us-west-2", "demo", now).unwrap();

        assert!(token.starts_with(TOKEN_PREFIX));
        assert!(!token.contains('='));

        let url = decode(&token);
        assert!(url.starts_with("https://sts.us-west-2.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15"));
        assert!(url.contains("X-Amz-Expires=60"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("x-k8s-aws-id"));
    }

    #[test]
    fn test_presign_token_is_deterministic_for_fixed_time() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let a = presign_token(&credentials(), "us-west-2", "demo", now).unwrap();
        let b = presign_token(&credentials(), "us-west-2", "demo", now).unwrap();
        let other = presign_token(&credentials(), "us-west-2", "other", now).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn test_authorize_sets_bearer_header() {
        let source = TokenSource::fixed("k8s-aws-v1.abc");
        let req = source.authorize(http::Request::new(()));
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer k8s-aws-v1.abc");
    }

    #[test]
    fn test_settings_complete() {
        let mut settings = EksSettings::default();
        assert!(!settings.is_complete());
        settings.region = "us-west-2".to_string();
        settings.cluster_name = "demo".to_string();
        settings.cluster_api_server_endpoint = "https://demo.eks.amazonaws.com".to_string();
        assert!(settings.is_complete());
    }
}
