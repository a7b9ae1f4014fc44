//! S3 target: uploads each artifact under its file name with a SigV4-signed `PUT`.
//!
//! Works against AWS and S3-compatible services (MinIO, Ceph, ...) via
//! `CRONOHUB_S3_ENDPOINT`, which switches to path-style addressing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronohub_core::contract::{
    require_env, ArchiveItem, ArchiveReport, PluginContext, PluginRole, TargetPlugin,
};
use cronohub_core::error::PluginError;
use cronohub_core::fetch::http_client;
use cronohub_core::retry::{run_with_retry, RetryPolicy};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{basename, ensure_success, env_value, missing_env};

pub const NAME: &str = "s3";
pub const BUCKET_ENV: &str = "CRONOHUB_S3_BUCKETNAME";
pub const ENDPOINT_ENV: &str = "CRONOHUB_S3_ENDPOINT";
pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";
pub const REGION_ENV: &str = "AWS_REGION";
const DEFAULT_REGION: &str = "us-east-1";

type HmacSha256 = Hmac<Sha256>;

pub fn factory(context: &PluginContext) -> Box<dyn TargetPlugin> {
    Box::new(S3Target {
        timeout: context.fetch.timeout,
        retry: context.fetch.retry,
    })
}

pub struct S3Target {
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, PluginError> {
        Ok(Self {
            access_key_id: env_value(ACCESS_KEY_ENV).ok_or_else(|| missing_env(ACCESS_KEY_ENV))?,
            secret_access_key: env_value(SECRET_KEY_ENV)
                .ok_or_else(|| missing_env(SECRET_KEY_ENV))?,
            session_token: env_value(SESSION_TOKEN_ENV),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    /// Custom endpoint, e.g. `http://localhost:9000`.
    pub endpoint: Option<String>,
}

impl Bucket {
    fn from_env() -> Result<Self, PluginError> {
        Ok(Self {
            name: env_value(BUCKET_ENV).ok_or_else(|| missing_env(BUCKET_ENV))?,
            region: env_value(REGION_ENV).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: env_value(ENDPOINT_ENV),
        })
    }

    /// Request URL, `Host` header value and canonical URI for `key`.
    pub fn object_location(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let canonical_uri = format!("/{}/{}", uri_encode(&self.name), encoded_key);
                (
                    format!("{scheme}://{host}{canonical_uri}"),
                    host,
                    canonical_uri,
                )
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.name, self.region);
                let canonical_uri = format!("/{encoded_key}");
                (format!("https://{host}{canonical_uri}"), host, canonical_uri)
            }
        }
    }
}

impl S3Target {
    async fn put(
        &self,
        client: &reqwest::Client,
        bucket: &Bucket,
        credentials: &AwsCredentials,
        item: &ArchiveItem,
    ) -> Result<(), PluginError> {
        let key = basename(&item.location)?;
        let body = tokio::fs::read(&item.location).await?;
        let payload_hash = hex_sha256(&body);
        let (url, host, canonical_uri) = bucket.object_location(&key);

        run_with_retry(&self.retry, &item.name, |_| {
            let headers = sign_put(
                credentials,
                &bucket.region,
                &host,
                &canonical_uri,
                &payload_hash,
                Utc::now(),
            );
            let request = headers.map(|headers| {
                headers
                    .into_iter()
                    .filter(|(name, _)| name != "host")
                    .fold(client.put(&url).body(body.clone()), |req, (name, value)| {
                        req.header(name, value)
                    })
            });
            async move {
                let response = request?.send().await?;
                ensure_success(NAME, response).await.map(|_| ())
            }
        })
        .await?;
        debug!(key = %key, bucket = %bucket.name, "Uploaded object");
        Ok(())
    }
}

#[async_trait]
impl TargetPlugin for S3Target {
    async fn validate(&self) -> bool {
        // Report every missing variable, not just the first.
        let bucket = require_env(PluginRole::Target, NAME, BUCKET_ENV).is_some();
        let access = require_env(PluginRole::Target, NAME, ACCESS_KEY_ENV).is_some();
        let secret = require_env(PluginRole::Target, NAME, SECRET_KEY_ENV).is_some();
        bucket && access && secret
    }

    fn help(&self) -> String {
        format!(
            "Help (s3 target plugin):\n  \
             {BUCKET_ENV}: bucket to upload archives to (objects are named after the file).\n  \
             {ACCESS_KEY_ENV}, {SECRET_KEY_ENV}: credentials; {SESSION_TOKEN_ENV} optional.\n  \
             {REGION_ENV}: bucket region (default {DEFAULT_REGION}).\n  \
             {ENDPOINT_ENV}: optional endpoint of an S3-compatible service."
        )
    }

    async fn archive(&self, items: Vec<ArchiveItem>) -> Result<ArchiveReport, PluginError> {
        let bucket = Bucket::from_env()?;
        let credentials = AwsCredentials::from_env()?;
        let client = http_client(self.timeout)?;

        let mut report = ArchiveReport::default();
        for item in items {
            info!(name = %item.name, file = %item.location, bucket = %bucket.name, "Uploading to S3");
            let outcome = self.put(&client, &bucket, &credentials, &item).await;
            if let Err(e) = &outcome {
                warn!(name = %item.name, error = %e, "S3 upload failed");
            }
            report.record(item, outcome);
        }
        Ok(report)
    }
}

// ============ AWS SigV4 ============

/// Headers (lower-case names, `authorization` included) for a signed S3 `PUT`.
pub fn sign_put(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, PluginError> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();
    let canonical_request = format!(
        "PUT\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let credential_scope = format!("{date_stamp}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );
    let signing_key =
        derive_signing_key(&credentials.secret_access_key, &date_stamp, region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    ));
    Ok(headers)
}

pub fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PluginError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PluginError::Configuration(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, PluginError> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
pub fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}
