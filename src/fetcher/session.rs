//! Authenticated session against the Azure File service
//!
//! Requests are signed with the Shared Key scheme: an HMAC-SHA256 over a
//! canonical description of the request, keyed with the decoded account key.

use super::ranges::{ByteRange, ContentRange, parse_content_range};
use crate::config::{Credentials, FetchConfig, STORAGE_ACCOUNT_ENV, STORAGE_ACCOUNT_KEY_ENV};
use crate::error::{Error, FetchError, Result};
use crate::locator::ContextAddress;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// A short-lived, per-fetch handle binding credentials to one file URL.
///
/// Built fresh for every fetch and never cached: the account or key may
/// change between builds.
pub struct FetchSession {
    client: reqwest::Client,
    account: String,
    signer: HmacSha256,
    url: Url,
    canonical_resource: String,
    api_version: String,
}

/// Body of one range response
#[derive(Debug)]
pub(crate) struct RangeResponse {
    /// Size of the whole remote object
    pub(crate) total_size: u64,
    /// Bytes returned
    pub(crate) body: Bytes,
    /// The server ignored the range and sent the whole object
    pub(crate) whole_object: bool,
}

impl FetchSession {
    /// Build a session for `address`
    ///
    /// Fails with a configuration error if the account name is unusable or
    /// the key is not valid base64. These are never retried.
    pub fn new(
        credentials: &Credentials,
        address: &ContextAddress,
        config: &FetchConfig,
    ) -> Result<Self> {
        let account = credentials.account();
        let key = STANDARD.decode(credentials.key()).map_err(|e| {
            Error::config(
                STORAGE_ACCOUNT_KEY_ENV,
                format!("account key is not valid base64: {e}"),
            )
        })?;
        let signer = HmacSha256::new_from_slice(&key).map_err(|e| {
            Error::config(STORAGE_ACCOUNT_KEY_ENV, format!("unusable account key: {e}"))
        })?;

        let url = resource_url(account, address, config)?;
        let canonical_resource = format!("/{}{}", account, url.path());

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self {
            client,
            account: account.to_string(),
            signer,
            url,
            canonical_resource,
            api_version: config.api_version.clone(),
        })
    }

    /// The file URL this session reads from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// GET one byte range of the file
    pub(crate) async fn get_range(
        &self,
        range: ByteRange,
    ) -> std::result::Result<RangeResponse, FetchError> {
        let mut ms_headers = BTreeMap::new();
        ms_headers.insert("x-ms-date", rfc1123_now());
        ms_headers.insert("x-ms-range", range.header_value());
        ms_headers.insert("x-ms-version", self.api_version.clone());

        let signature = self.sign(&string_to_sign("GET", &ms_headers, &self.canonical_resource));

        let mut request = self.client.get(self.url.clone());
        for (name, value) in &ms_headers {
            request = request.header(*name, value.as_str());
        }
        let response = request
            .header(AUTHORIZATION, format!("SharedKey {}:{}", self.account, signature))
            .send()
            .await?;

        let status = response.status();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match status {
            StatusCode::PARTIAL_CONTENT => {
                let total_size = match content_range.as_deref().and_then(parse_content_range) {
                    Some(ContentRange::Satisfied { range: got, total }) if got.start == range.start => {
                        total
                    }
                    _ => return Err(self.invalid_content_range(content_range)),
                };
                let body = response.bytes().await?;
                Ok(RangeResponse {
                    total_size,
                    body,
                    whole_object: false,
                })
            }
            StatusCode::OK => {
                let body = response.bytes().await?;
                Ok(RangeResponse {
                    total_size: body.len() as u64,
                    body,
                    whole_object: true,
                })
            }
            // An empty file cannot satisfy any range
            StatusCode::RANGE_NOT_SATISFIABLE
                if matches!(
                    content_range.as_deref().and_then(parse_content_range),
                    Some(ContentRange::Unsatisfied { total: 0 })
                ) =>
            {
                Ok(RangeResponse {
                    total_size: 0,
                    body: Bytes::new(),
                    whole_object: true,
                })
            }
            _ => {
                let code = response
                    .headers()
                    .get(ERROR_CODE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Err(FetchError::Status {
                    status: status.as_u16(),
                    url: self.url.to_string(),
                    code,
                })
            }
        }
    }

    pub(crate) fn invalid_content_range(&self, value: Option<String>) -> FetchError {
        FetchError::InvalidContentRange {
            url: self.url.to_string(),
            value,
        }
    }

    fn sign(&self, string_to_sign: &str) -> String {
        let mut mac = self.signer.clone();
        mac.update(string_to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for FetchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSession")
            .field("account", &self.account)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Build `https://{account}.{service_domain}/{container}/{item}`, or the same
/// path under the configured endpoint override.
pub fn resource_url(account: &str, address: &ContextAddress, config: &FetchConfig) -> Result<Url> {
    if account.is_empty() || !account.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(Error::config(
            STORAGE_ACCOUNT_ENV,
            format!("invalid storage account name {account:?}"),
        ));
    }

    let mut url = match &config.endpoint {
        Some(endpoint) => endpoint.clone(),
        None => Url::parse(&format!("https://{}.{}", account, config.service_domain)).map_err(
            |e| {
                Error::config(
                    "fetch.service_domain",
                    format!("invalid service domain {:?}: {e}", config.service_domain),
                )
            },
        )?,
    };

    url.path_segments_mut()
        .map_err(|()| Error::config("fetch.endpoint", "endpoint URL cannot carry a path"))?
        .pop_if_empty()
        .push(address.container())
        .extend(address.item().split('/'));

    Ok(url)
}

/// Canonical string signed by Shared Key for the File service.
///
/// The eleven standard header slots (Content-Encoding through Range) stay
/// empty: every value this client sends travels in an `x-ms-*` header.
pub(crate) fn string_to_sign(
    verb: &str,
    ms_headers: &BTreeMap<&str, String>,
    canonical_resource: &str,
) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(verb);
    out.push('\n');
    out.push_str(&"\n".repeat(11));
    for (name, value) in ms_headers {
        out.push_str(&name.to_ascii_lowercase());
        out.push(':');
        out.push_str(value.trim());
        out.push('\n');
    }
    out.push_str(canonical_resource);
    out
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
