use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use super::attribute_model::AttributeModel;
use super::model::{AttributeMap, AttributeValue, Device, DeviceStatusSnapshot, StatusSourceKind};

/// Application identifier of the vendor's mobile app.
pub const APPLICATION_ID: &str = "c3703c4888ec4736a3a0d9425c321604";

const APPLICATION_ID_HEADER: &str = "X-Gizwits-Application-Id";
const USER_TOKEN_HEADER: &str = "X-Gizwits-User-token";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Error codes meaning the account or password is wrong, or the session is invalid.
const INVALID_CREDENTIAL_CODES: [u64; 3] = [9005, 9010, 9020];

/// Cloud region hosting the account.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Us,
    #[default]
    Eu,
    Cn,
}

impl Region {
    /// Returns the production endpoints for this region.
    ///
    /// ```
    /// use jebao::Region;
    ///
    /// let endpoints = Region::Us.endpoints();
    /// assert_eq!("https://usapi.gizwits.com/app/bindings", endpoints.api_url("/app/bindings"));
    /// ```
    #[must_use]
    pub fn endpoints(self) -> CloudEndpoints {
        let (api, login) = match self {
            Self::Us => ("https://usapi.gizwits.com", "https://usaepapp.gizwits.com"),
            Self::Eu => ("https://euapi.gizwits.com", "https://euaepapp.gizwits.com"),
            Self::Cn => ("https://api.gizwits.com", "https://aepapp.gizwits.com"),
        };
        CloudEndpoints::new(api, login)
    }
}

/// Base URLs of the app API and the login API.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CloudEndpoints {
    api_base: String,
    login_base: String,
}

impl CloudEndpoints {
    /// Creates endpoints from explicit base URLs.
    #[must_use]
    pub fn new(api_base: impl Into<String>, login_base: impl Into<String>) -> Self {
        let trim = |base: String| base.trim_end_matches('/').to_string();
        Self {
            api_base: trim(api_base.into()),
            login_base: trim(login_base.into()),
        }
    }

    /// Joins `path` onto the app API base.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    /// Joins `path` onto the login API base.
    #[must_use]
    pub fn login_url(&self, path: &str) -> String {
        format!("{}{path}", self.login_base)
    }
}

/// What a caller should do after a failed login.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RetryAdvice {
    ReenterCredentials,
    RetryLater,
    Fatal,
}

/// Why a login attempt failed.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum LoginFailureReason {
    #[display("invalid credentials")]
    InvalidCredentials,
    #[display("unknown error (HTTP {status}, code {code:?})")]
    Unknown { status: u16, code: Option<u64> },
    #[display("malformed response")]
    MalformedResponse,
    #[display("network failure")]
    Network,
}

impl LoginFailureReason {
    /// Classifies the failure for the caller.
    #[must_use]
    pub fn retry_advice(&self) -> RetryAdvice {
        match self {
            Self::InvalidCredentials => RetryAdvice::ReenterCredentials,
            Self::Unknown { .. } | Self::Network => RetryAdvice::RetryLater,
            Self::MalformedResponse => RetryAdvice::Fatal,
        }
    }
}

/// Errors returned by the cloud client.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud login failed: {reason}")]
    Login { reason: LoginFailureReason },
    #[error("no cloud session; log in first")]
    MissingToken,
    #[error("request to {url} failed")]
    Http {
        url: String,
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("unexpected response from {url}")]
    MalformedResponse {
        url: String,
        source: serde_json::Error,
    },
    #[error("failed to build the HTTP client")]
    Client(#[source] reqwest::Error),
}

impl CloudError {
    /// Returns the login failure reason, if this is a login error.
    #[must_use]
    pub fn login_failure(&self) -> Option<&LoginFailureReason> {
        match self {
            Self::Login { reason } => Some(reason),
            _ => None,
        }
    }
}

/// A device bound to the cloud account.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CloudDevice {
    pub did: String,
    pub product_key: String,
    #[serde(default)]
    pub dev_alias: Option<String>,
    #[serde(default)]
    pub is_online: Option<bool>,
}

impl CloudDevice {
    /// Converts the binding into an inventory entry without a LAN address.
    #[must_use]
    pub fn into_device(self) -> Device {
        Device::new(self.did, self.product_key).with_alias(self.dev_alias)
    }
}

#[derive(Debug, Deserialize)]
struct BindingsResponse {
    #[serde(default)]
    devices: Vec<CloudDevice>,
}

/// Latest attribute values reported to the cloud.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudDeviceData {
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub attr: Map<String, Value>,
}

impl CloudDeviceData {
    /// Interprets the raw attribute values through `model`.
    ///
    /// Attributes missing from the response or of the wrong shape are left out.
    #[must_use]
    pub fn attributes(&self, model: &AttributeModel) -> AttributeMap {
        model
            .attrs
            .iter()
            .filter_map(|descriptor| {
                let raw = self.attr.get(&descriptor.name)?;
                let value = AttributeValue::from_json(descriptor, raw);
                if value.is_none() {
                    trace!(attribute = %descriptor.name, %raw, "ignoring cloud value of unexpected shape");
                }
                Some((descriptor.name.clone(), value?))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(rename = "userToken")]
    user_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<Value>,
}

/// Fetches device status over the vendor cloud.
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Reads the latest cloud-reported status of `device_id`.
    async fn device_status(
        &self,
        device_id: &str,
        model: &AttributeModel,
    ) -> Result<DeviceStatusSnapshot, CloudError>;
}

/// HTTP client for the vendor cloud API.
#[derive(Debug)]
pub struct CloudClient {
    http: reqwest::Client,
    endpoints: CloudEndpoints,
    token: RwLock<Option<String>>,
}

impl CloudClient {
    /// Creates a client for `endpoints` with the default 10 s request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(endpoints: CloudEndpoints) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(CloudError::Client)?;
        Ok(Self {
            http,
            endpoints,
            token: RwLock::new(None),
        })
    }

    /// Reuses a token from an earlier login.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<Option<String>>) -> Self {
        self.token = RwLock::new(token.into());
        self
    }

    /// Returns the current session token.
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Logs in and stores the session token.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Login`] with a classified reason.
    #[instrument(skip(self, password), level = "info")]
    pub async fn login(&self, account: &str, password: &str) -> Result<String, CloudError> {
        let url = self.endpoints.login_url("/app/smart_home/login/pwd");
        let body = json!({
            "appKey": APPLICATION_ID,
            "data": {
                "account": account,
                "password": password,
                "lang": "en",
                "refreshToken": true,
            },
            "version": "1.0",
        });

        let login_error = |reason| CloudError::Login { reason };
        let response = self
            .http
            .post(&url)
            .header(APPLICATION_ID_HEADER, APPLICATION_ID)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                debug!(%error, "login request failed");
                login_error(LoginFailureReason::Network)
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|_error| login_error(LoginFailureReason::Network))?;

        if !status.is_success() {
            return Err(login_error(classify_login_failure(status.as_u16(), &text)));
        }
        let token = serde_json::from_str::<LoginResponse>(&text)
            .ok()
            .and_then(|parsed| parsed.data)
            .and_then(|data| data.user_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| login_error(LoginFailureReason::MalformedResponse))?;

        *self.token.write().await = Some(token.clone());
        debug!("logged in");
        Ok(token)
    }

    /// Lists devices bound to the account.
    ///
    /// # Errors
    ///
    /// Returns an error when not logged in, on transport failure, non-2xx
    /// status, or an unexpected body.
    #[instrument(skip(self), level = "debug")]
    pub async fn devices(&self) -> Result<Vec<CloudDevice>, CloudError> {
        let url = self.endpoints.api_url("/app/bindings");
        let bindings: BindingsResponse = self.get_json(url).await?;
        Ok(bindings.devices)
    }

    /// Fetches the latest attribute values of one device.
    ///
    /// # Errors
    ///
    /// Returns an error when not logged in, on transport failure, non-2xx
    /// status, or an unexpected body.
    #[instrument(skip(self), level = "debug")]
    pub async fn device_data(&self, device_id: &str) -> Result<CloudDeviceData, CloudError> {
        let url = self
            .endpoints
            .api_url(&format!("/app/devdata/{device_id}/latest"));
        self.get_json(url).await
    }

    /// Writes attribute values to one device.
    ///
    /// # Errors
    ///
    /// Returns an error when not logged in, on transport failure, or non-2xx
    /// status.
    #[instrument(skip(self, attributes), level = "info", fields(count = attributes.len()))]
    pub async fn control(
        &self,
        device_id: &str,
        attributes: Map<String, Value>,
    ) -> Result<(), CloudError> {
        let url = self.endpoints.api_url(&format!("/app/control/{device_id}"));
        let token = self.require_token().await?;
        let response = self
            .http
            .post(&url)
            .header(APPLICATION_ID_HEADER, APPLICATION_ID)
            .header(USER_TOKEN_HEADER, token)
            .header(ACCEPT, "application/json")
            .json(&json!({ "attrs": attributes }))
            .send()
            .await
            .map_err(|source| CloudError::Http {
                url: url.clone(),
                source,
            })?;
        read_body(url, response).await.map(|_body| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, CloudError> {
        let token = self.require_token().await?;
        let response = self
            .http
            .get(&url)
            .header(APPLICATION_ID_HEADER, APPLICATION_ID)
            .header(USER_TOKEN_HEADER, token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| CloudError::Http {
                url: url.clone(),
                source,
            })?;
        let body = read_body(url.clone(), response).await?;
        serde_json::from_str(&body).map_err(|source| CloudError::MalformedResponse { url, source })
    }

    async fn require_token(&self) -> Result<String, CloudError> {
        self.token().await.ok_or(CloudError::MissingToken)
    }
}

#[async_trait]
impl CloudTransport for CloudClient {
    async fn device_status(
        &self,
        device_id: &str,
        model: &AttributeModel,
    ) -> Result<DeviceStatusSnapshot, CloudError> {
        let data = self.device_data(device_id).await?;
        Ok(DeviceStatusSnapshot::fresh(
            device_id,
            data.attributes(model),
            StatusSourceKind::Cloud,
        ))
    }
}

async fn read_body(url: String, response: reqwest::Response) -> Result<String, CloudError> {
    let status = response.status();
    let body = response.text().await.map_err(|source| CloudError::Http {
        url: url.clone(),
        source,
    })?;
    trace!(%url, status = status.as_u16(), %body, "cloud response");
    if !status.is_success() {
        return Err(CloudError::Status {
            url,
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

/// Maps a non-2xx login response onto a failure reason.
fn classify_login_failure(status: u16, body: &str) -> LoginFailureReason {
    let code = serde_json::from_str::<ErrorBody>(body)
        .unwrap_or_default()
        .error_code
        .and_then(|code| match code {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        });
    match code {
        Some(code) if INVALID_CREDENTIAL_CODES.contains(&code) => {
            LoginFailureReason::InvalidCredentials
        }
        code => LoginFailureReason::Unknown { status, code },
    }
}
