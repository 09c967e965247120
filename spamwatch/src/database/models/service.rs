//! Spam detection services, device gateways, API services and keywords.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// A caller-ID provider/channel, identified by a stable code.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpamServiceDbModel {
    pub code: String,
    pub name: String,
    /// Android package of the provider app, used by device gateways.
    pub app_package: Option<String>,
    pub is_custom: bool,
    pub created_at: i64,
}

impl SpamServiceDbModel {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            app_package: None,
            is_custom: false,
            created_at: now_ms(),
        }
    }

    pub fn with_app_package(mut self, package: impl Into<String>) -> Self {
        self.app_package = Some(package.into());
        self
    }
}

/// Connectivity status of a device gateway.
///
/// `Checking` is never stored; it is derived from the gateway lock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Offline,
    Online,
    Restarting,
    Checking,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Restarting => "restarting",
            Self::Checking => "checking",
        }
    }
}

/// One controllable Android endpoint bound to a single spam service.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayDbModel {
    pub id: String,
    pub name: String,
    pub service_code: String,
    pub container_name: String,
    pub host: String,
    pub adb_port: i64,
    pub status: String,
    pub is_active: bool,
    pub last_status_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GatewayDbModel {
    pub fn new(
        name: impl Into<String>,
        service_code: impl Into<String>,
        host: impl Into<String>,
        adb_port: i64,
    ) -> Self {
        let now = now_ms();
        let name = name.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            container_name: name.clone(),
            name,
            service_code: service_code.into(),
            host: host.into(),
            adb_port,
            status: GatewayStatus::Online.as_str().to_string(),
            is_active: true,
            last_status_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// ADB serial (`host:port`) used to address the device.
    pub fn serial(&self) -> String {
        format!("{}:{}", self.host, self.adb_port)
    }

    pub fn status(&self) -> GatewayStatus {
        self.status.parse().unwrap_or(GatewayStatus::Offline)
    }
}

/// An HTTP detection endpoint bound to a spam service.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiServiceDbModel {
    pub id: String,
    pub name: String,
    pub service_code: String,
    pub method: String,
    /// URL with `{phone}` placeholders.
    pub url_template: String,
    /// JSON object of header name to value template.
    pub headers: String,
    pub body_template: Option<String>,
    /// JSON pointer (or dotted path) to the text to match keywords against.
    pub text_path: Option<String>,
    /// JSON pointer (or dotted path) to a list of provider-supplied labels.
    pub keywords_path: Option<String>,
    pub timeout_secs: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ApiServiceDbModel {
    pub fn new(
        name: impl Into<String>,
        service_code: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            service_code: service_code.into(),
            method: "GET".to_string(),
            url_template: url_template.into(),
            headers: "{}".to_string(),
            body_template: None,
            text_path: None,
            keywords_path: None,
            timeout_secs: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A spam keyword; `service_code = None` means global.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordDbModel {
    pub id: String,
    pub keyword: String,
    pub service_code: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

impl KeywordDbModel {
    pub fn new(keyword: impl Into<String>, service_code: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            keyword: keyword.into(),
            service_code,
            is_active: true,
            created_at: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_status_parse() {
        assert_eq!("online".parse::<GatewayStatus>().unwrap(), GatewayStatus::Online);
        assert_eq!(GatewayStatus::Restarting.to_string(), "restarting");
        let mut gw = GatewayDbModel::new("gw-1", "truecaller", "10.0.0.5", 5555);
        gw.status = "garbage".to_string();
        assert_eq!(gw.status(), GatewayStatus::Offline);
        assert_eq!(gw.serial(), "10.0.0.5:5555");
    }
}
