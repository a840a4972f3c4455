use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Request stage carried in `threeDSInfo`. Answers are told apart by their
/// shape instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreeDsInfo {
    CardData,
    AuthenticationData,
    ChallengeResponse,
}

/// Whether the 3DS method step reported back in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreeDsCompInd {
    /// Completed.
    Y,
    /// Not completed.
    N,
    /// Method not available.
    U,
}

impl ThreeDsCompInd {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Y" => Some(Self::Y),
            "N" => Some(Self::N),
            "U" => Some(Self::U),
            _ => None,
        }
    }

    /// Reads a webhook value; anything unrecognised counts as not completed.
    pub fn from_notification(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::N)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Y => "Y",
            Self::N => "N",
            Self::U => "U",
        }
    }
}

impl fmt::Display for ThreeDsCompInd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 3DS protocol versions this client can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum ProtocolVersion {
    V2_1_0,
    V2_2_0,
    /// Card not enrolled in 3DS2; authorize without an EMV3DS block.
    Legacy,
}

impl ProtocolVersion {
    pub const LEGACY_TAG: &'static str = "NO_3DS_v2";

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "2.1.0" => Some(Self::V2_1_0),
            "2.2.0" => Some(Self::V2_2_0),
            Self::LEGACY_TAG => Some(Self::Legacy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2_1_0 => "2.1.0",
            Self::V2_2_0 => "2.2.0",
            Self::Legacy => Self::LEGACY_TAG,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy)
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.as_str().to_string()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser fingerprint sent with the authentication step.
///
/// Passed in explicitly by the caller, which is the only party that sees the
/// cardholder's HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserInfo {
    pub accept_header: String,
    pub user_agent: String,
    pub language: String,
    pub color_depth: u8,
    pub screen_height: u32,
    pub screen_width: u32,
    /// Minutes offset from UTC as reported by the browser.
    pub time_zone: i32,
    pub java_enabled: bool,
    pub javascript_enabled: bool,
}

impl BrowserInfo {
    pub fn new(accept_header: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            accept_header: accept_header.into(),
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }
}

impl Default for BrowserInfo {
    fn default() -> Self {
        Self {
            accept_header: String::new(),
            user_agent: String::new(),
            language: "es-ES".to_string(),
            color_depth: 24,
            screen_height: 1250,
            screen_width: 1320,
            time_zone: 52,
            java_enabled: false,
            javascript_enabled: true,
        }
    }
}

/// `Ds_Merchant_EMV3DS` request block.
///
/// Fields are declared in ascending byte order of their wire names, which is
/// the order they are serialized in. Unset fields are left out entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Emv3ds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_accept_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_color_depth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_java_enabled: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_javascript_enabled: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_screen_height: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_screen_width: Option<String>,
    #[serde(rename = "browserTZ", skip_serializing_if = "Option::is_none")]
    pub browser_tz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cres: Option<String>,
    #[serde(rename = "notificationURL", skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(rename = "threeDSCompInd", skip_serializing_if = "Option::is_none")]
    pub three_ds_comp_ind: Option<ThreeDsCompInd>,
    #[serde(rename = "threeDSInfo")]
    pub three_ds_info: ThreeDsInfo,
    #[serde(rename = "threeDSServerTransID", skip_serializing_if = "Option::is_none")]
    pub three_ds_server_trans_id: Option<String>,
}

impl Emv3ds {
    fn stage(three_ds_info: ThreeDsInfo) -> Self {
        Self {
            browser_accept_header: None,
            browser_color_depth: None,
            browser_java_enabled: None,
            browser_javascript_enabled: None,
            browser_language: None,
            browser_screen_height: None,
            browser_screen_width: None,
            browser_tz: None,
            browser_user_agent: None,
            cres: None,
            notification_url: None,
            protocol_version: None,
            three_ds_comp_ind: None,
            three_ds_info,
            three_ds_server_trans_id: None,
        }
    }

    /// First request of a purchase: asks the gateway for the card's 3DS setup.
    pub fn card_data() -> Self {
        Self::stage(ThreeDsInfo::CardData)
    }

    /// Authentication request sent once the 3DS method step is settled.
    pub fn authentication(
        protocol_version: ProtocolVersion,
        three_ds_server_trans_id: &str,
        comp_ind: ThreeDsCompInd,
        notification_url: &Url,
        browser: &BrowserInfo,
    ) -> Self {
        Self {
            browser_accept_header: Some(browser.accept_header.clone()),
            browser_color_depth: Some(browser.color_depth.to_string()),
            browser_java_enabled: Some(browser.java_enabled.to_string()),
            browser_javascript_enabled: Some(browser.javascript_enabled.to_string()),
            browser_language: Some(browser.language.clone()),
            browser_screen_height: Some(browser.screen_height.to_string()),
            browser_screen_width: Some(browser.screen_width.to_string()),
            browser_tz: Some(browser.time_zone.to_string()),
            browser_user_agent: Some(browser.user_agent.clone()),
            notification_url: Some(notification_url.to_string()),
            protocol_version: Some(protocol_version.to_string()),
            three_ds_comp_ind: Some(comp_ind),
            three_ds_server_trans_id: Some(three_ds_server_trans_id.to_string()),
            ..Self::stage(ThreeDsInfo::AuthenticationData)
        }
    }

    /// Final request of the challenge path, carrying the ACS's CRES token.
    pub fn challenge_response(protocol_version: ProtocolVersion, cres: &str) -> Self {
        Self {
            protocol_version: Some(protocol_version.to_string()),
            cres: Some(cres.to_string()),
            ..Self::stage(ThreeDsInfo::ChallengeResponse)
        }
    }
}
