use serde::{Deserialize, Serialize};

/// Coarse device classification of a tracking request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "desktop" => Self::Desktop,
            "mobile" => Self::Mobile,
            "tablet" => Self::Tablet,
            "bot" => Self::Bot,
            _ => Self::Unknown,
        }
    }

    pub fn classify(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent.map(str::to_lowercase) else {
            return Self::Unknown;
        };
        if ua.is_empty() {
            Self::Unknown
        } else if ["bot", "crawler", "spider", "scanner", "preview", "proxy"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            Self::Bot
        } else if ua.contains("ipad") || ua.contains("tablet") {
            Self::Tablet
        } else if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
            Self::Mobile
        } else if ua.contains("windows") || ua.contains("macintosh") || ua.contains("x11") {
            Self::Desktop
        } else {
            Self::Unknown
        }
    }
}

/// Email client family inferred from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFamily {
    Gmail,
    AppleMail,
    Outlook,
    Yahoo,
    Thunderbird,
    Browser,
    Other,
}

impl ClientFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::AppleMail => "apple_mail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
            Self::Thunderbird => "thunderbird",
            Self::Browser => "browser",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "gmail" => Self::Gmail,
            "apple_mail" => Self::AppleMail,
            "outlook" => Self::Outlook,
            "yahoo" => Self::Yahoo,
            "thunderbird" => Self::Thunderbird,
            "browser" => Self::Browser,
            _ => Self::Other,
        }
    }

    pub fn classify(user_agent: Option<&str>) -> Self {
        let Some(ua) = user_agent.map(str::to_lowercase) else {
            return Self::Other;
        };
        if ua.contains("googleimageproxy") || ua.contains("gmail") {
            Self::Gmail
        } else if ua.contains("outlook") || ua.contains("microsoft office") {
            Self::Outlook
        } else if ua.contains("yahoo") {
            Self::Yahoo
        } else if ua.contains("thunderbird") {
            Self::Thunderbird
        } else if ua.contains("applewebkit") && !ua.contains("safari") && !ua.contains("chrome")
        {
            // Apple Mail renders through WebKit without a browser token
            Self::AppleMail
        } else if ua.contains("mozilla") {
            Self::Browser
        } else {
            Self::Other
        }
    }
}

/// Request metadata captured alongside each tracking event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device: DeviceClass,
    pub client: ClientFamily,
}

impl ClientMetadata {
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        let device = DeviceClass::classify(user_agent.as_deref());
        let client = ClientFamily::classify(user_agent.as_deref());
        Self {
            user_agent,
            ip_address,
            device,
            client,
        }
    }

    pub fn unknown() -> Self {
        Self::new(None, None)
    }
}
