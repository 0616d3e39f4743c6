//! Configuration for [`EventSender`](crate::EventSender).

/// Maximum length of a URL produced by the image-pixel fallback transport.
pub const MAX_URL_LENGTH: usize = 2000;

/// Version of the event payload schema, sent in the `X-LaunchDarkly-Event-Schema` header.
pub const EVENT_SCHEMA_VERSION: &str = "3";

/// Information about the SDK that is sending events. Used to build the user agent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkMetadata {
    /// User agent product token, e.g. `"RustClient"`.
    pub user_agent: &'static str,
    /// SDK version.
    pub version: &'static str,
}

impl Default for SdkMetadata {
    fn default() -> Self {
        SdkMetadata {
            user_agent: "LDCommon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Identifies the application embedding the SDK. Sent as `X-LaunchDarkly-Tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationInfo {
    /// Application identifier.
    pub id: Option<String>,
    /// Application version.
    pub version: Option<String>,
}

/// Configuration for [`EventSender`](crate::EventSender).
#[derive(Debug, Clone)]
pub struct EventSenderConfig {
    pub(crate) environment_id: String,
    pub(crate) sdk: SdkMetadata,
    pub(crate) wrapper_name: Option<String>,
    pub(crate) wrapper_version: Option<String>,
    pub(crate) application: Option<ApplicationInfo>,
    pub(crate) user_agent_header_name: String,
    pub(crate) send_ld_headers: bool,
}

impl EventSenderConfig {
    /// Default base URL for event delivery.
    pub const DEFAULT_EVENTS_URL: &'static str = "https://events.launchdarkly.com";

    /// Default name of the header carrying the user agent.
    pub const DEFAULT_USER_AGENT_HEADER: &'static str = "User-Agent";

    /// Create a default configuration for the given environment (client-side id).
    ///
    /// ```
    /// # use ld_common::EventSenderConfig;
    /// EventSenderConfig::from_environment_id("my-environment-id");
    /// ```
    pub fn from_environment_id(environment_id: impl Into<String>) -> Self {
        EventSenderConfig {
            environment_id: environment_id.into(),
            sdk: SdkMetadata::default(),
            wrapper_name: None,
            wrapper_version: None,
            application: None,
            user_agent_header_name: EventSenderConfig::DEFAULT_USER_AGENT_HEADER.to_owned(),
            send_ld_headers: true,
        }
    }

    /// Set SDK metadata used for the user agent header.
    pub fn sdk(mut self, sdk: SdkMetadata) -> Self {
        self.sdk = sdk;
        self
    }

    /// Report that the SDK is used through a wrapper library.
    ///
    /// ```
    /// # use ld_common::EventSenderConfig;
    /// let config = EventSenderConfig::from_environment_id("env").wrapper("react", Some("3.0.1"));
    /// ```
    pub fn wrapper(mut self, name: impl Into<String>, version: Option<impl Into<String>>) -> Self {
        self.wrapper_name = Some(name.into());
        self.wrapper_version = version.map(Into::into);
        self
    }

    /// Set application metadata.
    pub fn application(mut self, application: ApplicationInfo) -> Self {
        self.application = Some(application);
        self
    }

    /// Override the header used to send the user agent. Some browsers forbid setting
    /// `User-Agent`, so platforms may send it as `X-LaunchDarkly-User-Agent` instead.
    pub fn user_agent_header_name(mut self, name: impl Into<String>) -> Self {
        self.user_agent_header_name = name.into();
        self
    }

    /// Disable SDK-identifying headers (user agent, wrapper and tags). The content type and
    /// schema version headers are always sent.
    pub fn send_ld_headers(mut self, send: bool) -> Self {
        self.send_ld_headers = send;
        self
    }

    /// Environment id this sender delivers events for.
    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }
}
