//! Headers identifying the SDK to the events service.
use std::{collections::HashMap, sync::OnceLock};

use regex::Regex;

use crate::config::{ApplicationInfo, EventSenderConfig, EVENT_SCHEMA_VERSION};

pub(crate) const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub(crate) const EVENT_SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";
const WRAPPER_HEADER: &str = "X-LaunchDarkly-Wrapper";
const TAGS_HEADER: &str = "X-LaunchDarkly-Tags";

const MAX_TAG_VALUE_LENGTH: usize = 64;

fn tag_value_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[\w.-]+$").expect("tag value regex should compile"))
}

/// Headers that identify the SDK: user agent, wrapper and application tags.
///
/// Returns an empty map if the configuration disables SDK headers.
pub fn sdk_headers(config: &EventSenderConfig) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if !config.send_ld_headers {
        return headers;
    }

    headers.insert(
        config.user_agent_header_name.clone(),
        format!("{}/{}", config.sdk.user_agent, config.sdk.version),
    );

    if let Some(name) = &config.wrapper_name {
        let value = match &config.wrapper_version {
            Some(version) => format!("{name}/{version}"),
            None => name.clone(),
        };
        headers.insert(WRAPPER_HEADER.to_owned(), value);
    }

    if let Some(tags) = config.application.as_ref().and_then(application_tags) {
        headers.insert(TAGS_HEADER.to_owned(), tags);
    }

    headers
}

/// Full header set for event payloads: the fixed content type and schema version merged with
/// [`sdk_headers`]. SDK headers cannot override the fixed pair.
pub(crate) fn event_headers(config: &EventSenderConfig) -> HashMap<String, String> {
    let mut headers = sdk_headers(config);
    headers.insert(CONTENT_TYPE_HEADER.to_owned(), "application/json".to_owned());
    headers.insert(
        EVENT_SCHEMA_HEADER.to_owned(),
        EVENT_SCHEMA_VERSION.to_owned(),
    );
    headers
}

fn application_tags(application: &ApplicationInfo) -> Option<String> {
    // Sorted by tag key.
    let tags = [
        ("application-id", application.id.as_deref()),
        ("application-version", application.version.as_deref()),
    ];

    let formatted = tags
        .iter()
        .filter_map(|(key, value)| {
            let value = (*value)?;
            if is_valid_tag_value(value) {
                Some(format!("{key}/{value}"))
            } else {
                log::warn!(target: "ld_common", tag = key, value; "ignoring invalid application tag value");
                None
            }
        })
        .collect::<Vec<_>>();

    if formatted.is_empty() {
        None
    } else {
        Some(formatted.join(" "))
    }
}

fn is_valid_tag_value(value: &str) -> bool {
    value.len() <= MAX_TAG_VALUE_LENGTH && tag_value_regex().is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkMetadata;

    fn config() -> EventSenderConfig {
        EventSenderConfig::from_environment_id("env").sdk(SdkMetadata {
            user_agent: "TestClient",
            version: "1.2.3",
        })
    }

    #[test]
    fn user_agent_only_by_default() {
        let headers = sdk_headers(&config());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["User-Agent"], "TestClient/1.2.3");
    }

    #[test]
    fn custom_user_agent_header_name() {
        let headers = sdk_headers(&config().user_agent_header_name("X-LaunchDarkly-User-Agent"));
        assert_eq!(headers["X-LaunchDarkly-User-Agent"], "TestClient/1.2.3");
        assert!(!headers.contains_key("User-Agent"));
    }

    #[test]
    fn wrapper_with_and_without_version() {
        let headers = sdk_headers(&config().wrapper("react", Some("3.0.1")));
        assert_eq!(headers["X-LaunchDarkly-Wrapper"], "react/3.0.1");

        let headers = sdk_headers(&config().wrapper("vue", None::<String>));
        assert_eq!(headers["X-LaunchDarkly-Wrapper"], "vue");
    }

    #[test]
    fn application_tags_are_sorted_and_validated() {
        let headers = sdk_headers(&config().application(ApplicationInfo {
            id: Some("my-app".to_owned()),
            version: Some("1.0.0".to_owned()),
        }));
        assert_eq!(
            headers["X-LaunchDarkly-Tags"],
            "application-id/my-app application-version/1.0.0"
        );

        let headers = sdk_headers(&config().application(ApplicationInfo {
            id: Some("has spaces".to_owned()),
            version: Some("x".repeat(65)),
        }));
        assert!(!headers.contains_key("X-LaunchDarkly-Tags"));
    }

    #[test]
    fn sdk_headers_can_be_disabled() {
        assert!(sdk_headers(&config().send_ld_headers(false)).is_empty());

        let headers = event_headers(&config().send_ld_headers(false));
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["Content-Type"], "application/json");
        assert_eq!(headers["X-LaunchDarkly-Event-Schema"], "3");
    }

    #[test]
    fn fixed_headers_win_over_sdk_headers() {
        let headers = event_headers(&config().user_agent_header_name("Content-Type"));
        assert_eq!(headers["Content-Type"], "application/json");
    }
}
