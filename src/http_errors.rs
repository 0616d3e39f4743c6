/// Whether a failed request with this HTTP status may succeed if retried.
///
/// Client errors (4xx) are deterministic and not retried, except for request timeout (408) and
/// rate limiting (429). Everything else is assumed to be a transient server-side condition.
pub fn is_http_error_recoverable(status: u16) -> bool {
    if (400..500).contains(&status) {
        return status == 408 || status == 429;
    }
    true
}
