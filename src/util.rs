use reqwest::Url;
use url::Host;

/// Parse an env-style boolean: true/false, 1/0, yes/no, on/off.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// True when `url` points at this machine: `localhost`, a loopback or
/// unspecified address.
pub fn is_local_endpoint_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };

    match parsed.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
        }
        Some(Host::Ipv4(address)) => address.is_loopback() || address.is_unspecified(),
        Some(Host::Ipv6(address)) => address.is_loopback() || address.is_unspecified(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_str() {
        assert_eq!(parse_bool_str(" TRUE "), Some(true));
        assert_eq!(parse_bool_str("on"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_str("No"), Some(false));
        assert_eq!(parse_bool_str("sometimes"), None);
    }

    #[test]
    fn test_local_endpoints() {
        assert!(is_local_endpoint_url(" HTTP://LOCALHOST:8000/stream "));
        assert!(is_local_endpoint_url("http://agent.localhost:8000"));
        assert!(is_local_endpoint_url("http://127.0.0.1:8000"));
        assert!(is_local_endpoint_url("http://127.4.5.6"));
        assert!(is_local_endpoint_url("http://[::1]:8000"));
        assert!(is_local_endpoint_url("http://0.0.0.0:8000"));
    }

    #[test]
    fn test_remote_endpoints() {
        assert!(!is_local_endpoint_url("http://evil-localhost.com"));
        assert!(!is_local_endpoint_url("http://localhost.evil.com"));
        assert!(!is_local_endpoint_url("https://agents.example.com"));
        assert!(!is_local_endpoint_url("http://10.0.0.8:8000"));
        assert!(!is_local_endpoint_url("not a url"));
    }
}
