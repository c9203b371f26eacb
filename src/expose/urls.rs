//! External URL construction for exposures.
//!
//! Three forms, in priority order:
//!
//! - subdomain: `https://p{port}-{session}.{dev}.{host}` (needs wildcard DNS
//!   and TLS termination in front of the service)
//! - dedicated port: `{scheme}://{host}:{allocated}`
//! - path: `{base}/api/v1/sessions/{session}/proxy/{port}/`

/// Builds exposure URLs from the public base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    base_url: String,
    dev_subdomain: Option<String>,
}

impl UrlBuilder {
    /// Create a builder. A trailing slash on `base_url` is ignored.
    pub fn new(base_url: impl Into<String>, dev_subdomain: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            dev_subdomain: dev_subdomain.filter(|s| !s.is_empty()),
        }
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `https` if the base URL is, `http` otherwise.
    pub fn scheme(&self) -> &'static str {
        if self.base_url.starts_with("https://") {
            "https"
        } else {
            "http"
        }
    }

    /// Host part of the base URL without scheme, port or path.
    pub fn host(&self) -> &str {
        let rest = self
            .base_url
            .strip_prefix("https://")
            .or_else(|| self.base_url.strip_prefix("http://"))
            .unwrap_or(&self.base_url);
        let authority = rest.split('/').next().unwrap_or(rest);
        authority.split(':').next().unwrap_or(authority)
    }

    /// Subdomain URL, when a dev subdomain is configured.
    pub fn subdomain_url(&self, session_id: &str, port: u16) -> Option<String> {
        let dev = self.dev_subdomain.as_deref()?;
        if self.base_url.is_empty() {
            return None;
        }
        Some(format!(
            "https://p{}-{}.{}.{}",
            port,
            session_id,
            dev,
            self.host()
        ))
    }

    /// URL of a dedicated listening port.
    pub fn dedicated_url(&self, allocated_port: u16) -> String {
        format!("{}://{}:{}", self.scheme(), self.host(), allocated_port)
    }

    /// Path-based URL through the main HTTP entry point.
    pub fn path_url(&self, session_id: &str, port: u16) -> String {
        format!(
            "{}/api/v1/sessions/{}/proxy/{}/",
            self.base_url, session_id, port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_forms() {
        let urls = UrlBuilder::new("https://portal.example.com", Some("dev".to_string()));

        assert_eq!(
            urls.subdomain_url("sess-abc", 8080).unwrap(),
            "https://p8080-sess-abc.dev.portal.example.com"
        );
        assert_eq!(urls.dedicated_url(30001), "https://portal.example.com:30001");
        assert_eq!(
            urls.path_url("sess-abc", 8080),
            "https://portal.example.com/api/v1/sessions/sess-abc/proxy/8080/"
        );
    }

    #[test]
    fn test_host_strips_port_and_path() {
        let urls = UrlBuilder::new("http://localhost:8080/", None);
        assert_eq!(urls.base_url(), "http://localhost:8080");
        assert_eq!(urls.host(), "localhost");
        assert_eq!(urls.scheme(), "http");
        assert_eq!(urls.dedicated_url(30000), "http://localhost:30000");
    }

    #[test]
    fn test_no_subdomain_without_label() {
        let urls = UrlBuilder::new("https://portal.example.com", None);
        assert!(urls.subdomain_url("sess-1", 80).is_none());

        let urls = UrlBuilder::new("https://portal.example.com", Some(String::new()));
        assert!(urls.subdomain_url("sess-1", 80).is_none());

        let urls = UrlBuilder::new("", Some("dev".to_string()));
        assert!(urls.subdomain_url("sess-1", 80).is_none());
    }
}
