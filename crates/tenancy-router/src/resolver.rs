//! Tenant resolution from inbound requests
//!
//! Pure: never touches the directory or the cache. Precedence:
//! 1. explicit tenant header (trimmed, verbatim)
//! 2. leftmost label of a dev-host or root-domain subdomain, unless reserved
//! 3. no tenant

use std::collections::HashSet;
use std::net::IpAddr;
use tenancy_common::{ResolverSettings, TenantSlug};

/// The two request facts resolution looks at
pub trait TenantRequest {
    /// Value of the named tenant header, if present and valid text
    fn tenant_header(&self, name: &str) -> Option<&str>;
    /// Host the request was addressed to, possibly with a port
    fn host(&self) -> Option<&str>;
}

impl TenantRequest for http::HeaderMap {
    fn tenant_header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    fn host(&self) -> Option<&str> {
        self.get(http::header::HOST).and_then(|v| v.to_str().ok())
    }
}

impl<B> TenantRequest for http::Request<B> {
    fn tenant_header(&self, name: &str) -> Option<&str> {
        self.headers().tenant_header(name)
    }

    fn host(&self) -> Option<&str> {
        self.headers().host().or_else(|| self.uri().host())
    }
}

/// Pre-extracted request facts
///
/// The header value is taken as already read from the configured header, so
/// `tenant_header` ignores the name.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    /// Value of the tenant header, if sent
    pub tenant_header: Option<String>,
    /// Host header, port included
    pub host: Option<String>,
}

impl RequestParts {
    /// Build from borrowed header values
    pub fn new(tenant_header: Option<&str>, host: Option<&str>) -> Self {
        Self {
            tenant_header: tenant_header.map(String::from),
            host: host.map(String::from),
        }
    }
}

impl TenantRequest for RequestParts {
    fn tenant_header(&self, _name: &str) -> Option<&str> {
        self.tenant_header.as_deref()
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Which rule produced the tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Explicit tenant header
    FromHeader(TenantSlug),
    /// Subdomain of the root domain or a dev host
    FromHost(TenantSlug),
    /// Platform traffic, no tenant
    None,
}

impl Resolution {
    /// The resolved slug, if any
    pub fn slug(&self) -> Option<&TenantSlug> {
        match self {
            Self::FromHeader(slug) | Self::FromHost(slug) => Some(slug),
            Self::None => None,
        }
    }

    /// True for platform traffic
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Derives tenant slugs from requests
#[derive(Debug, Clone)]
pub struct TenantResolver {
    header: String,
    root_domain: Option<String>,
    reserved: HashSet<String>,
    dev_hosts: HashSet<String>,
}

impl TenantResolver {
    /// Resolver normalized from `[resolver]` settings
    pub fn new(settings: &ResolverSettings) -> Self {
        Self {
            header: settings.header.trim().to_ascii_lowercase(),
            root_domain: settings
                .root_domain
                .as_deref()
                .map(|d| d.trim().trim_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty()),
            reserved: settings
                .reserved_labels
                .iter()
                .map(|l| l.trim().to_ascii_lowercase())
                .collect(),
            dev_hosts: settings
                .dev_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Header name consulted first
    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Resolve a request to a tenant slug
    pub fn resolve<R: TenantRequest + ?Sized>(&self, request: &R) -> Resolution {
        if let Some(slug) = self.from_header(request) {
            return Resolution::FromHeader(slug);
        }
        match request.host().and_then(|host| self.from_host(host)) {
            Some(slug) => Resolution::FromHost(slug),
            None => Resolution::None,
        }
    }

    fn from_header<R: TenantRequest + ?Sized>(&self, request: &R) -> Option<TenantSlug> {
        request
            .tenant_header(&self.header)
            .and_then(|value| TenantSlug::new(value).ok())
    }

    /// Slug for a host name, if it is a tenant subdomain
    pub fn from_host(&self, raw_host: &str) -> Option<TenantSlug> {
        let host = normalize_host(raw_host)?;
        if host.parse::<IpAddr>().is_ok() {
            return None;
        }

        let label = self
            .subdomain_label(&host, self.dev_hosts.iter().map(String::as_str))
            .or_else(|| {
                self.root_domain
                    .as_deref()
                    .and_then(|root| self.subdomain_label(&host, std::iter::once(root)))
            })?;

        if self.reserved.contains(label) {
            tracing::trace!(host = %host, label, "reserved label, no tenant");
            return None;
        }
        TenantSlug::parse_label(label).ok()
    }

    fn subdomain_label<'h, 'p>(
        &self,
        host: &'h str,
        parents: impl Iterator<Item = &'p str>,
    ) -> Option<&'h str> {
        for parent in parents {
            if let Some(prefix) = host
                .strip_suffix(parent)
                .and_then(|rest| rest.strip_suffix('.'))
            {
                return prefix.split('.').next().filter(|l| !l.is_empty());
            }
        }
        None
    }
}

/// Lowercase, drop the port and any trailing dot. Bracketed IPv6 literals
/// normalise to the bare address.
fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        rest.split(']').next()?
    } else if raw.matches(':').count() > 1 {
        raw
    } else {
        raw.split(':').next()?
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TenantResolver {
        TenantResolver::new(&ResolverSettings {
            root_domain: Some("platform.example.com".into()),
            ..ResolverSettings::default()
        })
    }

    fn host_only(host: &str) -> RequestParts {
        RequestParts::new(None, Some(host))
    }

    fn slug(s: &str) -> TenantSlug {
        TenantSlug::new(s).unwrap()
    }

    #[test]
    fn test_header_wins_over_host() {
        let req = RequestParts::new(Some("acme"), Some("globex.platform.example.com"));
        assert_eq!(resolver().resolve(&req), Resolution::FromHeader(slug("acme")));
    }

    #[test]
    fn test_header_is_trimmed_and_blank_ignored() {
        let r = resolver();
        let req = RequestParts::new(Some("  acme  "), None);
        assert_eq!(r.resolve(&req), Resolution::FromHeader(slug("acme")));

        let req = RequestParts::new(Some("   "), Some("globex.platform.example.com"));
        assert_eq!(r.resolve(&req), Resolution::FromHost(slug("globex")));
    }

    #[test]
    fn test_root_domain_subdomains() {
        let r = resolver();
        assert_eq!(
            r.resolve(&host_only("acme.platform.example.com")),
            Resolution::FromHost(slug("acme"))
        );
        assert_eq!(
            r.resolve(&host_only("ACME.Platform.Example.com:8443")),
            Resolution::FromHost(slug("acme"))
        );
        assert_eq!(
            r.resolve(&host_only("eu.acme.platform.example.com")),
            Resolution::FromHost(slug("eu"))
        );
        assert_eq!(r.resolve(&host_only("platform.example.com")), Resolution::None);
        assert_eq!(r.resolve(&host_only("acme.other.com")), Resolution::None);
        assert_eq!(r.resolve(&host_only("evilplatform.example.com")), Resolution::None);
    }

    #[test]
    fn test_reserved_labels_are_not_tenants() {
        let r = resolver();
        for host in ["www.platform.example.com", "api.platform.example.com", "admin.platform.example.com"] {
            assert_eq!(r.resolve(&host_only(host)), Resolution::None, "{host}");
        }
    }

    #[test]
    fn test_dev_hosts() {
        let r = resolver();
        assert_eq!(
            r.resolve(&host_only("acme.localhost:3000")),
            Resolution::FromHost(slug("acme"))
        );
        assert_eq!(r.resolve(&host_only("localhost:3000")), Resolution::None);
        assert_eq!(r.resolve(&host_only("127.0.0.1:8000")), Resolution::None);
        assert_eq!(r.resolve(&host_only("[::1]:8000")), Resolution::None);
        assert_eq!(r.resolve(&host_only("www.localhost")), Resolution::None);
    }

    #[test]
    fn test_invalid_labels_and_missing_host() {
        let r = resolver();
        assert_eq!(r.resolve(&host_only("ac_me.platform.example.com")), Resolution::None);
        assert_eq!(r.resolve(&RequestParts::default()), Resolution::None);
        assert_eq!(r.resolve(&host_only("")), Resolution::None);
    }

    #[test]
    fn test_no_root_domain_only_dev_hosts() {
        let r = TenantResolver::new(&ResolverSettings::default());
        assert_eq!(r.resolve(&host_only("acme.platform.example.com")), Resolution::None);
        assert_eq!(r.resolve(&host_only("acme.localhost")), Resolution::FromHost(slug("acme")));
    }

    #[test]
    fn test_http_header_map() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::HOST, "acme.platform.example.com".parse().unwrap());
        assert_eq!(resolver().resolve(&headers), Resolution::FromHost(slug("acme")));

        headers.insert("x-tenant-slug", "globex".parse().unwrap());
        let resolution = resolver().resolve(&headers);
        assert_eq!(resolution, Resolution::FromHeader(slug("globex")));
        assert_eq!(resolution.slug().map(TenantSlug::as_str), Some("globex"));
    }

    #[test]
    fn test_http_request_uri_host_fallback() {
        let req = http::Request::builder()
            .uri("https://acme.platform.example.com/api/records")
            .body(())
            .unwrap();
        assert_eq!(resolver().resolve(&req), Resolution::FromHost(slug("acme")));
    }
}
