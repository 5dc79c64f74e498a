//! Dry-run tenant resolution

use crate::output::OutputFormat;
use serde::Serialize;
use std::fmt;
use tenancy_common::Settings;
use tenancy_router::{RequestParts, Resolution, TenantResolver};

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ResolutionView {
    source: &'static str,
    slug: Option<String>,
}

impl From<&Resolution> for ResolutionView {
    fn from(resolution: &Resolution) -> Self {
        let source = match resolution {
            Resolution::FromHeader(_) => "header",
            Resolution::FromHost(_) => "host",
            Resolution::None => "none",
        };
        Self {
            source,
            slug: resolution.slug().map(ToString::to_string),
        }
    }
}

impl fmt::Display for ResolutionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slug {
            Some(slug) => write!(f, "{slug} (from {})", self.source),
            None => f.write_str("no tenant"),
        }
    }
}

fn resolve(settings: &Settings, host: &str, header: Option<&str>) -> ResolutionView {
    let resolver = TenantResolver::new(&settings.resolver);
    ResolutionView::from(&resolver.resolve(&RequestParts::new(header, Some(host))))
}

pub fn handle(
    settings: &Settings,
    host: &str,
    header: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    format.print(&resolve(settings, host, header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views() {
        let settings = Settings::default();
        assert_eq!(
            resolve(&settings, "acme.localhost:8000", None),
            ResolutionView { source: "host", slug: Some("acme".into()) }
        );
        assert_eq!(
            resolve(&settings, "acme.localhost", Some("globex")).to_string(),
            "globex (from header)"
        );
        assert_eq!(resolve(&settings, "www.localhost", None).to_string(), "no tenant");
    }
}
