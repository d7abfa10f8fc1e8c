//! Target URL construction
//!
//! Hub endpoints and WHIP publish targets are derived from the configured
//! base URL. A path prefix on the base URL is preserved.

use url::Url;

use crate::error::{Error, Result};

/// Parse and validate a hub base URL
pub fn parse_base(base: &str) -> Result<Url> {
    let base = base.trim();
    if base.is_empty() {
        return Err(Error::Config("base URL is empty".into()));
    }
    let url = Url::parse(base).map_err(|e| Error::Config(format!("invalid base URL: {e}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!("unsupported base URL: {base}")));
    }
    Ok(url)
}

/// URL of a hub API endpoint, e.g. `hub_endpoint(base, "register")`
pub fn hub_endpoint(base: &str, name: &str) -> Result<Url> {
    let mut url = parse_base(base)?;
    append_segments(&mut url, &[name])?;
    Ok(url)
}

/// WHIP publish target: `base/internal/hall/whip/<path>/whip?token=...`
///
/// Each path segment is percent-encoded; empty segments are dropped.
pub fn publish_url(base: &str, path: &str, token: &str) -> Result<Url> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(Error::Config("stream path is empty".into()));
    }

    let mut url = parse_base(base)?;
    append_segments(&mut url, &["internal", "hall", "whip"])?;
    append_segments(&mut url, &segments)?;
    append_segments(&mut url, &["whip"])?;
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

fn append_segments(url: &mut Url, segments: &[&str]) -> Result<()> {
    let unusable = format!("cannot append path to {url}");
    url.path_segments_mut()
        .map_err(|_| Error::Config(unusable))?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}
