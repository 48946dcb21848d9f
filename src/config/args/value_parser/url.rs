use url::Url;

const INVALID_SCHEME: &str = "scheme must be https:// or http:// .";
const MISSING_HOST: &str = "endpoint must contain a host name.";

/// Accepts `http://` and `https://` endpoints of an S3-compatible server.
pub fn check_scheme(endpoint: &str) -> Result<String, String> {
    let endpoint = endpoint.trim();
    let parsed = Url::parse(endpoint).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }
    if parsed.host_str().is_none_or(|host| host.is_empty()) {
        return Err(MISSING_HOST.to_string());
    }

    Ok(endpoint.to_string())
}
