use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur during source URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(IpAddr),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Which hosts a source URL may point at.
///
/// Public-only is the default and guards against SSRF when source URLs come
/// from end users. `AllowPrivate` is for intranet feeds and local test servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UrlPolicy {
    #[default]
    PublicOnly,
    AllowPrivate,
}

impl UrlPolicy {
    pub fn from_allow_private(allow_private_hosts: bool) -> Self {
        if allow_private_hosts {
            Self::AllowPrivate
        } else {
            Self::PublicOnly
        }
    }

    /// Parses `url_str` and checks it against this policy.
    ///
    /// # Errors
    ///
    /// - [`UrlValidationError::InvalidUrl`] if it does not parse
    /// - [`UrlValidationError::UnsupportedScheme`] for anything but http/https
    /// - [`UrlValidationError::MissingHost`] if there is no host
    /// - [`UrlValidationError::Localhost`] / [`UrlValidationError::PrivateIp`]
    ///   for internal hosts under [`UrlPolicy::PublicOnly`]
    pub fn validate(self, url_str: &str) -> Result<Url, UrlValidationError> {
        let url = Url::parse(url_str.trim())?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
        }

        let host = url.host().ok_or(UrlValidationError::MissingHost)?;
        if self == Self::AllowPrivate {
            return Ok(url);
        }

        let ip = match host {
            Host::Domain(domain) => {
                if domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost") {
                    return Err(UrlValidationError::Localhost);
                }
                return Ok(url);
            }
            Host::Ipv4(v4) => IpAddr::V4(v4),
            Host::Ipv6(v6) => IpAddr::V6(v6),
        };

        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip));
        }

        Ok(url)
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            if v6.is_unspecified() {
                return true;
            }
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped)) || mapped.is_loopback();
            }
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
