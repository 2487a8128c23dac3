//! Pooled HTTP client behind a zero-trust SSRF guard
//!
//! Every outbound request made by the `http` node flows through:
//!
//! ```text
//! SSRF guard ──► send ──► (redirect? re-guard, repeat) ──► capped body read
//!    │                                                        │
//!    │ scheme check, allow-list,                              │ chunked read,
//!    │ DNS resolve, IP classification                         │ max_response_size
//! ```
//!
//! The guard rejects loopback, RFC1918, link-local, unspecified and cloud
//! metadata destinations (and their IPv6 equivalents, including v4-mapped
//! addresses) before any connection is attempted. Redirects are followed
//! manually so every hop is re-validated; the response body is read in
//! chunks against the configured cap so an oversized response aborts early.
//!
//! Error messages never contain the full URL, only the hostname.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::Limits;
use crate::error::{Result, WorkflowError};

/// Decoded response handed back to the `http` node
#[derive(Debug, Clone)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: Value,
    pub duration_ms: u64,
    pub size: usize,
    /// Final hostname after redirects, for events
    pub host: String,
}

/// Shared, pooled HTTP client
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(limits: &Limits) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flowgraph/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(limits.http_timeout)
            .pool_max_idle_per_host(8)
            .build();
        Self {
            client: match client {
                Ok(client) => client,
                Err(_) => reqwest::Client::new(),
            },
        }
    }

    /// Perform a guarded request, following redirects manually.
    ///
    /// `deadline` is the run deadline; the effective per-request timeout is
    /// the smaller of `timeout` and the time remaining.
    pub async fn execute(
        &self,
        limits: &Limits,
        deadline: Instant,
        method: &str,
        url: &str,
        headers: &Map<String, Value>,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<HttpResponseData> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| WorkflowError::Custom(format!("unsupported HTTP method '{}'", method)))?;

        let mut current = url.to_string();
        let started = Instant::now();

        for _hop in 0..=limits.max_redirects {
            let parsed = reqwest::Url::parse(&current)
                .map_err(|_| WorkflowError::Custom("invalid request url".into()))?;
            let host = host_of(&parsed)?;
            check_destination(&parsed, limits).await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WorkflowError::Timeout {
                    operation: format!("http {}", host),
                    duration_ms: timeout.as_millis() as u64,
                });
            }

            let mut request = self
                .client
                .request(method.clone(), parsed.clone())
                .timeout(timeout.min(remaining));
            for (name, value) in headers {
                if let Some(text) = value.as_str() {
                    request = request.header(name.as_str(), text);
                }
            }
            if let Some(body) = body {
                request = match body {
                    Value::String(text) => request.body(text.clone()),
                    other => request.json(other),
                };
            }

            let response = request.send().await.map_err(|e| classify_send_error(&e, &host))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        WorkflowError::Custom("redirect without a location header".into())
                    })?;
                current = parsed
                    .join(location)
                    .map_err(|_| WorkflowError::Custom("invalid redirect location".into()))?
                    .to_string();
                continue;
            }

            if status.is_server_error() {
                return Err(WorkflowError::HttpTransient(format!(
                    "'{}' returned {}",
                    host,
                    status.as_u16()
                )));
            }

            let response_headers = collect_headers(&response);
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let bytes = read_capped(response, limits.max_response_size, &host).await?;
            let size = bytes.len();
            let body = decode_body(&bytes, &content_type);

            return Ok(HttpResponseData {
                status: status.as_u16(),
                headers: response_headers,
                body,
                duration_ms: started.elapsed().as_millis() as u64,
                size,
                host,
            });
        }

        Err(WorkflowError::Custom(format!(
            "redirect limit of {} exceeded",
            limits.max_redirects
        )))
    }
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector").finish()
    }
}

fn host_of(url: &reqwest::Url) -> Result<String> {
    url.host_str()
        .map(|h| h.trim_matches(|c| c == '[' || c == ']').to_string())
        .ok_or_else(|| WorkflowError::SsrfBlocked {
            host: "<none>".into(),
            reason: "url has no host".into(),
        })
}

/// Validate scheme, allow-list, and every resolved address of a destination.
///
/// Runs before connecting and again after every redirect. DNS failures are
/// transient; a single disallowed address in the answer rejects the request.
pub async fn check_destination(url: &reqwest::Url, limits: &Limits) -> Result<()> {
    let host = host_of(url)?;

    match url.scheme() {
        "https" => {}
        "http" if limits.allow_http => {}
        other => {
            return Err(WorkflowError::SsrfBlocked {
                host,
                reason: format!("scheme '{}' is not allowed", other),
            })
        }
    }

    if !limits.allowed_domains.is_empty() {
        let allowed = limits.allowed_domains.iter().any(|domain| {
            host == *domain || host.ends_with(&format!(".{}", domain))
        });
        if !allowed {
            return Err(WorkflowError::SsrfBlocked {
                host,
                reason: "host is not in the allow-list".into(),
            });
        }
    }

    let addresses: Vec<IpAddr> = if let Ok(ip) = host.parse::<IpAddr>() {
        vec![ip]
    } else {
        let port = url.port_or_known_default().unwrap_or(443);
        let resolved = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|_| WorkflowError::HttpTransient(format!("dns lookup failed for '{}'", host)))?;
        resolved.map(|addr| addr.ip()).collect()
    };

    if addresses.is_empty() {
        return Err(WorkflowError::HttpTransient(format!(
            "dns returned no addresses for '{}'",
            host
        )));
    }

    for ip in addresses {
        if let Some(reason) = disallowed_ip(ip, limits) {
            return Err(WorkflowError::SsrfBlocked {
                host,
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

/// Why an address is rejected, or `None` when it is acceptable
pub fn disallowed_ip(ip: IpAddr, limits: &Limits) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_unspecified() || v4.is_broadcast() {
                return Some("unroutable address");
            }
            // The metadata endpoint sits inside link-local space; its gate
            // is separate and stricter.
            if v4.octets() == [169, 254, 169, 254] {
                if !limits.allow_cloud_metadata {
                    return Some("cloud metadata endpoint");
                }
                return None;
            }
            if v4.is_loopback() && !limits.allow_localhost {
                return Some("loopback address");
            }
            if v4.is_private() && !limits.allow_private_ips {
                return Some("private address");
            }
            if v4.is_link_local() && !limits.allow_link_local {
                return Some("link-local address");
            }
            None
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return disallowed_ip(IpAddr::V4(mapped), limits);
            }
            if v6.is_unspecified() {
                return Some("unroutable address");
            }
            if v6.is_loopback() && !limits.allow_localhost {
                return Some("loopback address");
            }
            // fc00::/7 unique-local
            if (v6.segments()[0] & 0xfe00) == 0xfc00 && !limits.allow_private_ips {
                return Some("private address");
            }
            // fe80::/10 link-local
            if (v6.segments()[0] & 0xffc0) == 0xfe80 && !limits.allow_link_local {
                return Some("link-local address");
            }
            None
        }
    }
}

fn classify_send_error(error: &reqwest::Error, host: &str) -> WorkflowError {
    // reqwest errors can embed the URL; rebuild the message around the host
    // only.
    if error.is_timeout() {
        WorkflowError::HttpTransient(format!("request to '{}' timed out", host))
    } else if error.is_connect() {
        WorkflowError::HttpTransient(format!("connect to '{}' failed", host))
    } else {
        WorkflowError::HttpTransient(format!("request to '{}' failed", host))
    }
}

fn collect_headers(response: &reqwest::Response) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in response.headers() {
        if let Ok(text) = value.to_str() {
            out.insert(name.to_string(), Value::String(text.to_string()));
        }
    }
    out
}

async fn read_capped(
    mut response: reqwest::Response,
    cap: usize,
    host: &str,
) -> Result<Vec<u8>> {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|_| WorkflowError::HttpTransient(format!("read from '{}' failed", host)))?;
        match chunk {
            Some(chunk) => {
                if buffer.len() + chunk.len() > cap {
                    return Err(WorkflowError::ResponseTooLarge { limit: cap });
                }
                buffer.extend_from_slice(&chunk);
            }
            None => return Ok(buffer),
        }
    }
}

fn decode_body(bytes: &[u8], content_type: &str) -> Value {
    if content_type.contains("json") {
        if let Ok(parsed) = serde_json::from_slice::<Value>(bytes) {
            return parsed;
        }
    }
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}
