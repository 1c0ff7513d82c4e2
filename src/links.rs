// src/links.rs
//
// Shareable links to a session in the web app.

use reqwest::Url;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionDetails {
    pub url: String,
    /// Same link, opening at the moment the details were requested.
    pub url_with_timestamp: String,
}

fn require_ids(project_id: &str, secure_id: &str) -> Result<(), String> {
    if project_id.is_empty() || secure_id.is_empty() {
        return Err("Project ID or session ID is empty".to_string());
    }
    Ok(())
}

fn base_url(host: &str, project_id: &str, secure_id: &str) -> Result<Url, String> {
    require_ids(project_id, secure_id)?;
    let host = host.trim_end_matches('/');
    let raw = if host.contains("://") {
        format!("{}/{}/sessions/{}", host, project_id, secure_id)
    } else {
        format!("https://{}/{}/sessions/{}", host, project_id, secure_id)
    };
    Url::parse(&raw).map_err(|e| format!("Failed to build session URL: {}", e))
}

/// Link to a session: `https://<host>/<project>/sessions/<session>`.
pub fn session_url(host: &str, project_id: &str, secure_id: &str) -> Result<String, String> {
    Ok(base_url(host, project_id, secure_id)?.to_string())
}

/// Session link plus a variant whose `ts` query parameter holds the seconds
/// elapsed between `session_start_ms` and `now_ms`.
pub fn session_details(
    host: &str,
    project_id: &str,
    secure_id: &str,
    session_start_ms: i64,
    now_ms: i64,
) -> Result<SessionDetails, String> {
    let url = base_url(host, project_id, secure_id)?;
    let mut url_with_timestamp = url.clone();
    let elapsed_secs = (now_ms - session_start_ms) as f64 / 1000.0;
    url_with_timestamp
        .query_pairs_mut()
        .append_pair("ts", &elapsed_secs.to_string());

    Ok(SessionDetails {
        url: url.to_string(),
        url_with_timestamp: url_with_timestamp.to_string(),
    })
}

/// `session_details` evaluated at the current wall-clock time.
pub fn session_details_now(
    host: &str,
    project_id: &str,
    secure_id: &str,
    session_start_ms: i64,
) -> Result<SessionDetails, String> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    session_details(host, project_id, secure_id, session_start_ms, now_ms)
}
