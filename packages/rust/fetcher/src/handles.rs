//! Render-handle extraction from the report page.
//!
//! The report server renders a page that embeds a cache handle, a
//! parameter-set handle and a timestamp. All three are required to download
//! the rendered artifact.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::FetchFailure;

static CACHED_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"report1_cachedId\s*=\s*"([^"]+)""#).expect("valid regex"));

static PARAMS_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"name=reportParamsId\s*value=([^>\s]+)").expect("valid regex"));

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"t_i_m_e=(\d+)").expect("valid regex"));

/// The three tokens that address one rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHandles {
    pub cached_id: String,
    pub params_id: String,
    pub timestamp: String,
}

/// Extract the render handles from a report page body.
///
/// A missing handle is a permanent failure: the server only omits them when
/// it has nothing to render for the identifier.
pub fn extract_handles(body: &str) -> Result<ReportHandles, FetchFailure> {
    Ok(ReportHandles {
        cached_id: capture(&CACHED_ID, body, "cachedId")?,
        params_id: capture(&PARAMS_ID, body, "reportParamsId")?,
        timestamp: capture(&TIMESTAMP, body, "t_i_m_e")?,
    })
}

fn capture(re: &Regex, body: &str, token: &'static str) -> Result<String, FetchFailure> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(FetchFailure::MissingHandle { token })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><script>
        var report1_cachedId = "A1B2C3";
        var url = "/reportServlet?action=5&t_i_m_e=1700000000123";
    </script>
    <form><input type=hidden name=reportParamsId value=987654></form></html>"#;

    #[test]
    fn extracts_all_three() {
        let handles = extract_handles(PAGE).expect("handles");
        assert_eq!(handles.cached_id, "A1B2C3");
        assert_eq!(handles.params_id, "987654");
        assert_eq!(handles.timestamp, "1700000000123");
    }

    #[test]
    fn tolerates_spacing_around_cached_id() {
        let body = r#"report1_cachedId="X9" name=reportParamsId value=5 t_i_m_e=1"#;
        let handles = extract_handles(body).expect("handles");
        assert_eq!(handles.cached_id, "X9");
        assert_eq!(handles.params_id, "5");
    }

    #[test]
    fn missing_timestamp_is_reported() {
        let body = r#"report1_cachedId = "A" name=reportParamsId value=1"#;
        match extract_handles(body) {
            Err(FetchFailure::MissingHandle { token }) => assert_eq!(token, "t_i_m_e"),
            other => panic!("expected MissingHandle, got {other:?}"),
        }
    }

    #[test]
    fn empty_page_is_permanent() {
        let err = extract_handles("<html>no data</html>").unwrap_err();
        assert!(err.is_permanent());
    }
}
