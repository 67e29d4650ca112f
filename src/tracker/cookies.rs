//! Netscape cookie 文件读取
//!
//! 浏览器扩展导出的 `cookies.txt`：每行 7 个以 TAB 分隔的字段
//! `domain  include_subdomains  path  secure  expires  name  value`。
//! 以 `#HttpOnly_` 开头的行是 HttpOnly cookie，不是注释。

use reqwest::cookie::Jar;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::error::AuthError;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// 单条 cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub expires: i64,
    pub name: String,
    pub value: String,
    pub http_only: bool,
}

impl CookieEntry {
    /// 去掉前导 `.` 的主机名
    pub fn host(&self) -> &str {
        self.domain.trim_start_matches('.')
    }
}

/// 解析 Netscape 格式内容，忽略无法识别的行
pub fn parse_netscape(content: &str) -> Vec<CookieEntry> {
    content
        .lines()
        .filter_map(|raw| {
            let line = raw.trim_end_matches(['\r', '\n']);
            let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
                Some(rest) => (rest, true),
                None => (line, false),
            };
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }

            Some(CookieEntry {
                domain: fields[0].trim().to_string(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: if fields[2].is_empty() {
                    "/".to_string()
                } else {
                    fields[2].to_string()
                },
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                expires: fields[4].trim().parse().unwrap_or(0),
                name: fields[5].to_string(),
                value: fields[6..].join("\t"),
                http_only,
            })
        })
        .collect()
}

/// 读取 cookie 文件
pub fn load_cookie_file(path: &Path) -> Result<Vec<CookieEntry>, AuthError> {
    let content = fs::read_to_string(path).map_err(|e| {
        AuthError::MissingCredentials(format!("cannot read {}: {e}", path.display()))
    })?;
    let entries = parse_netscape(&content);
    if entries.is_empty() {
        return Err(AuthError::MissingCredentials(format!(
            "{} contains no cookies",
            path.display()
        )));
    }
    Ok(entries)
}

/// 第一个看起来像域名的 cookie domain
pub fn first_domain(entries: &[CookieEntry]) -> Option<String> {
    entries
        .iter()
        .map(|entry| entry.host())
        .find(|host| host.contains('.'))
        .map(str::to_string)
}

/// 读取文件中第一个 cookie 的域名（用于按域名区分的多站点引擎）
pub fn domain_from_cookie_file(path: &Path) -> Option<String> {
    match load_cookie_file(path) {
        Ok(entries) => first_domain(&entries),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read domain from cookie file");
            None
        }
    }
}

/// 装入 reqwest cookie jar（忽略过期时间，与浏览器导出时保持一致）
pub fn to_jar(entries: &[CookieEntry]) -> Arc<Jar> {
    let jar = Jar::default();
    for entry in entries {
        let url = match Url::parse(&format!("https://{}{}", entry.host(), entry.path)) {
            Ok(url) => url,
            Err(e) => {
                warn!(domain = %entry.domain, error = %e, "Skipping cookie with invalid domain");
                continue;
            }
        };

        let mut cookie = format!("{}={}; Path={}", entry.name, entry.value, entry.path);
        if entry.include_subdomains || entry.domain.starts_with('.') {
            cookie.push_str(&format!("; Domain={}", entry.host()));
        }
        if entry.secure {
            cookie.push_str("; Secure");
        }
        if entry.http_only {
            cookie.push_str("; HttpOnly");
        }
        jar.add_cookie_str(&cookie, &url);
    }
    Arc::new(jar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
# This is a generated file! Do not edit.\n\
\n\
.aither.cc\tTRUE\t/\tTRUE\t1767225600\tlaravel_session\tabc123\n\
#HttpOnly_aither.cc\tFALSE\t/\tTRUE\t0\tXSRF-TOKEN\txyz\n\
broken line without tabs\n";

    #[test]
    fn test_parse_netscape() {
        let entries = parse_netscape(SAMPLE);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].domain, ".aither.cc");
        assert!(entries[0].include_subdomains);
        assert_eq!(entries[0].name, "laravel_session");
        assert_eq!(entries[0].value, "abc123");
        assert!(!entries[0].http_only);

        assert_eq!(entries[1].domain, "aither.cc");
        assert!(entries[1].http_only);
        assert_eq!(entries[1].expires, 0);
    }

    #[test]
    fn test_first_domain() {
        let entries = parse_netscape(SAMPLE);
        assert_eq!(first_domain(&entries), Some("aither.cc".to_string()));
        assert_eq!(first_domain(&[]), None);
    }

    #[test]
    fn test_jar_sends_cookies_to_domain() {
        let jar = to_jar(&parse_netscape(SAMPLE));
        let url = Url::parse("https://aither.cc/notifications").unwrap();
        let header = jar.cookies(&url).expect("cookies for domain");
        let header = header.to_str().unwrap();
        assert!(header.contains("laravel_session=abc123"));
        assert!(header.contains("XSRF-TOKEN=xyz"));
    }

    #[test]
    fn test_load_missing_file_is_missing_credentials() {
        let err = load_cookie_file(Path::new("/nonexistent/cookies.txt")).unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials(_)));
    }

    #[test]
    fn test_load_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aither.txt");
        std::fs::write(&path, SAMPLE).unwrap();

        let entries = load_cookie_file(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(domain_from_cookie_file(&path), Some("aither.cc".to_string()));
    }
}
