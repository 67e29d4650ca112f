//! HTML 解析辅助函数

use scraper::{ElementRef, Selector};
use url::Url;

use crate::error::FetchError;

/// 解析 CSS 选择器
pub fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("invalid selector {css:?}: {e:?}")))
}

/// 元素的可见文本，空白片段以单个空格连接
pub fn element_text(element: &ElementRef<'_>) -> String {
    join_text(element, " ")
}

/// 元素的可见文本，使用指定分隔符连接
pub fn join_text(element: &ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// 最近的指定标签祖先元素
pub fn ancestor<'a>(element: &ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == tag)
}

/// 将相对链接转为绝对地址
pub fn absolute_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            href.trim_start_matches('/')
        ),
    }
}

/// URL 路径最后一段（常用作站点条目 ID）
pub fn last_path_segment(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

/// 去掉 HTML 标签
pub fn strip_tags(html: &str) -> String {
    match regex::Regex::new(r"<[^>]*>") {
        Ok(re) => re.replace_all(html, "").trim().to_string(),
        Err(_) => html.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            absolute_url("https://aither.cc", "/notifications/12"),
            "https://aither.cc/notifications/12"
        );
        assert_eq!(
            absolute_url("https://aither.cc/", "https://other.org/x"),
            "https://other.org/x"
        );
        assert_eq!(
            absolute_url("https://www.torrentleech.org/", "profile/bob/notifications"),
            "https://www.torrentleech.org/profile/bob/notifications"
        );
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(last_path_segment("https://x.org/notifications/42/"), "42");
        assert_eq!(last_path_segment("https://x.org/mail/inbox/7"), "7");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<p>Hello <b>there</b></p>"), "Hello there");
    }

    #[test]
    fn test_element_text_and_ancestor() {
        let doc = Html::parse_document(
            "<table><tr><td class=\"x\">  Hello\n <b>world</b> </td></tr></table>",
        );
        let sel = selector("td.x").unwrap();
        let cell = doc.select(&sel).next().unwrap();
        assert_eq!(element_text(&cell), "Hello world");
        assert!(ancestor(&cell, "tr").is_some());
        assert!(ancestor(&cell, "form").is_none());
    }
}
