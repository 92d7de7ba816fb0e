use crate::config::ExtractionRules;
use crate::utils::text::normalize_text;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::warn;
use url::Url;

/// What could be read off an article page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("Ignoring invalid selector '{}': {}", css, e);
            None
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let selector = selector(css)?;
    document
        .select(&selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = selector(&format!(r#"meta[property="{}"]"#, property))?;
    document
        .select(&selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(|content| content.trim().to_string())
        .find(|content| !content.is_empty())
}

fn paragraphs_text<'a>(elements: impl Iterator<Item = ElementRef<'a>>) -> String {
    let paragraphs: Vec<String> = elements.map(element_text).filter(|p| !p.is_empty()).collect();
    paragraphs.join("\n\n")
}

fn extract_body(document: &Html, rules: &ExtractionRules) -> String {
    let paragraph = match selector("p") {
        Some(paragraph) => paragraph,
        None => return String::new(),
    };

    if let Some(container) = rules.content.as_deref().and_then(selector) {
        if let Some(element) = document.select(&container).next() {
            let body = paragraphs_text(element.select(&paragraph));
            if !body.is_empty() {
                return body;
            }
            let body = element_text(element);
            if !body.is_empty() {
                return body;
            }
        }
    }

    if let Some(article_paragraphs) = selector("article p") {
        let body = paragraphs_text(document.select(&article_paragraphs));
        if !body.is_empty() {
            return body;
        }
    }

    paragraphs_text(document.select(&paragraph))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn extract_date(document: &Html, rules: &ExtractionRules) -> Option<DateTime<Utc>> {
    if let Some(date) = rules.date.as_deref().and_then(selector) {
        for element in document.select(&date) {
            let parsed = element
                .value()
                .attr("datetime")
                .and_then(parse_date)
                .or_else(|| parse_date(&element_text(element)));
            if parsed.is_some() {
                return parsed;
            }
        }
    }
    meta_content(document, "article:published_time").and_then(|raw| parse_date(&raw))
}

/// Pull title, body and date out of an article page, trying the source's
/// selectors first and generic markup after.
pub fn extract_article(html: &str, rules: &ExtractionRules) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = rules
        .title
        .as_deref()
        .and_then(|css| first_text(&document, css))
        .or_else(|| first_text(&document, "h1"))
        .or_else(|| meta_content(&document, "og:title"))
        .or_else(|| first_text(&document, "title"));

    ExtractedPage {
        title,
        body: extract_body(&document, rules),
        published_at: extract_date(&document, rules),
    }
}

/// Find article links on a listing page, resolved against `base_url`.
///
/// With an `article_link` selector every matching anchor counts. Otherwise
/// only hrefs that look like article paths are kept.
pub fn discover_article_links(html: &str, base_url: &str, rules: &ExtractionRules, limit: usize) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let (css, filter_paths) = match rules.article_link.as_deref() {
        Some(css) => (css, false),
        None => ("a[href]", true),
    };
    let Some(anchors) = selector(css) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if filter_paths && !["article", "story", "/20"].iter().any(|marker| href.contains(marker)) {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        resolved.set_fragment(None);
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            links.push(resolved);
            if links.len() >= limit {
                break;
            }
        }
    }
    links
}

/// Plain text of an HTML fragment, e.g. feed `content:encoded`.
pub fn html_to_text(fragment: &str) -> String {
    let document = Html::parse_fragment(fragment);
    let Some(block) = selector("p, li, h2, h3, blockquote") else {
        return String::new();
    };
    let blocks = paragraphs_text(document.select(&block));
    if !blocks.is_empty() {
        return blocks;
    }
    normalize_text(&document.root_element().text().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>Site | Chips get faster</title>
        <meta property="article:published_time" content="2024-01-02T08:00:00Z">
      </head><body>
        <nav><p>Menu</p></nav>
        <h1 class="article__title">Chips get faster</h1>
        <time class="article__date" datetime="2024-01-01T10:00:00Z">Jan 1</time>
        <div class="article-content">
          <p>The first paragraph explains the news.</p>
          <p>The second paragraph adds   detail.</p>
        </div>
      </body></html>"#;

    fn rules() -> ExtractionRules {
        ExtractionRules {
            title: Some("h1.article__title".to_string()),
            content: Some("div.article-content".to_string()),
            date: Some("time.article__date".to_string()),
            article_link: None,
        }
    }

    #[test]
    fn extracts_with_configured_selectors() {
        let page = extract_article(PAGE, &rules());
        assert_eq!(page.title.as_deref(), Some("Chips get faster"));
        assert_eq!(
            page.body,
            "The first paragraph explains the news.\n\nThe second paragraph adds detail."
        );
        assert_eq!(page.published_at.map(|d| d.to_rfc3339()), Some("2024-01-01T10:00:00+00:00".to_string()));
    }

    #[test]
    fn falls_back_to_generic_markup() {
        let page = extract_article(PAGE, &ExtractionRules::default());
        assert_eq!(page.title.as_deref(), Some("Chips get faster"));
        assert!(page.body.starts_with("Menu"));
        assert_eq!(page.published_at.map(|d| d.to_rfc3339()), Some("2024-01-02T08:00:00+00:00".to_string()));
    }

    #[test]
    fn title_only_pages_have_no_body() {
        let page = extract_article("<html><body><h1>Only a title</h1></body></html>", &rules());
        assert!(page.title.is_some());
        assert!(page.body.is_empty());
    }

    #[test]
    fn discovers_article_like_links() {
        let html = r##"<html><body>
            <a href="/2024/01/01/chips">Chips</a>
            <a href="/about">About</a>
            <a href="https://example.com/story/robots#comments">Robots</a>
            <a href="/2024/01/01/chips">Chips again</a>
            <a href="mailto:desk@example.com">Mail</a>
        </body></html>"##;
        let links = discover_article_links(html, "https://example.com/", &ExtractionRules::default(), 10);
        assert_eq!(
            links,
            vec![
                "https://example.com/2024/01/01/chips".to_string(),
                "https://example.com/story/robots".to_string(),
            ]
        );
    }

    #[test]
    fn strips_feed_html() {
        assert_eq!(html_to_text("<p>One <b>bold</b> line.</p><p>Two.</p>"), "One bold line.\n\nTwo.");
        assert_eq!(html_to_text("plain words"), "plain words");
    }
}
