//! HTML to text rendering for fetched pages.
//!
//! Picks the main content area, strips navigation chrome, and converts the
//! remainder to Markdown-flavoured text with `htmd`. Also pulls the title,
//! the declared language, and outbound links.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static HTML_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("html").expect("valid selector"));
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static CHROME_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("nav, header, footer, aside, script, style, noscript, .sidebar, .nav")
        .expect("valid selector")
});

/// Content containers tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &["main", "article", r#"[role="main"]"#, ".content", "body"];

/// Text and metadata rendered from one HTML page.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub text: String,
    pub title: Option<String>,
    pub language: Option<String>,
    pub links: Vec<String>,
}

/// Render an HTML document fetched from `base_url`.
pub fn render_html(html: &str, base_url: &Url) -> RenderedPage {
    let doc = Html::parse_document(html);

    RenderedPage {
        text: extract_text(&doc),
        title: extract_title(&doc),
        language: extract_language(&doc),
        links: extract_links(&doc, base_url),
    }
}

fn extract_title(doc: &Html) -> Option<String> {
    let from = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    };
    from(&TITLE_SEL).or_else(|| from(&H1_SEL))
}

fn extract_language(doc: &Html) -> Option<String> {
    doc.select(&HTML_SEL)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}

fn extract_text(doc: &Html) -> String {
    let Some(content) = content_root(doc) else {
        return String::new();
    };
    let html = strip_chrome(&content.inner_html());

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    match converter.convert(&html) {
        Ok(md) => md.trim().to_string(),
        Err(e) => {
            debug!(error = %e, "htmd conversion failed, using plain text");
            Html::parse_fragment(&html)
                .root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string()
        }
    }
}

fn content_root(doc: &Html) -> Option<ElementRef<'_>> {
    CONTENT_SELECTORS.iter().find_map(|s| {
        let sel = Selector::parse(s).ok()?;
        doc.select(&sel).next()
    })
}

/// Strip common navigation/chrome elements from HTML content.
fn strip_chrome(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut result = html.to_string();
    for el in doc.select(&CHROME_SEL) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Extract all links from a document, resolved against the base URL.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            let s = resolved.to_string();
            if !links.contains(&s) {
                links.push(s);
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<!doctype html>
<html lang="en-GB">
<head><title>About ITNB</title><script>var analytics = 1;</script></head>
<body>
  <nav><a href="/en">Home</a><a href="/en/contact">Contact</a></nav>
  <main>
    <h1>About us</h1>
    <p>We build sovereign cloud infrastructure in Switzerland.</p>
    <a href="/en/team#leaders">Team</a>
    <a href="https://www.linkedin.com/company/itnb">LinkedIn</a>
    <a href="#top">Top</a>
    <a href="mailto:info@itnb.ch">Mail</a>
  </main>
  <footer>Copyright ITNB AG</footer>
</body>
</html>"##;

    #[test]
    fn renders_title_language_and_text() {
        let base = Url::parse("https://www.itnb.ch/en/about").unwrap();
        let page = render_html(PAGE, &base);

        assert_eq!(page.title.as_deref(), Some("About ITNB"));
        assert_eq!(page.language.as_deref(), Some("en-GB"));
        assert!(page.text.contains("sovereign cloud infrastructure"));
        assert!(!page.text.contains("Copyright"));
        assert!(!page.text.contains("analytics"));
    }

    #[test]
    fn extracts_resolved_links_from_whole_page() {
        let base = Url::parse("https://www.itnb.ch/en/about").unwrap();
        let page = render_html(PAGE, &base);

        assert!(page.links.contains(&"https://www.itnb.ch/en".to_string()));
        assert!(page.links.contains(&"https://www.itnb.ch/en/team".to_string()));
        assert!(page.links.contains(&"https://www.linkedin.com/company/itnb".to_string()));
        assert!(!page.links.iter().any(|l| l.starts_with("mailto:")));
        assert!(!page.links.iter().any(|l| l.contains('#')));
    }

    #[test]
    fn falls_back_to_h1_title() {
        let html = "<html><body><h1>Careers</h1><p>Join us.</p></body></html>";
        let base = Url::parse("https://www.itnb.ch/en/careers").unwrap();
        let page = render_html(html, &base);
        assert_eq!(page.title.as_deref(), Some("Careers"));
        assert_eq!(page.language, None);
    }
}
