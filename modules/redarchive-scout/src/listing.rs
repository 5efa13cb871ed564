use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use redarchive_common::ListingEntry;

use crate::traits::ListingPage;

static POST_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[data-context='listing']").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.title").expect("valid selector"));
static NEXT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.next-button a[href]").expect("valid selector"));

/// Parse a rendered old-style listing page into entries and the next-page
/// link. Elements missing an id, permalink or timestamp are skipped.
pub fn parse_listing(html: &str, page_url: &str) -> ListingPage {
    let document = Html::parse_document(html);

    let entries = document
        .select(&POST_SELECTOR)
        .filter_map(|element| {
            let entry = entry_from_element(&element);
            if entry.is_none() {
                warn!(
                    page_url,
                    element_id = element.value().attr("id").unwrap_or_default(),
                    "Skipping listing element with missing attributes"
                );
            }
            entry
        })
        .collect();

    let next_page = document
        .select(&NEXT_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve(page_url, href));

    ListingPage { entries, next_page }
}

fn entry_from_element(element: &ElementRef) -> Option<ListingEntry> {
    let attr = |name: &str| {
        element
            .value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let native_id = attr("id")?;
    let permalink = attr("data-permalink")?;
    let timestamp_ms = attr("data-timestamp")?.parse::<i64>().ok()?;

    let title = element
        .select(&TITLE_SELECTOR)
        .next()
        .map(|a| a.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    Some(ListingEntry {
        native_id,
        subreddit: attr("data-subreddit"),
        permalink,
        title,
        timestamp_ms,
        author: attr("data-author"),
        author_fullname: attr("data-author-fullname"),
        kind: attr("data-kind"),
    })
}

fn resolve(page_url: &str, href: &str) -> Option<String> {
    match Url::parse(page_url) {
        Ok(base) => base.join(href).ok().map(String::from),
        Err(_) => Url::parse(href).ok().map(String::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <div id="siteTable">
          <div class="thing" id="thing_t3_1jc301u" data-context="listing"
               data-subreddit="CombatFootage"
               data-permalink="/r/CombatFootage/comments/1jc301u/footage/"
               data-timestamp="1741963920000"
               data-author="someone" data-author-fullname="t2_abc123"
               data-kind="video">
            <div class="entry"><p class="title"><a class="title" href="/r/x">  Footage title </a></p></div>
          </div>
          <div class="thing" id="thing_t3_2abc" data-context="listing"
               data-subreddit="CombatFootage"
               data-permalink="/r/CombatFootage/comments/2abc/other/"
               data-timestamp="1741963000000"
               data-author="[deleted]"
               data-kind="image">
            <a class="title">Other</a>
          </div>
          <div class="thing" id="thing_t3_broken" data-context="listing"></div>
          <div class="thing promoted" id="ad" data-context="ad"></div>
        </div>
        <span class="next-button"><a href="/r/CombatFootage/?count=25&amp;after=t3_2abc">next</a></span>
        </body></html>
    "#;

    #[test]
    fn parses_entries_and_next_link() {
        let page = parse_listing(PAGE, "https://old.reddit.com/r/CombatFootage/");
        assert_eq!(page.entries.len(), 2);

        let first = &page.entries[0];
        assert_eq!(first.native_id, "thing_t3_1jc301u");
        assert_eq!(first.title, "Footage title");
        assert_eq!(first.timestamp_ms, 1_741_963_920_000);
        assert_eq!(first.author_fullname.as_deref(), Some("t2_abc123"));
        assert_eq!(first.kind.as_deref(), Some("video"));

        let second = &page.entries[1];
        assert_eq!(second.author.as_deref(), Some("[deleted]"));
        assert_eq!(second.author_fullname, None);

        assert_eq!(
            page.next_page.as_deref(),
            Some("https://old.reddit.com/r/CombatFootage/?count=25&after=t3_2abc")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let page = parse_listing("<html><body></body></html>", "https://old.reddit.com/r/x/");
        assert!(page.entries.is_empty());
        assert!(page.next_page.is_none());
    }
}
