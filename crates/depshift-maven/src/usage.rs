//! Paged "artifacts using this version" listings of a repository index site.

use depshift_core::UnversionedCoordinate;
use futures::stream::{self, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::future::Future;

static SUBTITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<p class="im-subtitle">(.*?)</p>"#).unwrap());
static ANCHOR_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<a[^>]*>(.*?)</a>").unwrap());

/// Clients listed on one usage page.
///
/// Each entry is a subtitle paragraph with exactly two links: group, then
/// artifact. Anything else on the page is ignored.
pub fn parse_usage_page(html: &str) -> Vec<UnversionedCoordinate> {
    SUBTITLE
        .captures_iter(html)
        .filter_map(|entry| {
            let texts: Vec<String> = ANCHOR_TEXT
                .captures_iter(&entry[1])
                .map(|a| a[1].trim().to_string())
                .collect();
            match texts.as_slice() {
                [group, artifact] if !group.is_empty() && !artifact.is_empty() => {
                    Some(UnversionedCoordinate::new(group.clone(), artifact.clone()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Lazily walks pages 1, 2, ... and yields the clients each page adds.
///
/// The walk ends at the first page that lists nothing new, which also covers
/// sites that keep answering past the last page with a repeat of it.
pub fn usage_pages<F, Fut>(fetch_page: F) -> impl Stream<Item = Vec<UnversionedCoordinate>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Vec<UnversionedCoordinate>>,
{
    let seen: HashSet<UnversionedCoordinate> = HashSet::new();
    stream::unfold(
        (1u32, seen, fetch_page),
        |(page, mut seen, mut fetch_page)| async move {
            let listed = fetch_page(page).await;
            let fresh: Vec<UnversionedCoordinate> = listed
                .into_iter()
                .filter(|client| seen.insert(client.clone()))
                .collect();
            if fresh.is_empty() {
                None
            } else {
                Some((fresh, (page + 1, seen, fetch_page)))
            }
        },
    )
}
