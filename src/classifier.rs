use anyhow::anyhow;
use regex::Regex;
use reqwest::Url;

use crate::types::{DiscoveredLink, LinkKind};

lazy_static! {
    // /<owner>/<photo|video>/<numeric id>
    static ref MEDIA_PATH: Regex =
        Regex::new(r"^/([^/]+)/(photo|video)/(\d+)(?:/|$)").expect("media path pattern");
}

/// Sorts the hrefs harvested from a listing page into photo and video detail links.
#[derive(Debug, Clone)]
pub struct LinkClassifier {
    host: String,
}

impl LinkClassifier {
    pub fn new(host: &str) -> Self {
        LinkClassifier {
            host: host.to_lowercase(),
        }
    }

    /// Builds a classifier accepting links on the same host as `url`.
    pub fn for_entry_url(url: &str) -> anyhow::Result<Self> {
        let u = Url::parse(url).map_err(|e| anyhow!("url passed is invalid {}: {}", url, e))?;
        match u.host_str() {
            Some(host) => Ok(Self::new(host)),
            None => Err(anyhow!("url must have a valid host: {}", url)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn classify(&self, raw_url: &str) -> Option<DiscoveredLink> {
        let url = Url::parse(raw_url).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if !same_site(url.host_str()?, &self.host) {
            return None;
        }

        let caps = MEDIA_PATH.captures(url.path())?;
        let kind = match &caps[2] {
            "photo" => LinkKind::Photo,
            "video" => LinkKind::Video,
            _ => return None,
        };

        Some(DiscoveredLink {
            url: raw_url.to_string(),
            kind,
            owner: caps[1].to_string(),
            id: caps[3].to_string(),
        })
    }

    /// Classifies every url, dropping non-matches and keeping harvest order and repeats.
    pub fn classify_all(&self, raw_urls: &[String]) -> Vec<DiscoveredLink> {
        raw_urls.iter().filter_map(|u| self.classify(u)).collect()
    }
}

// `www.host` and `host` name the same site
fn same_site(host: &str, expected: &str) -> bool {
    let bare = |h: &str| -> String {
        let h = h.to_lowercase();
        match h.strip_prefix("www.") {
            Some(rest) => rest.to_string(),
            None => h,
        }
    };
    bare(host) == bare(expected)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_photo_and_video_links() {
        let c = LinkClassifier::new("site");

        let photo = c.classify("https://site/alice/photo/123").unwrap();
        assert_eq!(photo.kind, LinkKind::Photo);
        assert_eq!(photo.owner, "alice");
        assert_eq!(photo.id, "123");

        let video = c.classify("https://site/alice/video/45").unwrap();
        assert_eq!(video.kind, LinkKind::Video);
        assert_eq!(video.owner, "alice");
    }

    #[test]
    fn drops_links_outside_the_media_shape() {
        let c = LinkClassifier::new("site");
        assert!(c.classify("https://site/alice/forum/1").is_none());
        assert!(c.classify("https://site/alice/photo/abc").is_none());
        assert!(c.classify("https://site/alice/photo/12abc").is_none());
        assert!(c.classify("https://site/alice").is_none());
        assert!(c.classify("https://other/alice/photo/1").is_none());
        assert!(c.classify("mailto:alice@site").is_none());
        assert!(c.classify("javascript:void(0)").is_none());
        assert!(c.classify("").is_none());
    }

    #[test]
    fn kind_comes_from_the_path_segment_not_a_substring() {
        let c = LinkClassifier::new("site");
        // owner name contains "video" but the media segment says photo
        let l = c.classify("https://site/videographer/photo/7").unwrap();
        assert_eq!(l.kind, LinkKind::Photo);
        assert_eq!(l.owner, "videographer");
    }

    #[test]
    fn query_and_trailing_slash_are_tolerated() {
        let c = LinkClassifier::new("site");
        assert!(c.classify("https://site/bob/video/9/").is_some());
        assert!(c.classify("https://site/bob/video/9?ref=list").is_some());
    }

    #[test]
    fn classify_all_keeps_order_and_repeats() {
        let c = LinkClassifier::for_entry_url("https://site/bob").unwrap();
        let raw = vec![
            "https://site/bob/video/2".to_string(),
            "https://site/about".to_string(),
            "https://site/bob/photo/1".to_string(),
            "https://site/bob/video/2".to_string(),
        ];
        let links = c.classify_all(&raw);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://site/bob/video/2",
                "https://site/bob/photo/1",
                "https://site/bob/video/2"
            ]
        );
    }

    #[test]
    fn www_prefix_is_the_same_site() {
        let bare = LinkClassifier::new("site.example");
        assert!(bare.classify("https://www.site.example/bob/photo/1").is_some());

        let www = LinkClassifier::for_entry_url("https://www.site.example/bob").unwrap();
        assert!(www.classify("https://site.example/bob/photo/1").is_some());
        assert!(www.classify("https://www.site.example/bob/video/2").is_some());

        assert!(www.classify("https://cdn.site.example/bob/photo/1").is_none());
        assert!(bare.classify("https://wwwsite.example/bob/photo/1").is_none());
    }

    #[test]
    fn entry_url_must_have_a_host() {
        assert!(LinkClassifier::for_entry_url("not a url").is_err());
        assert_eq!(
            LinkClassifier::for_entry_url("https://Site.Example/bob")
                .unwrap()
                .host(),
            "site.example"
        );
    }
}
