//! HTML digest rendering.

use std::fmt::Write;

use chrono_tz::Tz;

use crate::datetime::format_datetime;
use crate::feed::{Email, Feeds};

/// Subject line of every digest.
pub const DIGEST_SUBJECT: &str = "RSS feeds notification";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Render the digest body for `email`: one section per site, one list item
/// per feed with its link, title and times in `tz`.
pub fn render_digest(feeds: &Feeds, email: &Email, tz: Tz) -> String {
    let mut body = String::from("<body>");
    for site in feeds.sites(email) {
        let site_feeds = feeds.site_feeds(email, site);
        if site_feeds.is_empty() {
            continue;
        }
        let _ = write!(
            body,
            "<h1>New posts from <a href=\"{}\">{}</a></h1><ol>",
            escape(&site.url),
            escape(&site.name)
        );
        for feed in site_feeds {
            let _ = write!(
                body,
                "<li><a href=\"{}\">{}</a>",
                escape(&feed.link),
                escape(&feed.title)
            );
            if !feed.published_at.is_empty() {
                let _ = write!(
                    body,
                    "&nbsp;{}",
                    format_datetime(&feed.published_at, tz, TIME_FORMAT)
                );
            }
            if !feed.updated_at.is_empty() {
                let _ = write!(
                    body,
                    "&nbsp;(updated {})",
                    format_datetime(&feed.updated_at, tz, TIME_FORMAT)
                );
            }
            body.push_str("</li>");
        }
        body.push_str("</ol>");
    }
    body.push_str("</body>");
    body
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Feed;
    use chrono::Utc;

    fn feed(id: &str, email: &str, site: &str, title: &str) -> Feed {
        Feed {
            id: id.to_string(),
            email: Email::from(email),
            site_url: format!("https://{site}.com/rss"),
            site_name: site.to_string(),
            title: title.to_string(),
            description: String::new(),
            content: String::new(),
            link: format!("https://{site}.com/{id}"),
            updated_at: String::new(),
            published_at: "2024-01-15T10:30:00+00:00".to_string(),
            author: String::new(),
            entry_at: Utc::now(),
            fetch_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_sections_per_site() {
        let mut feeds = Feeds::new();
        feeds.append(vec![
            feed("1", "a@example.com", "foo", "Foo one"),
            feed("2", "a@example.com", "bar", "Bar one"),
            feed("3", "b@example.com", "foo", "Not mine"),
        ]);

        let html = render_digest(&feeds, &Email::from("a@example.com"), chrono_tz::UTC);
        assert!(html.starts_with("<body>"));
        assert!(html.ends_with("</body>"));
        assert!(html.contains(
            "<h1>New posts from <a href=\"https://foo.com/rss\">foo</a></h1>"
        ));
        assert!(html.contains("<a href=\"https://foo.com/1\">Foo one</a>&nbsp;2024-01-15 10:30"));
        assert!(html.contains("Bar one"));
        assert!(!html.contains("Not mine"));
        assert!(html.find("foo.com/rss").unwrap() < html.find("bar.com/rss").unwrap());
    }

    #[test]
    fn test_render_timezone_and_updated() {
        let mut f = feed("1", "a@example.com", "foo", "t");
        f.updated_at = "2024-01-16T00:00:00+00:00".to_string();
        let mut feeds = Feeds::new();
        feeds.append(vec![f]);

        let html = render_digest(&feeds, &Email::from("a@example.com"), chrono_tz::Asia::Tokyo);
        assert!(html.contains("&nbsp;2024-01-15 19:30"));
        assert!(html.contains("(updated 2024-01-16 09:00)"));
    }

    #[test]
    fn test_render_escapes_markup() {
        let mut feeds = Feeds::new();
        feeds.append(vec![feed("1", "a@example.com", "foo", "<b>Tom & \"Jerry\"</b>")]);

        let html = render_digest(&feeds, &Email::from("a@example.com"), chrono_tz::UTC);
        assert!(html.contains("&lt;b&gt;Tom &amp; &quot;Jerry&quot;&lt;/b&gt;"));
    }

    #[test]
    fn test_render_unknown_email_is_empty_body() {
        let feeds = Feeds::new();
        let html = render_digest(&feeds, &Email::from("x@example.com"), chrono_tz::UTC);
        assert_eq!(html, "<body></body>");
    }
}
