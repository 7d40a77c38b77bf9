use std::collections::BTreeMap;

use regex::{Captures, Regex};

use url::Url;

use crate::crypto::{click_tracking_id, SigningKey};
use crate::error::{Error, Result};
use crate::model::{CampaignStep, Prospect, QueueItem};

lazy_static::lazy_static! {
    // Absolute http(s) links in double-quoted href attributes
    static ref HREF_REGEX: Regex = Regex::new(r#"href="(https?://[^"]+)""#).unwrap();
}

/// A campaign step personalized for one queue item
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Click tracking id to destination URL for every rewritten link
    pub links: BTreeMap<String, String>,
}

/// Public tracking endpoints rooted at the service's base URL
#[derive(Debug, Clone)]
pub struct TrackingUrls {
    base_url: Url,
}

impl TrackingUrls {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    pub fn pixel(&self, pixel_id: &str) -> Result<Url> {
        self.endpoint(&["track", "pixel", pixel_id])
    }

    pub fn unsubscribe(&self, pixel_id: &str) -> Result<Url> {
        self.endpoint(&["track", "unsubscribe", pixel_id])
    }

    pub fn click(&self, tracking_id: &str, destination: &str) -> Result<Url> {
        let mut url = self.endpoint(&["track", "click", tracking_id])?;
        url.query_pairs_mut().append_pair("url", destination);
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::ParsingError(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Fill placeholders, rewrite links for click tracking and append the open pixel
pub fn render(
    step: &CampaignStep,
    prospect: &Prospect,
    item: &QueueItem,
    urls: &TrackingUrls,
    key: &SigningKey,
) -> Result<RenderedEmail> {
    let mut links = BTreeMap::new();
    let mut rewrite_error = None;

    // Links are rewritten before placeholders are filled so the unsubscribe
    // link is never click-tracked
    let html_body = HREF_REGEX.replace_all(&step.html_body, |caps: &Captures| {
        let destination = caps[1].replace("&amp;", "&");
        let tracking_id = click_tracking_id(key, &item.pixel_id, &destination);
        match urls.click(&tracking_id, &destination) {
            Ok(tracked) => {
                links.insert(tracking_id, destination);
                format!(r#"href="{}""#, html_escape(tracked.as_str()))
            }
            Err(e) => {
                rewrite_error.get_or_insert(e);
                caps[0].to_string()
            }
        }
    });
    if let Some(e) = rewrite_error {
        return Err(e);
    }

    let unsubscribe_url = urls.unsubscribe(&item.pixel_id)?;
    let placeholders = [
        ("{{business_name}}", prospect.business_name.as_str()),
        ("{{contact_name}}", prospect.contact_name.as_str()),
        ("{{unsubscribe_url}}", unsubscribe_url.as_str()),
    ];

    let mut html_body = fill(&html_body, &placeholders);
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none">"#,
        urls.pixel(&item.pixel_id)?
    );
    match html_body.rfind("</body>") {
        Some(at) => html_body.insert_str(at, &pixel),
        None => html_body.push_str(&pixel),
    }

    Ok(RenderedEmail {
        subject: fill(&step.subject, &placeholders),
        html_body,
        text_body: fill(&step.text_body, &placeholders),
        links,
    })
}

fn fill(template: &str, placeholders: &[(&str, &str)]) -> String {
    placeholders
        .iter()
        .fold(template.to_string(), |acc, (name, value)| acc.replace(name, value))
}

fn html_escape(value: &str) -> String {
    value.replace('&', "&amp;")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use secrecy::Secret;

    use uuid::Uuid;

    use crate::model::{fixtures, NewQueueItem, ProspectStatus};

    use super::*;

    fn prospect() -> Prospect {
        Prospect {
            id: Uuid::new_v4(),
            business_name: "Bloom & Co".into(),
            contact_name: "Ada".into(),
            email: "ada@bloom.example".into(),
            segment: "florist".into(),
            status: ProspectStatus::Contacted,
            initial_outreach_at: None,
            last_contact_at: None,
            created_at: Utc::now(),
        }
    }

    fn item(prospect: &Prospect) -> QueueItem {
        NewQueueItem::new(prospect.id, Uuid::new_v4(), "intro", Utc::now()).into_item(Uuid::new_v4())
    }

    fn key() -> SigningKey {
        SigningKey::new(&Secret::new("render-secret".to_string())).unwrap()
    }

    fn urls() -> TrackingUrls {
        TrackingUrls::new(Url::parse("https://track.example.com").unwrap())
    }

    #[test]
    fn tracking_urls_ignore_a_trailing_slash() {
        let with_slash = TrackingUrls::new(Url::parse("https://track.example.com/app/").unwrap());
        let without = TrackingUrls::new(Url::parse("https://track.example.com/app").unwrap());

        assert_eq!(
            "https://track.example.com/app/track/pixel/abc",
            with_slash.pixel("abc").unwrap().as_str()
        );
        assert_eq!(with_slash.pixel("abc").unwrap(), without.pixel("abc").unwrap());
    }

    #[test]
    fn links_are_rewritten_and_registered() {
        let prospect = prospect();
        let item = item(&prospect);
        let step = fixtures::step("intro", 0);

        let rendered = render(&step, &prospect, &item, &urls(), &key()).unwrap();

        assert_eq!(1, rendered.links.len());
        let (tracking_id, destination) = rendered.links.iter().next().unwrap();
        assert_eq!("https://example.com/offer", destination);
        assert!(tracking_id.starts_with(&format!("{}.", item.pixel_id)));
        assert!(rendered
            .html_body
            .contains(&format!("https://track.example.com/track/click/{}?url=", tracking_id)));
        assert!(!rendered.html_body.contains(r#"href="https://example.com/offer""#));
    }

    #[test]
    fn placeholders_pixel_and_unsubscribe_link_are_filled() {
        let prospect = prospect();
        let item = item(&prospect);
        let mut step = fixtures::step("intro", 0);
        step.subject = "A note for {{business_name}}".into();
        step.html_body =
            "<html><body><p>Hi {{contact_name}}</p><a href=\"{{unsubscribe_url}}\">stop</a></body></html>".into();
        step.text_body = "Hi {{contact_name}}. Unsubscribe: {{unsubscribe_url}}".into();

        let rendered = render(&step, &prospect, &item, &urls(), &key()).unwrap();
        let unsubscribe = format!("https://track.example.com/track/unsubscribe/{}", item.pixel_id);

        assert_eq!("A note for Bloom & Co", rendered.subject);
        assert!(rendered.links.is_empty());
        assert!(rendered.html_body.contains(&format!(r#"href="{}""#, unsubscribe)));
        assert!(rendered.html_body.contains(&format!(
            r#"<img src="https://track.example.com/track/pixel/{}""#,
            item.pixel_id
        )));
        assert!(rendered.html_body.ends_with("</body></html>"));
        assert_eq!(format!("Hi Ada. Unsubscribe: {}", unsubscribe), rendered.text_body);
    }

    #[test]
    fn escaped_ampersands_are_decoded_in_destinations() {
        let prospect = prospect();
        let item = item(&prospect);
        let mut step = fixtures::step("intro", 0);
        step.html_body = r#"<a href="https://example.com/?a=1&amp;b=2">go</a>"#.into();

        let rendered = render(&step, &prospect, &item, &urls(), &key()).unwrap();

        assert_eq!(
            Some("https://example.com/?a=1&b=2"),
            rendered.links.values().next().map(String::as_str)
        );
    }
}
