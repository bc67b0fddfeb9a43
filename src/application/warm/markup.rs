//! Structural extraction of warm-up targets from sitemap and homepage markup.

use std::{cell::RefCell, rc::Rc};

use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to parse markup: {0}")]
pub struct MarkupError(String);

#[derive(Default)]
struct TextCollector {
    buffer: String,
    values: Vec<String>,
}

impl TextCollector {
    fn push_chunk(&mut self, chunk: &str, last: bool) {
        self.buffer.push_str(chunk);
        if last {
            let value = std::mem::take(&mut self.buffer);
            self.values.push(value);
        }
    }
}

/// Every `<loc>` entry of a sitemap (or sitemap index), trimmed and unescaped.
pub fn sitemap_locations(xml: &str) -> Result<Vec<String>, MarkupError> {
    let collector = Rc::new(RefCell::new(TextCollector::default()));

    rewrite_str(
        xml,
        RewriteStrSettings {
            element_content_handlers: vec![text!("loc", {
                let collector = Rc::clone(&collector);
                move |chunk| {
                    collector
                        .borrow_mut()
                        .push_chunk(chunk.as_str(), chunk.last_in_text_node());
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| MarkupError(err.to_string()))?;

    let values = std::mem::take(&mut collector.borrow_mut().values);
    Ok(values
        .iter()
        .map(|value| unescape_xml(value.trim()))
        .filter(|value| !value.is_empty())
        .collect())
}

/// Raw asset references in a document: `src`/`href` attribute values and CSS
/// `url(...)` references from `<style>` bodies and `style` attributes.
///
/// Values are returned as written (quotes included for CSS); callers resolve
/// and deduplicate them.
pub fn asset_references(html: &str) -> Result<Vec<String>, MarkupError> {
    let references = Rc::new(RefCell::new(Vec::new()));
    let styles = Rc::new(RefCell::new(TextCollector::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("[src]", {
                    let references = Rc::clone(&references);
                    move |el| {
                        if let Some(src) = el.get_attribute("src") {
                            references.borrow_mut().push(src);
                        }
                        Ok(())
                    }
                }),
                element!("[href]", {
                    let references = Rc::clone(&references);
                    move |el| {
                        if let Some(href) = el.get_attribute("href") {
                            references.borrow_mut().push(href);
                        }
                        Ok(())
                    }
                }),
                element!("[style]", {
                    let references = Rc::clone(&references);
                    move |el| {
                        if let Some(style) = el.get_attribute("style") {
                            references.borrow_mut().extend(css_urls(&style));
                        }
                        Ok(())
                    }
                }),
                text!("style", {
                    let styles = Rc::clone(&styles);
                    move |chunk| {
                        styles
                            .borrow_mut()
                            .push_chunk(chunk.as_str(), chunk.last_in_text_node());
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| MarkupError(err.to_string()))?;

    let mut found = std::mem::take(&mut *references.borrow_mut());
    for sheet in &styles.borrow().values {
        found.extend(css_urls(sheet));
    }
    Ok(found)
}

/// Arguments of every `url(...)` in a CSS fragment, quotes stripped.
pub fn css_urls(css: &str) -> Vec<String> {
    let lower = css.to_ascii_lowercase();
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find("url(") {
        let open = cursor + offset + "url(".len();
        let after = &css[open..];
        let rest = after.trim_start();
        let lead = after.len() - rest.len();

        let (value, consumed) = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let Some(end) = rest[1..].find(quote) else {
                    break;
                };
                (&rest[1..=end], end + 2)
            }
            _ => {
                let Some(end) = rest.find(')') else {
                    break;
                };
                (rest[..end].trim(), end + 1)
            }
        };

        if !value.is_empty() {
            found.push(value.to_string());
        }
        cursor = open + lead + consumed;
    }

    found
}

fn unescape_xml(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
