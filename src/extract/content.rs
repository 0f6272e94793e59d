use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::driver::{DomSnapshot, RenderedSize};
use crate::error::ExtractionError;

/// Elements whose text is considered content, plus images
const CONTENT_SELECTOR: &str = "p, h1, h2, h3, article, img";

/// A content item admitted by the extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractedContentItem {
    Text {
        content: String,
        /// Upper-case tag name of the source element, e.g. `P`
        source_element: String,
    },
    Image {
        src: String,
        alt_text: String,
    },
}

/// Admission thresholds
#[derive(Debug, Clone, Copy)]
pub struct ContentThresholds {
    /// Text must be strictly longer than this, in characters
    pub min_text_length: usize,
    /// Images must be strictly wider and taller than these, in pixels
    pub min_image_width: u32,
    pub min_image_height: u32,
}

impl Default for ContentThresholds {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            min_image_width: 100,
            min_image_height: 100,
        }
    }
}

/// Heuristic text and image extraction; omits what it cannot judge
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    thresholds: ContentThresholds,
    content: Selector,
}

impl ContentExtractor {
    pub fn new(thresholds: ContentThresholds) -> Result<Self, ExtractionError> {
        let content = Selector::parse(CONTENT_SELECTOR).map_err(|e| ExtractionError::Selector {
            selector: CONTENT_SELECTOR.to_string(),
            message: format!("{:?}", e),
        })?;
        Ok(Self {
            thresholds,
            content,
        })
    }

    /// Extract qualifying items in document order
    pub fn extract(&self, snapshot: &DomSnapshot) -> Vec<ExtractedContentItem> {
        let document = Html::parse_document(&snapshot.html);

        document
            .select(&self.content)
            .filter(|element| !is_hidden(*element))
            .filter_map(|element| match element.value().name() {
                "img" => self.image(element, snapshot),
                tag => self.text(element, tag),
            })
            .collect()
    }

    fn text(&self, element: ElementRef<'_>, tag: &str) -> Option<ExtractedContentItem> {
        let content = element.text().collect::<Vec<_>>().join(" ");
        let content = content.split_whitespace().collect::<Vec<_>>().join(" ");

        if content.chars().count() <= self.thresholds.min_text_length {
            return None;
        }

        Some(ExtractedContentItem::Text {
            content,
            source_element: tag.to_ascii_uppercase(),
        })
    }

    fn image(&self, element: ElementRef<'_>, snapshot: &DomSnapshot) -> Option<ExtractedContentItem> {
        let img = element.value();
        let raw_src = img.attr("src").map(str::trim).filter(|s| !s.is_empty())?;
        let src = match snapshot.url.join(raw_src) {
            Ok(url) => url.to_string(),
            Err(e) => {
                debug!("Skipping image with unresolvable src {:?}: {}", raw_src, e);
                return None;
            }
        };

        // Driver-measured size wins over declared attributes
        let size = snapshot.image_sizes.get(&src).copied().or_else(|| {
            Some(RenderedSize {
                width: pixel_attr(img.attr("width"))?,
                height: pixel_attr(img.attr("height"))?,
            })
        })?;

        if size.width <= self.thresholds.min_image_width
            || size.height <= self.thresholds.min_image_height
        {
            return None;
        }

        Some(ExtractedContentItem::Image {
            src,
            alt_text: img.attr("alt").unwrap_or_default().trim().to_string(),
        })
    }
}

/// Parse `120` or `120px`; anything else is unknown
fn pixel_attr(value: Option<&str>) -> Option<u32> {
    let value = value?.trim();
    value.strip_suffix("px").unwrap_or(value).trim().parse().ok()
}

/// Hidden via the `hidden` attribute, `aria-hidden`, or an inline `display:none`
fn is_hidden(element: ElementRef<'_>) -> bool {
    std::iter::successors(Some(element), |e| e.parent().and_then(ElementRef::wrap)).any(|e| {
        let value = e.value();
        value.attr("hidden").is_some()
            || value.attr("aria-hidden") == Some("true")
            || value.attr("style").map_or(false, |style| {
                style
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_ascii_lowercase()
                    .contains("display:none")
            })
    })
}
