use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::browser::driver::DomSnapshot;
use crate::error::ExtractionError;
use crate::utils::{normalize_url, resolve_link};

/// One form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub field_type: String,
}

/// A form found on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub action: String,
    pub method: String,
    pub fields: Vec<FormField>,
}

/// Links, forms and login signal of a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStructure {
    /// Absolute links, deduplicated by normalized URL, in document order
    pub links: Vec<Url>,
    pub forms: Vec<FormDescriptor>,
    /// At least one password input is present
    pub login_required: bool,
}

impl SiteStructure {
    /// Fold another page's structure into this one, keeping first-seen order
    pub fn merge(&mut self, other: &SiteStructure) {
        let mut seen: HashSet<String> = self.links.iter().map(normalize_url).collect();
        for link in &other.links {
            if seen.insert(normalize_url(link)) {
                self.links.push(link.clone());
            }
        }
        for form in &other.forms {
            if !self.forms.contains(form) {
                self.forms.push(form.clone());
            }
        }
        self.login_required |= other.login_required;
    }
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Selector {
        selector: css.to_string(),
        message: format!("{:?}", e),
    })
}

/// Extracts link graph, form inventory and login signal from a page
#[derive(Debug, Clone)]
pub struct StructureAnalyzer {
    anchors: Selector,
    base: Selector,
    forms: Selector,
    fields: Selector,
    passwords: Selector,
}

impl StructureAnalyzer {
    pub fn new() -> Result<Self, ExtractionError> {
        Ok(Self {
            anchors: selector("a[href]")?,
            base: selector("base[href]")?,
            forms: selector("form")?,
            fields: selector("input, select, textarea, button")?,
            passwords: selector("input[type]")?,
        })
    }

    /// Analyze a snapshot. Offending elements are skipped, never fatal.
    pub fn analyze(&self, snapshot: &DomSnapshot) -> SiteStructure {
        let document = Html::parse_document(&snapshot.html);
        let base = self.base_url(&document, &snapshot.url);

        let links = self.links(&document, &base);
        let forms = document
            .select(&self.forms)
            .filter_map(|form| match self.form(form, &base) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    debug!("{}", e);
                    None
                }
            })
            .collect();
        let login_required = document.select(&self.passwords).any(|input| {
            input
                .value()
                .attr("type")
                .map_or(false, |t| t.trim().eq_ignore_ascii_case("password"))
        });

        SiteStructure {
            links,
            forms,
            login_required,
        }
    }

    /// `<base href>` overrides the document URL when it resolves
    fn base_url(&self, document: &Html, page_url: &Url) -> Url {
        document
            .select(&self.base)
            .next()
            .and_then(|base| base.value().attr("href"))
            .and_then(|href| page_url.join(href.trim()).ok())
            .unwrap_or_else(|| page_url.clone())
    }

    fn links(&self, document: &Html, base: &Url) -> Vec<Url> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for anchor in document.select(&self.anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(url) = resolve_link(base, href) else {
                continue;
            };
            if seen.insert(normalize_url(&url)) {
                links.push(url);
            }
        }

        links
    }

    fn form(&self, form: ElementRef<'_>, base: &Url) -> Result<FormDescriptor, ExtractionError> {
        // A missing action submits to the document itself
        let action = match form.value().attr("action").map(str::trim) {
            None | Some("") => base.clone(),
            Some(raw) => base.join(raw).map_err(|e| ExtractionError::Element {
                element: "form".to_string(),
                reason: format!("unresolvable action {:?}: {}", raw, e),
            })?,
        };

        let method = form
            .value()
            .attr("method")
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "get".to_string());

        let fields = form
            .select(&self.fields)
            .filter_map(|field| {
                let element = field.value();
                let name = element.attr("name").map(str::trim).filter(|n| !n.is_empty())?;
                let field_type = match element.name() {
                    "input" => element
                        .attr("type")
                        .map(|t| t.trim().to_ascii_lowercase())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "text".to_string()),
                    "button" => element
                        .attr("type")
                        .map(|t| t.trim().to_ascii_lowercase())
                        .unwrap_or_else(|| "submit".to_string()),
                    other => other.to_string(),
                };
                Some(FormField {
                    name: name.to_string(),
                    field_type,
                })
            })
            .collect();

        Ok(FormDescriptor {
            action: action.to_string(),
            method,
            fields,
        })
    }
}
