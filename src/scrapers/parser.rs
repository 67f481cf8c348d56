use crate::models::{ListingDraft, ListingRecord};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://www.immobilienscout24.de";

const CARD_SELECTOR: &str = "[data-is24-expose-id], article[data-obid]";
const TITLE_SELECTORS: &[&str] = &[
    ".result-list-entry__brand-title",
    ".result-list-entry__data h5",
    "h2",
    "h3",
];
const PRICE_SELECTORS: &[&str] = &[
    "[data-qa='cold-rent']",
    ".result-list-entry__primary-criterion strong",
    ".result-list-entry__finance strong",
];
const ROOMS_SELECTORS: &[&str] = &["[data-qa='rooms']"];
const SIZE_SELECTORS: &[&str] = &["[data-qa='livingSpace']"];
const CRITERION_SELECTOR: &str = ".result-list-entry__primary-criterion";
const DISTRICT_SELECTORS: &[&str] = &[
    ".result-list-entry__address",
    "address",
    "[data-qa='district']",
];
const LINK_SELECTOR: &str = "a[href]";

/// Turns search result markup into listing records.
///
/// Cards that miss a required field are skipped, never reported as errors.
pub struct ListingParser {
    base_url: String,
    cards: Selector,
    title: Vec<Selector>,
    price: Vec<Selector>,
    rooms: Vec<Selector>,
    size: Vec<Selector>,
    criterion: Selector,
    district: Vec<Selector>,
    link: Selector,
    price_number: Regex,
    decimal_number: Regex,
    trailing_digits: Regex,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {:?}: {:?}", css, e))
}

fn selectors(list: &[&str]) -> Result<Vec<Selector>> {
    list.iter().map(|css| selector(css)).collect()
}

impl ListingParser {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cards: selector(CARD_SELECTOR)?,
            title: selectors(TITLE_SELECTORS)?,
            price: selectors(PRICE_SELECTORS)?,
            rooms: selectors(ROOMS_SELECTORS)?,
            size: selectors(SIZE_SELECTORS)?,
            criterion: selector(CRITERION_SELECTOR)?,
            district: selectors(DISTRICT_SELECTORS)?,
            link: selector(LINK_SELECTOR)?,
            price_number: Regex::new(r"\d[\d.\s]*(?:,\d+)?").context("Invalid price pattern")?,
            decimal_number: Regex::new(r"\d+(?:[.,]\d+)?").context("Invalid decimal pattern")?,
            trailing_digits: Regex::new(r"(\d+)$").context("Invalid id pattern")?,
        })
    }

    /// Parse every card in document order
    pub fn parse(&self, html: &str) -> Vec<ListingRecord> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for (idx, card) in document.select(&self.cards).enumerate() {
            let Some(draft) = self.extract(card) else {
                debug!("Skipped card {}: missing required fields", idx);
                continue;
            };
            match draft.validate() {
                Ok(listing) => listings.push(listing),
                Err(e) => debug!("Skipped card {}: {}", idx, e),
            }
        }

        debug!("Parsed {} listings", listings.len());
        listings
    }

    fn extract(&self, card: ElementRef) -> Option<ListingDraft> {
        let attrs = card.value();
        let present = |name: &str| attrs.attr(name).filter(|v| !v.trim().is_empty());
        let raw_id = present("data-is24-expose-id")
            .or_else(|| present("data-obid"))
            .or_else(|| present("id"))?;
        let external_id = self.normalize_id(raw_id)?;

        let title = first_text(card, &self.title)?;
        let price_eur = first_text(card, &self.price).and_then(|text| self.parse_price(&text))?;
        let detail_url = self.detail_url(card)?;

        Some(ListingDraft {
            external_id,
            title,
            price_eur,
            rooms: self.measure(card, &self.rooms, "Zimmer"),
            size_sqm: self.measure(card, &self.size, "m²"),
            district: first_text(card, &self.district),
            detail_url,
        })
    }

    /// Trailing digit run of the raw id, or the trimmed id if it has none
    fn normalize_id(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let id = self
            .trailing_digits
            .captures(raw)
            .and_then(|c| c.get(1))
            .map_or(raw, |m| m.as_str());
        Some(id.to_string())
    }

    /// `"1.234,00 €"` is 1234: dots and spaces group thousands, cents are dropped
    fn parse_price(&self, text: &str) -> Option<i64> {
        let number = self.price_number.find(text)?.as_str();
        let whole = number.split(',').next().unwrap_or(number);
        let digits: String = whole.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    fn parse_decimal(&self, text: &str) -> Option<f64> {
        let number = self.decimal_number.find(text)?.as_str();
        number.replace(',', ".").parse().ok()
    }

    /// Dedicated selector first, then any primary criterion mentioning `label`
    fn measure(&self, card: ElementRef, dedicated: &[Selector], label: &str) -> Option<f64> {
        let text = dedicated
            .iter()
            .find_map(|sel| card.select(sel).next())
            .map(element_text)
            .or_else(|| {
                card.select(&self.criterion)
                    .map(element_text)
                    .find(|text| text.contains(label))
            })?;
        self.parse_decimal(&text)
    }

    fn detail_url(&self, card: ElementRef) -> Option<String> {
        let href = card.select(&self.link).next()?.value().attr("href")?.trim();
        if href.is_empty() {
            return None;
        }
        if href.starts_with("http") {
            return Some(href.to_string());
        }
        Some(format!("{}/{}", self.base_url, href.trim_start_matches('/')))
    }
}

/// Text of the element with whitespace collapsed
fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(card: ElementRef, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        card.select(sel)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}
