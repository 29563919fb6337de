//! Site-specific listing adapters for the supported classified-ad portals.
//!
//! Every adapter fetches one query page and extracts `(title, url)` pairs.
//! Listing cards missing either a link or a title are skipped; a page with
//! zero cards is a valid empty result, not an error.

use async_trait::async_trait;
use flatwatch_core::Offer;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::fetch::HttpFetcher;
use crate::{AdapterError, SourceAdapter};

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

/// Portals emit both absolute and site-relative hrefs; resolve against the
/// query page origin and keep the canonical absolute form as identity.
fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

fn extract_cards(
    html: &str,
    base: &Url,
    card_selector: &str,
    link_selector: &str,
    title_selector: &str,
) -> Result<Vec<Offer>, AdapterError> {
    let card_sel = parse_selector(card_selector)?;
    let link_sel = parse_selector(link_selector)?;
    let title_sel = parse_selector(title_selector)?;

    let document = Html::parse_document(html);
    let mut offers = Vec::new();

    for card in document.select(&card_sel) {
        let href = first_attr(card, &link_sel, "href");
        let title = first_text(card, &title_sel)
            .or_else(|| first_text(card, &link_sel))
            .or_else(|| first_attr(card, &link_sel, "title"));

        let (Some(href), Some(title)) = (href, title) else {
            continue;
        };
        let Some(url) = absolutize(base, &href) else {
            continue;
        };
        offers.push(Offer::new(title, url));
    }

    Ok(offers)
}

fn origin_of(query: &Url) -> Result<Url, AdapterError> {
    let origin = query.origin().ascii_serialization();
    Url::parse(&origin).map_err(|e| AdapterError::Parse(format!("query url has no origin: {e}")))
}

async fn fetch_page(
    http: &HttpFetcher,
    host: &'static str,
    query: &Url,
) -> Result<String, AdapterError> {
    Ok(http.fetch_text(host, query.as_str()).await?)
}

pub(crate) fn parse_olx(html: &str, base: &Url) -> Result<Vec<Offer>, AdapterError> {
    extract_cards(html, base, r#"div[data-cy="l-card"]"#, "a[href]", "h6")
}

pub(crate) fn parse_otodom(html: &str, base: &Url) -> Result<Vec<Offer>, AdapterError> {
    extract_cards(
        html,
        base,
        r#"article[data-cy="listing-item"]"#,
        r#"a[data-cy="listing-item-link"]"#,
        r#"p[data-cy="listing-item-title"]"#,
    )
}

pub(crate) fn parse_trojmiasto(html: &str, base: &Url) -> Result<Vec<Offer>, AdapterError> {
    extract_cards(
        html,
        base,
        "div.list__item",
        "a.list__item__content__title__name",
        "a.list__item__content__title__name",
    )
}

pub(crate) fn parse_gratka(html: &str, base: &Url) -> Result<Vec<Offer>, AdapterError> {
    extract_cards(
        html,
        base,
        "article.teaserUnified",
        "a.teaserUnified__anchor",
        "h2.teaserUnified__title",
    )
}

pub(crate) fn parse_morizon(html: &str, base: &Url) -> Result<Vec<Offer>, AdapterError> {
    extract_cards(
        html,
        base,
        "div.mz-card",
        r#"a[href*="/oferta/"]"#,
        "h2.mz-card__title",
    )
}

macro_rules! site_adapter {
    ($name:ident, $host:literal, $parse:ident) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        #[async_trait]
        impl SourceAdapter for $name {
            fn host(&self) -> &'static str {
                $host
            }

            async fn fetch(
                &self,
                http: &HttpFetcher,
                query: &Url,
            ) -> Result<Vec<Offer>, AdapterError> {
                let body = fetch_page(http, $host, query).await?;
                $parse(&body, &origin_of(query)?)
            }
        }
    };
}

site_adapter!(OlxAdapter, "www.olx.pl", parse_olx);
site_adapter!(OtodomAdapter, "www.otodom.pl", parse_otodom);
site_adapter!(TrojmiastoAdapter, "ogloszenia.trojmiasto.pl", parse_trojmiasto);
site_adapter!(GratkaAdapter, "gratka.pl", parse_gratka);
site_adapter!(MorizonAdapter, "www.morizon.pl", parse_morizon);

#[cfg(test)]
mod tests {
    use super::*;

    fn base(origin: &str) -> Url {
        Url::parse(origin).expect("origin url")
    }

    #[test]
    fn olx_cards_yield_title_and_absolute_url() {
        let html = r#"
            <div data-cy="l-card">
              <a href="/d/oferta/mieszkanie-wrzeszcz-ID1.html"><h6>Mieszkanie 3 pokoje Wrzeszcz</h6></a>
            </div>
            <div data-cy="l-card">
              <a href="https://www.olx.pl/d/oferta/kawalerka-ID2.html"><h6>Kawalerka</h6></a>
            </div>
        "#;
        let offers = parse_olx(html, &base("https://www.olx.pl")).unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].title, "Mieszkanie 3 pokoje Wrzeszcz");
        assert_eq!(
            offers[0].url,
            "https://www.olx.pl/d/oferta/mieszkanie-wrzeszcz-ID1.html"
        );
        assert_eq!(
            offers[1].url,
            "https://www.olx.pl/d/oferta/kawalerka-ID2.html"
        );
    }

    #[test]
    fn olx_card_without_title_is_skipped() {
        let html = r#"
            <div data-cy="l-card"><span>promo banner</span></div>
            <div data-cy="l-card">
              <a href="/d/oferta/ok-ID3.html"><h6>Ok</h6></a>
            </div>
        "#;
        let offers = parse_olx(html, &base("https://www.olx.pl")).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].title, "Ok");
    }

    #[test]
    fn otodom_cards_use_listing_item_markers() {
        let html = r#"
            <article data-cy="listing-item">
              <a data-cy="listing-item-link" href="/pl/oferta/mieszkanie-wrzeszcz-ID100">
                <p data-cy="listing-item-title">Mieszkanie, Wrzeszcz, 3 pokoje</p>
              </a>
            </article>
        "#;
        let offers = parse_otodom(html, &base("https://www.otodom.pl")).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].title, "Mieszkanie, Wrzeszcz, 3 pokoje");
        assert_eq!(
            offers[0].url,
            "https://www.otodom.pl/pl/oferta/mieszkanie-wrzeszcz-ID100"
        );
    }

    #[test]
    fn trojmiasto_title_comes_from_link_text() {
        let html = r#"
            <div class="list__item">
              <a class="list__item__content__title__name"
                 href="https://ogloszenia.trojmiasto.pl/nieruchomosci/ogloszenie-1.html">
                 Wynajme mieszkanie Gdansk Wrzeszcz
              </a>
            </div>
        "#;
        let offers =
            parse_trojmiasto(html, &base("https://ogloszenia.trojmiasto.pl")).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].title, "Wynajme mieszkanie Gdansk Wrzeszcz");
    }

    #[test]
    fn gratka_and_morizon_parse_their_card_markup() {
        let gratka_html = r#"
            <article class="teaserUnified">
              <a class="teaserUnified__anchor" href="/nieruchomosci/mieszkanie-ob1"></a>
              <h2 class="teaserUnified__title">Mieszkanie 3-pokojowe</h2>
            </article>
        "#;
        let offers = parse_gratka(gratka_html, &base("https://gratka.pl")).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].url, "https://gratka.pl/nieruchomosci/mieszkanie-ob1");

        let morizon_html = r#"
            <div class="mz-card">
              <a href="/oferta/wynajem-mieszkanie-gdansk-123">
                <h2 class="mz-card__title">Mieszkanie do wynajecia</h2>
              </a>
            </div>
        "#;
        let offers = parse_morizon(morizon_html, &base("https://www.morizon.pl")).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].title, "Mieszkanie do wynajecia");
    }

    #[test]
    fn page_with_no_cards_is_a_valid_empty_result() {
        let offers = parse_olx("<html><body></body></html>", &base("https://www.olx.pl")).unwrap();
        assert!(offers.is_empty());
    }
}
