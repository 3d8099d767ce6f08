//! Validating adapter for scholarly profile and search pages
//!
//! Pure functions from an HTML body to typed page models. Schema drift
//! upstream surfaces here as a `ScholarParseError` and nowhere else.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Rows per subject-profile page (`pagesize`)
pub const PROFILE_PAGE_SIZE: usize = 100;

/// Results per citing-works page
pub const CITATIONS_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScholarParseError {
    #[error("missing element: {0}")]
    MissingElement(&'static str),

    #[error("invalid number in {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("empty {0}")]
    Empty(&'static str),
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static PROFILE_NAME: Lazy<Selector> = Lazy::new(|| selector("#gsc_prf_in"));
static PROFILE_ROW: Lazy<Selector> = Lazy::new(|| selector("tr.gsc_a_tr"));
static ROW_TITLE: Lazy<Selector> = Lazy::new(|| selector("a.gsc_a_at"));
static ROW_CITED_BY: Lazy<Selector> = Lazy::new(|| selector("a.gsc_a_ac"));
static PROFILE_INFO_LINE: Lazy<Selector> = Lazy::new(|| selector("div.gsc_prf_il"));
static ORG_LINK: Lazy<Selector> = Lazy::new(|| selector("a.gsc_prf_ila"));
static ORG_HEADER: Lazy<Selector> = Lazy::new(|| selector("h2.gsc_authors_header"));
static RESULTS_CONTAINER: Lazy<Selector> = Lazy::new(|| selector("#gs_res_ccl"));
static RESULT_ITEM: Lazy<Selector> = Lazy::new(|| selector("div.gs_ri"));
static RESULT_TITLE: Lazy<Selector> = Lazy::new(|| selector("h3.gs_rt"));
static RESULT_AUTHOR_LINK: Lazy<Selector> = Lazy::new(|| selector("div.gs_a a[href]"));
static RESULT_FOOTER_LINK: Lazy<Selector> = Lazy::new(|| selector("div.gs_fl a"));
static PAGE_NAV_LINK: Lazy<Selector> = Lazy::new(|| selector("a.gs_nma"));

static TITLE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:HTML|PDF|BOOK|B|CITATION|C|DOC)\]").expect("static regex is valid"));
static VERIFIED_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)verified email at\s+([A-Za-z0-9.\-]+\.[A-Za-z]{2,})").expect("static regex is valid")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex is valid"));

/// Markers of an anti-automation page, matched case-insensitively
const BLOCK_MARKERS: &[(&str, &str)] = &[
    ("not a robot", "robot check"),
    ("unusual traffic from your computer network", "unusual traffic"),
    ("id=\"gs_captcha", "CAPTCHA"),
    ("g-recaptcha", "CAPTCHA"),
    ("id=\"captcha", "CAPTCHA"),
    ("access denied", "access denied"),
];

/// One row of the subject's profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRow {
    pub title: String,
    pub citation_count: u32,
    pub cites_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePage {
    pub name: String,
    pub rows: Vec<ProfileRow>,
}

/// One search result on a citing-works page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationEntry {
    pub title: String,
    /// Linked author profile ids, in byline order
    pub author_ids: Vec<String>,
    pub cited_by: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationsPage {
    pub entries: Vec<CitationEntry>,
    pub has_next: bool,
}

/// Header of a citing author's profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorProfile {
    pub name: String,
    pub affiliation: Option<String>,
    pub organization_id: Option<String>,
    pub email_domain: Option<String>,
}

/// Name of the anti-automation marker found in `html`, if any
pub fn detect_block(html: &str) -> Option<&'static str> {
    let lower = html.to_lowercase();
    BLOCK_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, label)| *label)
}

/// Subject profile page: name plus one page of publication rows
pub fn parse_profile_page(html: &str) -> Result<ProfilePage, ScholarParseError> {
    let document = Html::parse_document(html);

    let name = document
        .select(&PROFILE_NAME)
        .next()
        .map(collapsed_text)
        .ok_or(ScholarParseError::MissingElement("profile name"))?;
    if name.is_empty() {
        return Err(ScholarParseError::Empty("profile name"));
    }

    let mut rows = Vec::new();
    for row in document.select(&PROFILE_ROW) {
        let title = row
            .select(&ROW_TITLE)
            .next()
            .map(collapsed_text)
            .ok_or(ScholarParseError::MissingElement("publication title"))?;
        if title.is_empty() {
            continue;
        }

        let (citation_count, cites_ids) = match row.select(&ROW_CITED_BY).next() {
            Some(link) => {
                let count = parse_count(&collapsed_text(link), "citation count")?;
                let ids = link
                    .value()
                    .attr("href")
                    .and_then(|href| query_param(href, "cites"))
                    .map(|ids| {
                        ids.split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                (count, ids)
            }
            None => (0, Vec::new()),
        };

        rows.push(ProfileRow {
            title,
            citation_count,
            cites_ids,
        });
    }

    Ok(ProfilePage { name, rows })
}

/// One page of works citing a publication
///
/// `page_index` is 0-based; `has_next` is true when the navigation bar links
/// the following page.
pub fn parse_citations_page(
    html: &str,
    page_index: usize,
) -> Result<CitationsPage, ScholarParseError> {
    let document = Html::parse_document(html);

    if document.select(&RESULTS_CONTAINER).next().is_none() {
        return Err(ScholarParseError::MissingElement("results container"));
    }

    let mut entries = Vec::new();
    for item in document.select(&RESULT_ITEM) {
        let Some(title_el) = item.select(&RESULT_TITLE).next() else {
            continue;
        };
        let title = clean_title(&collapsed_text(title_el));
        if title.is_empty() {
            continue;
        }

        let mut author_ids: Vec<String> = Vec::new();
        for link in item.select(&RESULT_AUTHOR_LINK) {
            if let Some(id) = link.value().attr("href").and_then(|h| query_param(h, "user")) {
                if !author_ids.contains(&id) {
                    author_ids.push(id);
                }
            }
        }

        let mut cited_by = 0;
        for link in item.select(&RESULT_FOOTER_LINK) {
            let text = collapsed_text(link);
            if let Some(count) = text.strip_prefix("Cited by ") {
                cited_by = parse_count(count, "cited by")?;
                break;
            }
        }

        entries.push(CitationEntry {
            title,
            author_ids,
            cited_by,
        });
    }

    let next_label = (page_index + 2).to_string();
    let has_next = document
        .select(&PAGE_NAV_LINK)
        .any(|link| collapsed_text(link) == next_label);

    Ok(CitationsPage { entries, has_next })
}

/// Citing author's profile header
pub fn parse_author_page(html: &str) -> Result<AuthorProfile, ScholarParseError> {
    let document = Html::parse_document(html);

    let name = document
        .select(&PROFILE_NAME)
        .next()
        .map(collapsed_text)
        .ok_or(ScholarParseError::MissingElement("author name"))?;
    if name.is_empty() {
        return Err(ScholarParseError::Empty("author name"));
    }

    let mut affiliation = None;
    let mut organization_id = None;
    let mut email_domain = None;

    for line in document.select(&PROFILE_INFO_LINE) {
        let text = collapsed_text(line);
        if line.value().attr("id") == Some("gsc_prf_ivh") {
            email_domain = VERIFIED_EMAIL
                .captures(&text)
                .map(|caps| caps[1].trim_end_matches('.').to_lowercase());
            continue;
        }
        if affiliation.is_none() && !text.is_empty() {
            organization_id = line
                .select(&ORG_LINK)
                .filter_map(|link| link.value().attr("href"))
                .find_map(|href| query_param(href, "org"));
            affiliation = Some(text);
        }
    }

    Ok(AuthorProfile {
        name,
        affiliation,
        organization_id,
        email_domain,
    })
}

/// Official name on an organization page
pub fn parse_org_page(html: &str) -> Result<String, ScholarParseError> {
    let document = Html::parse_document(html);
    let header = document
        .select(&ORG_HEADER)
        .next()
        .map(collapsed_text)
        .ok_or(ScholarParseError::MissingElement("organization header"))?;

    let name = header.replace("Learn more", "").trim().to_string();
    if name.is_empty() {
        return Err(ScholarParseError::Empty("organization name"));
    }
    Ok(name)
}

fn collapsed_text(element: ElementRef<'_>) -> String {
    let raw: String = element.text().collect();
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

fn clean_title(raw: &str) -> String {
    let stripped = TITLE_MARKER.replace_all(raw, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

fn parse_count(text: &str, field: &'static str) -> Result<u32, ScholarParseError> {
    let digits: String = text.chars().filter(|c| !matches!(c, ',' | '.' | '*')).collect();
    let digits = digits.trim();
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse().map_err(|_| ScholarParseError::InvalidNumber {
        field,
        value: text.to_string(),
    })
}

/// Value of `key` in the query string of `href`
fn query_param(href: &str, key: &str) -> Option<String> {
    let query = href.split_once('?').map(|(_, q)| q)?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.replace("%2C", ",").replace("%2c", ","))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_HTML: &str = r#"
        <html><body>
          <div id="gsc_prf_in">Grace Hopper</div>
          <table><tbody id="gsc_a_b">
            <tr class="gsc_a_tr">
              <td class="gsc_a_t"><a href="/citations?view_op=view_citation" class="gsc_a_at">Compilers for Everyone</a></td>
              <td class="gsc_a_c"><a href="https://scholar.google.com/scholar?oi=bibs&amp;hl=en&amp;cites=111,222" class="gsc_a_ac gs_ibl">1,204</a></td>
            </tr>
            <tr class="gsc_a_tr">
              <td class="gsc_a_t"><a href="/citations?view_op=view_citation" class="gsc_a_at">Uncited Notes</a></td>
              <td class="gsc_a_c"><a href="" class="gsc_a_ac gs_ibl">&nbsp;</a></td>
            </tr>
          </tbody></table>
        </body></html>"#;

    const CITATIONS_HTML: &str = r##"
        <html><body><div id="gs_res_ccl"><div id="gs_res_ccl_mid">
          <div class="gs_r gs_or"><div class="gs_ri">
            <h3 class="gs_rt"><span class="gs_ctg2">[PDF]</span> <a href="#">Citing   Work One</a></h3>
            <div class="gs_a"><a href="/citations?user=AAA111&amp;hl=en">A Lovelace</a>, <a href="/citations?user=BBB222&amp;hl=en">C Babbage</a> - Journal, 2020</div>
            <div class="gs_fl"><a href="#">Save</a> <a href="/scholar?cites=9">Cited by 7</a></div>
          </div></div>
          <div class="gs_r gs_or"><div class="gs_ri">
            <h3 class="gs_rt"><a href="#">Anonymous Work</a></h3>
            <div class="gs_a">Someone Unlinked - 2021</div>
          </div></div>
        </div></div>
        <div id="gs_n"><a class="gs_nma" href="/scholar?start=10&amp;cites=111">2</a><a class="gs_nma" href="/scholar?start=20&amp;cites=111">3</a></div>
        </body></html>"##;

    const AUTHOR_HTML: &str = r#"
        <html><body>
          <div id="gsc_prf_in">Ada Lovelace</div>
          <div class="gsc_prf_il">Assistant Professor at <a href="/citations?view_op=view_org&amp;hl=en&amp;org=999" class="gsc_prf_ila">Yale University</a></div>
          <div class="gsc_prf_il" id="gsc_prf_ivh">Verified email at yale.edu - <a href="https://ada.example">Homepage</a></div>
        </body></html>"#;

    #[test]
    fn test_parse_profile_rows() {
        let page = parse_profile_page(PROFILE_HTML).unwrap();
        assert_eq!(page.name, "Grace Hopper");
        assert_eq!(page.rows.len(), 2);
        assert_eq!(
            page.rows[0],
            ProfileRow {
                title: "Compilers for Everyone".to_string(),
                citation_count: 1204,
                cites_ids: vec!["111".to_string(), "222".to_string()],
            }
        );
        assert_eq!(page.rows[1].citation_count, 0);
        assert!(page.rows[1].cites_ids.is_empty());
    }

    #[test]
    fn test_profile_without_name_is_schema_drift() {
        let err = parse_profile_page("<html><body><p>hello</p></body></html>").unwrap_err();
        assert_eq!(err, ScholarParseError::MissingElement("profile name"));
    }

    #[test]
    fn test_parse_citations_page() {
        let page = parse_citations_page(CITATIONS_HTML, 0).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].title, "Citing Work One");
        assert_eq!(page.entries[0].author_ids, vec!["AAA111", "BBB222"]);
        assert_eq!(page.entries[0].cited_by, 7);
        assert!(page.entries[1].author_ids.is_empty());
        assert!(page.has_next);

        // Page 3 (index 2) would need a "4" link
        assert!(!parse_citations_page(CITATIONS_HTML, 2).unwrap().has_next);
    }

    #[test]
    fn test_citations_page_without_container_is_schema_drift() {
        let err = parse_citations_page("<html><body></body></html>", 0).unwrap_err();
        assert_eq!(err, ScholarParseError::MissingElement("results container"));
    }

    #[test]
    fn test_parse_author_page() {
        let profile = parse_author_page(AUTHOR_HTML).unwrap();
        assert_eq!(profile.name, "Ada Lovelace");
        assert_eq!(
            profile.affiliation.as_deref(),
            Some("Assistant Professor at Yale University")
        );
        assert_eq!(profile.organization_id.as_deref(), Some("999"));
        assert_eq!(profile.email_domain.as_deref(), Some("yale.edu"));
    }

    #[test]
    fn test_author_without_verification() {
        let html = r#"<div id="gsc_prf_in">Bob</div><div class="gsc_prf_il">PhD Student @ MIT</div>"#;
        let profile = parse_author_page(html).unwrap();
        assert_eq!(profile.affiliation.as_deref(), Some("PhD Student @ MIT"));
        assert_eq!(profile.organization_id, None);
        assert_eq!(profile.email_domain, None);
    }

    #[test]
    fn test_parse_org_page() {
        let html = r##"<h2 class="gsc_authors_header">Yale University <a href="#">Learn more</a></h2>"##;
        assert_eq!(parse_org_page(html).unwrap(), "Yale University");
        assert!(parse_org_page("<h1>nothing</h1>").is_err());
    }

    #[test]
    fn test_detect_block() {
        assert_eq!(
            detect_block("<p>Please show you're not a robot</p>"),
            Some("robot check")
        );
        assert_eq!(
            detect_block(r#"<form id="captcha-form"></form>"#),
            Some("CAPTCHA")
        );
        assert_eq!(detect_block(CITATIONS_HTML), None);
    }

    #[test]
    fn test_invalid_count() {
        assert!(matches!(
            parse_count("lots", "cited by"),
            Err(ScholarParseError::InvalidNumber { .. })
        ));
        assert_eq!(parse_count("1,024", "cited by").unwrap(), 1024);
    }
}
