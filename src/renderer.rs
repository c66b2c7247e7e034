// src/renderer.rs
use eoka::{Browser, StealthConfig};
use log::{debug, info};
use std::future::Future;
use tokio::time::Duration;
use url::Url;

use crate::errors::{AgentError, Result};
use crate::models::RenderedPage;

/// File extensions treated as downloadable task data.
const DATA_EXTENSIONS: &[&str] = &[".csv", ".tsv", ".json", ".xlsx", ".xls", ".pdf", ".txt"];

/// Collects `href`s of links and `src`s of media elements after scripts have run.
const RESOURCES_JS: &str = r#"JSON.stringify({
    links: Array.from(document.querySelectorAll('a[href]')).map(a => a.getAttribute('href')),
    media: Array.from(document.querySelectorAll('audio[src], audio source[src], video[src]')).map(e => e.getAttribute('src'))
})"#;

/// Loads a quiz page, executing its scripts, and returns what a reader would see.
pub trait PageRenderer: Send + Sync {
    fn render(&self, url: &str) -> impl Future<Output = Result<RenderedPage>> + Send;
}

/// Renders pages in headless Chromium through `eoka`. A browser is launched per render
/// and closed afterwards, so no state survives between pages.
pub struct EokaRenderer {
    timeout: Duration,
    headless: bool,
    capture_screenshot: bool,
}

impl EokaRenderer {
    pub fn new(timeout: Duration, headless: bool, capture_screenshot: bool) -> Self {
        Self { timeout, headless, capture_screenshot }
    }

    async fn render_in_browser(&self, url: &str) -> Result<RenderedPage> {
        let config = StealthConfig {
            headless: self.headless,
            ..Default::default()
        };
        let browser = Browser::launch_with_config(config).await?;
        let result = self.capture(&browser, url).await;
        if let Err(e) = browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        result
    }

    async fn capture(&self, browser: &Browser, url: &str) -> Result<RenderedPage> {
        let page = browser.new_page(url).await?;
        let idle_timeout = self.timeout.as_millis() as u64;
        if let Err(e) = page.wait_for_network_idle(500, idle_timeout).await {
            debug!("Network never went idle on {}: {}", url, e);
        }

        let text = page.text().await?;
        let resources = match page.evaluate::<String>(RESOURCES_JS).await {
            Ok(json) => collect_resources(&json, url),
            Err(e) => {
                debug!("Resource scan failed on {}: {}", url, e);
                Vec::new()
            }
        };
        let screenshot = if self.capture_screenshot {
            Some(page.screenshot().await?)
        } else {
            None
        };

        Ok(RenderedPage {
            url: url.to_string(),
            text,
            screenshot,
            resources,
        })
    }
}

impl PageRenderer for EokaRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage> {
        info!("📄 Rendering {}", url);
        match tokio::time::timeout(self.timeout, self.render_in_browser(url)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Browser(format!(
                "rendering {} exceeded {:?}",
                url, self.timeout
            ))),
        }
    }
}

/// Turns the page's link/media scan into absolute URLs of data files and audio.
pub fn collect_resources(scan_json: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else { return Vec::new() };
    let Ok(scan) = serde_json::from_str::<serde_json::Value>(scan_json) else {
        return Vec::new();
    };

    let hrefs = |key: &str| -> Vec<String> {
        scan.get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|href| base.join(href.trim()).ok())
                    .map(|u| u.to_string())
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut resources: Vec<String> = Vec::new();
    let data_links = hrefs("links").into_iter().filter(|u| is_data_file(u));
    for url in data_links.chain(hrefs("media")) {
        if !resources.contains(&url) {
            resources.push(url);
        }
    }
    resources
}

fn is_data_file(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    DATA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_data_links_and_media() {
        let scan = r##"{
            "links": ["/files/data.csv", "https://other.example/report.XLSX?dl=1", "/about", "#top"],
            "media": ["demo-audio.opus"]
        }"##;
        let resources = collect_resources(scan, "https://quiz.example.com/q/1");
        assert_eq!(
            resources,
            vec![
                "https://quiz.example.com/files/data.csv".to_string(),
                "https://other.example/report.XLSX?dl=1".to_string(),
                "https://quiz.example.com/q/demo-audio.opus".to_string(),
            ]
        );
    }

    #[test]
    fn duplicates_are_dropped() {
        let scan = r#"{"links": ["a.csv", "a.csv"], "media": []}"#;
        assert_eq!(collect_resources(scan, "https://q.example/").len(), 1);
    }

    #[test]
    fn garbage_scan_yields_nothing() {
        assert!(collect_resources("not json", "https://q.example/").is_empty());
        assert!(collect_resources("{}", "not a url").is_empty());
    }
}
