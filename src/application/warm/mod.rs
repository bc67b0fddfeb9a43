//! Edge-cache warm-up after a production deploy.
//!
//! Two independent passes: every `<loc>` of the sitemap, then every asset the
//! homepage references. Both fan out with a fixed concurrency limit and are
//! best-effort: failures are logged per URL and counted, never propagated.

mod markup;

use std::{num::NonZeroUsize, sync::Arc, time::Instant};

use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use tracing::{info, warn};

pub use markup::{MarkupError, asset_references, sitemap_locations};

use crate::application::providers::PageFetcher;
use crate::domain::urls::UrlSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmPass {
    Sitemap,
    Assets,
}

impl WarmPass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Assets => "assets",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmFailure {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WarmOutcome {
    pub pass: WarmPass,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<WarmFailure>,
    /// Set when the seed document itself could not be fetched or parsed.
    pub seed_error: Option<String>,
}

impl WarmOutcome {
    fn seed_failed(pass: WarmPass, error: String) -> Self {
        Self {
            pass,
            attempted: 0,
            succeeded: 0,
            failures: Vec::new(),
            seed_error: Some(error),
        }
    }
}

#[derive(Clone)]
pub struct CacheWarmer {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    concurrency: NonZeroUsize,
}

impl CacheWarmer {
    pub fn new(fetcher: Arc<dyn PageFetcher>, base_url: &str, concurrency: NonZeroUsize) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            concurrency,
        }
    }

    pub fn sitemap_url(&self) -> String {
        format!("{}/sitemap.xml", self.base_url)
    }

    pub fn homepage_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    /// Run both passes, sitemap first.
    pub async fn warm_all(&self) -> Vec<WarmOutcome> {
        vec![self.warm_sitemap().await, self.warm_assets().await]
    }

    pub async fn warm_sitemap(&self) -> WarmOutcome {
        let pass = WarmPass::Sitemap;
        let xml = match self.fetcher.fetch_document(&self.sitemap_url()).await {
            Ok(xml) => xml,
            Err(err) => return self.seed_failure(pass, &self.sitemap_url(), err.to_string()),
        };
        let locations = match sitemap_locations(&xml) {
            Ok(locations) => locations,
            Err(err) => return self.seed_failure(pass, &self.sitemap_url(), err.to_string()),
        };

        let mut urls = UrlSet::new();
        for location in &locations {
            urls.insert_reference(&self.base_url, location);
        }
        self.fetch_all(pass, urls).await
    }

    pub async fn warm_assets(&self) -> WarmOutcome {
        let pass = WarmPass::Assets;
        let homepage = self.homepage_url();
        let html = match self.fetcher.fetch_document(&homepage).await {
            Ok(html) => html,
            Err(err) => return self.seed_failure(pass, &homepage, err.to_string()),
        };
        let references = match asset_references(&html) {
            Ok(references) => references,
            Err(err) => return self.seed_failure(pass, &homepage, err.to_string()),
        };

        let mut urls = UrlSet::new();
        for reference in &references {
            urls.insert_reference(&self.base_url, reference);
        }
        self.fetch_all(pass, urls).await
    }

    fn seed_failure(&self, pass: WarmPass, url: &str, error: String) -> WarmOutcome {
        counter!("pageship_warm_fetch_failed_total", "pass" => pass.as_str()).increment(1);
        warn!(
            target = "pageship::warm",
            pass = pass.as_str(),
            url = %url,
            error = %error,
            "warm-up seed document unavailable; skipping pass"
        );
        WarmOutcome::seed_failed(pass, error)
    }

    async fn fetch_all(&self, pass: WarmPass, urls: UrlSet) -> WarmOutcome {
        let started_at = Instant::now();
        let attempted = urls.len();
        info!(
            target = "pageship::warm",
            pass = pass.as_str(),
            urls = attempted,
            concurrency = self.concurrency.get(),
            "warming urls"
        );

        let results: Vec<Result<(), WarmFailure>> = stream::iter(urls.into_vec())
            .map(|url| {
                let fetcher = Arc::clone(&self.fetcher);
                async move { touch_one(fetcher.as_ref(), pass, url).await }
            })
            .buffer_unordered(self.concurrency.get())
            .collect()
            .await;

        let mut outcome = WarmOutcome {
            pass,
            attempted,
            succeeded: 0,
            failures: Vec::new(),
            seed_error: None,
        };
        for result in results {
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(failure) => outcome.failures.push(failure),
            }
        }
        outcome.failures.sort_by(|a, b| a.url.cmp(&b.url));

        histogram!("pageship_step_ms", "step" => pass.as_str())
            .record(started_at.elapsed().as_millis() as f64);
        info!(
            target = "pageship::warm",
            pass = pass.as_str(),
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            failed = outcome.failures.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "warm-up pass finished"
        );
        outcome
    }
}

async fn touch_one(
    fetcher: &dyn PageFetcher,
    pass: WarmPass,
    url: String,
) -> Result<(), WarmFailure> {
    counter!("pageship_warm_fetch_total", "pass" => pass.as_str()).increment(1);
    match fetcher.touch(&url).await {
        Ok(status) if (200..300).contains(&status) => {
            info!(target = "pageship::warm", pass = pass.as_str(), url = %url, status, "warmed");
            Ok(())
        }
        Ok(status) => {
            counter!("pageship_warm_fetch_failed_total", "pass" => pass.as_str()).increment(1);
            warn!(target = "pageship::warm", pass = pass.as_str(), url = %url, status, "warm-up fetch returned non-success status");
            Err(WarmFailure {
                url,
                status: Some(status),
                error: None,
            })
        }
        Err(err) => {
            counter!("pageship_warm_fetch_failed_total", "pass" => pass.as_str()).increment(1);
            warn!(target = "pageship::warm", pass = pass.as_str(), url = %url, error = %err, "warm-up fetch failed");
            Err(WarmFailure {
                url,
                status: err.status(),
                error: Some(err.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::providers::ProviderError;

    const BASE: &str = "https://example.com";

    #[derive(Default)]
    struct FakeFetcher {
        documents: HashMap<String, String>,
        statuses: HashMap<String, u16>,
        touched: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_document(&self, url: &str) -> Result<String, ProviderError> {
            self.documents
                .get(url)
                .cloned()
                .ok_or(ProviderError::Status {
                    status: 404,
                    body: String::new(),
                })
        }

        async fn touch(&self, url: &str) -> Result<u16, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.touched.lock().expect("lock").push(url.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.statuses.get(url).copied().unwrap_or(200))
        }
    }

    fn warmer(fetcher: Arc<FakeFetcher>, concurrency: usize) -> CacheWarmer {
        CacheWarmer::new(
            fetcher,
            BASE,
            NonZeroUsize::new(concurrency).expect("non-zero"),
        )
    }

    fn sorted_touches(fetcher: &FakeFetcher) -> Vec<String> {
        let mut touched = fetcher.touched.lock().expect("lock").clone();
        touched.sort();
        touched
    }

    #[tokio::test]
    async fn sitemap_pass_fetches_each_location_once() {
        let mut fetcher = FakeFetcher::default();
        fetcher.documents.insert(
            format!("{BASE}/sitemap.xml"),
            "<urlset><url><loc>https://example.com/</loc></url>\
             <url><loc>https://example.com/a/</loc></url>\
             <url><loc>https://example.com/a/</loc></url></urlset>"
                .to_string(),
        );
        let fetcher = Arc::new(fetcher);

        let outcome = warmer(fetcher.clone(), 10).warm_sitemap().await;

        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(
            sorted_touches(&fetcher),
            vec!["https://example.com/", "https://example.com/a/"]
        );
    }

    #[tokio::test]
    async fn asset_pass_deduplicates_across_patterns() {
        let mut fetcher = FakeFetcher::default();
        fetcher.documents.insert(
            format!("{BASE}/"),
            r##"<html><head>
                <link rel="stylesheet" href="/css/site.css">
                <style>@import url("/css/site.css");</style>
                <script src="js/app.js"></script>
               </head><body><a href="#top">top</a></body></html>"##
                .to_string(),
        );
        let fetcher = Arc::new(fetcher);

        let outcome = warmer(fetcher.clone(), 10).warm_assets().await;

        assert_eq!(outcome.attempted, 2);
        assert_eq!(
            sorted_touches(&fetcher),
            vec![
                "https://example.com/css/site.css",
                "https://example.com/js/app.js"
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_reported_with_status() {
        let mut fetcher = FakeFetcher::default();
        fetcher.documents.insert(
            format!("{BASE}/sitemap.xml"),
            "<urlset><loc>https://example.com/ok</loc><loc>https://example.com/gone</loc></urlset>"
                .to_string(),
        );
        fetcher
            .statuses
            .insert("https://example.com/gone".to_string(), 404);
        let fetcher = Arc::new(fetcher);

        let outcome = warmer(fetcher, 10).warm_sitemap().await;

        assert_eq!(outcome.succeeded, 1);
        assert_eq!(
            outcome.failures,
            vec![WarmFailure {
                url: "https://example.com/gone".to_string(),
                status: Some(404),
                error: None,
            }]
        );
    }

    #[tokio::test]
    async fn missing_sitemap_skips_pass_without_panicking() {
        let fetcher = Arc::new(FakeFetcher::default());
        let outcome = warmer(fetcher.clone(), 10).warm_sitemap().await;

        assert_eq!(outcome.attempted, 0);
        assert!(outcome.seed_error.is_some());
        assert!(fetcher.touched.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn fan_out_respects_concurrency_limit() {
        let mut fetcher = FakeFetcher {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let locs: String = (0..12)
            .map(|i| format!("<loc>https://example.com/p{i}</loc>"))
            .collect();
        fetcher
            .documents
            .insert(format!("{BASE}/sitemap.xml"), format!("<urlset>{locs}</urlset>"));
        let fetcher = Arc::new(fetcher);

        let outcome = warmer(fetcher.clone(), 3).warm_sitemap().await;

        assert_eq!(outcome.succeeded, 12);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded limit");
        assert!(peak > 1, "fan-out never overlapped");
    }
}
