//! Anti-detection layer: outbound identity and request pacing.
//!
//! Pure policy objects with no state beyond their configuration. The
//! identity (user agent, viewport, locale, referrer) is sampled once per
//! fetcher so the fingerprint stays consistent within a browsing context,
//! and the pacer sleeps a uniformly random duration before each fetch so
//! request timing never looks mechanical. Tests substitute fixed values.

use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;
use rand::seq::SliceRandom;

/// Realistic desktop user agents, matching what the target site sees from
/// ordinary visitors.
pub static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Script run in the page to suppress automation-detectable navigator flags.
pub static STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = window.chrome || { runtime: {} };
"#;

/// Configuration for the anti-detection layer.
#[derive(Debug, Clone)]
pub struct StealthConfig {
    /// Pool the outbound user agent is drawn from.
    pub user_agents: Vec<String>,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
    /// Credible upstream set as referrer on the first navigation.
    pub referrer: String,
    /// Uniform pre-fetch delay interval.
    pub pace_min: Duration,
    pub pace_max: Duration,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            user_agents: USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            viewport: (1920, 1080),
            locale: "en-US".into(),
            timezone: "America/New_York".into(),
            referrer: "https://www.google.com/".into(),
            pace_min: Duration::from_secs(2),
            pace_max: Duration::from_secs(5),
        }
    }
}

/// A sampled outbound fingerprint, fixed for one fetcher's lifetime.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
    pub referrer: String,
}

impl Identity {
    /// Draw a random user agent from the configured pool; the rest of the
    /// fingerprint stays fixed-but-plausible.
    pub fn sample(config: &StealthConfig) -> Self {
        let mut rng = rand::thread_rng();
        let user_agent = config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| USER_AGENTS[0].to_string());
        Self {
            user_agent,
            viewport: config.viewport,
            locale: config.locale.clone(),
            timezone: config.timezone.clone(),
            referrer: config.referrer.clone(),
        }
    }

    /// Default header set for the lightweight strategy, mirroring what the
    /// rendering surface would send.
    pub fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let entries: &[(&str, String)] = &[
            ("user-agent", self.user_agent.clone()),
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".into(),
            ),
            ("accept-language", format!("{},en;q=0.9", self.locale)),
            ("upgrade-insecure-requests", "1".into()),
            ("sec-fetch-dest", "document".into()),
            ("sec-fetch-mode", "navigate".into()),
            ("sec-fetch-site", "none".into()),
            ("sec-fetch-user", "?1".into()),
            ("cache-control", "max-age=0".into()),
        ];
        for (name, value) in entries {
            if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes())
                && let Ok(header_value) = HeaderValue::from_str(value)
            {
                headers.insert(header_name, header_value);
            }
        }
        headers
    }

    /// Chromium launch arguments carrying this identity into the rendering
    /// surface, with automation flags suppressed.
    pub fn browser_args(&self, headless: bool) -> Vec<String> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-sandbox".to_string(),
            format!("--window-size={},{}", self.viewport.0, self.viewport.1),
            format!("--lang={}", self.locale),
            format!("--user-agent={}", self.user_agent),
        ];
        if headless {
            args.push("--headless=new".to_string());
        }
        args
    }
}

/// Paces requests with a randomized delay drawn from `[min, max]`.
#[derive(Debug, Clone)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = if max < min { min } else { max };
        Self { min, max }
    }

    pub fn from_config(config: &StealthConfig) -> Self {
        Self::new(config.pace_min, config.pace_max)
    }

    /// Pick the next delay without sleeping.
    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let mut rng = rand::thread_rng();
        let secs = rng.gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Sleep before the next fetch. Cooperative yield, never a blocked thread.
    pub async fn pace(&self) {
        let delay = self.next_delay();
        if delay > Duration::ZERO {
            log::debug!("pacing {:.1}s before next fetch", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::from_config(&StealthConfig::default())
    }
}
