use rand::seq::SliceRandom;

/// Desktop user agents the portal renders normally for.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Common desktop viewports, largest first.
const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768), (1280, 720)];

/// Fingerprint applied to a freshly launched browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintConfig {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl FingerprintConfig {
    /// Randomized user agent with a viewport that fits inside the window.
    ///
    /// Falls back to the window size itself when no common viewport fits.
    #[must_use]
    pub fn randomized(window_width: u32, window_height: u32) -> Self {
        let mut rng = rand::thread_rng();

        let fitting: Vec<(u32, u32)> = VIEWPORTS
            .iter()
            .copied()
            .filter(|(w, h)| *w <= window_width && *h <= window_height)
            .collect();
        let (viewport_width, viewport_height) = fitting
            .choose(&mut rng)
            .copied()
            .unwrap_or((window_width, window_height));

        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string();

        Self {
            user_agent,
            viewport_width,
            viewport_height,
        }
    }
}

/// Evaluated before any document script runs on every navigation.
pub const STEALTH_SCRIPT: &str = r"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5], configurable: true });
if (!window.chrome) { window.chrome = {}; }
if (!window.chrome.runtime) { window.chrome.runtime = {}; }
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters)
    );
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_fingerprint_fits_window() {
        for _ in 0..20 {
            let config = FingerprintConfig::randomized(1366, 768);
            assert!(config.user_agent.contains("Chrome/"));
            assert!(config.viewport_width <= 1366);
            assert!(config.viewport_height <= 768);
        }
    }

    #[test]
    fn test_small_window_uses_window_size() {
        let config = FingerprintConfig::randomized(800, 600);
        assert_eq!((config.viewport_width, config.viewport_height), (800, 600));
    }

    #[test]
    fn test_fingerprint_variation() {
        let configs: Vec<_> = (0..20)
            .map(|_| FingerprintConfig::randomized(1920, 1080))
            .collect();

        let first_ua = &configs[0].user_agent;
        let all_same = configs.iter().all(|c| &c.user_agent == first_ua);
        assert!(!all_same, "Expected variation in user agents");
    }
}
