//! Randomized browser fingerprints for outbound feed requests.
//!
//! Each collection run picks one fingerprint and keeps it for the whole run,
//! so paging requests within a run look like a single client.

use rand::seq::SliceRandom;
use rand::Rng;

const CHROME_VERSIONS: &[&str] = &["120.0.0.0", "121.0.0.0", "122.0.0.0", "123.0.0.0", "124.0.0.0"];

const ACCEPT_LANGUAGES: &[&str] = &[
    "zh-CN,zh;q=0.9,en;q=0.8",
    "zh-CN,zh;q=0.9",
    "zh-CN,zh;q=0.8,en-US;q=0.5,en;q=0.3",
];

/// One randomized client identity
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
}

impl Fingerprint {
    /// Pick a random Chrome-on-Windows identity
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let version = CHROME_VERSIONS.choose(&mut rng).copied().unwrap_or("120.0.0.0");
        let accept_language = ACCEPT_LANGUAGES
            .choose(&mut rng)
            .copied()
            .unwrap_or(ACCEPT_LANGUAGES[0]);

        Self {
            user_agent: format!(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/{} Safari/537.36",
                version
            ),
            accept_language: accept_language.to_string(),
        }
    }

    /// Jitter in milliseconds added between paging requests
    pub fn page_jitter_ms() -> u64 {
        rand::thread_rng().gen_range(200..800)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_fingerprint_is_well_formed() {
        let fp = Fingerprint::random();
        assert!(fp.user_agent.contains("Chrome/"));
        assert!(fp.user_agent.contains("Windows NT 10.0"));
        assert!(fp.accept_language.starts_with("zh-CN"));
    }

    #[test]
    fn test_jitter_range() {
        for _ in 0..100 {
            let jitter = Fingerprint::page_jitter_ms();
            assert!((200..800).contains(&jitter));
        }
    }
}
