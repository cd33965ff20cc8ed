use std::env;
use std::time::Duration;

/// What to do with a reference of a given kind once it is absolute and unwrapped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceAction {
    /// Route it back through the relay (`<proxy base>?url=<encoded>`)
    Proxy,
    /// Leave it as a direct absolute link (scheme upgraded only)
    Passthrough,
}

impl ReferenceAction {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "proxy" | "wrap" => Some(ReferenceAction::Proxy),
            "passthrough" | "direct" => Some(ReferenceAction::Passthrough),
            _ => None,
        }
    }
}

/// Generic desktop browser user agent sent to every origin.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Wait for upstream response headers (504 when missed); also the
    /// idle limit between body reads
    pub upstream_timeout: Duration,
    /// TCP + TLS connect timeout for upstream requests
    pub connect_timeout: Duration,
    /// Maximum redirect hops followed before giving up
    pub max_redirects: usize,
    /// User agent presented to origins
    pub user_agent: String,
    /// Also send `Origin: <target origin>` alongside `Referer`
    pub send_origin_header: bool,
    /// Action for media segment references
    pub segment_action: ReferenceAction,
    /// Action for encryption key references
    pub key_action: ReferenceAction,
    /// Action for references that match no known suffix
    pub other_action: ReferenceAction,
    /// Rewrite quoted `URI="..."` attributes inside tag lines
    pub rewrite_tag_uris: bool,
    /// Bound on nested proxy-wrapper unwrapping
    pub max_unwrap_depth: usize,
    /// Upgrade `http://` targets and references to `https://`
    pub upgrade_insecure: bool,
    /// Reject targets whose host is a private or loopback IP literal
    pub block_private_targets: bool,
    /// Cache-Control forced onto non-playlist responses (origin value kept when `None`)
    pub segment_cache_control: Option<String>,
    /// Extra path substrings that mark a target as a playlist
    pub playlist_path_hints: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            is_dev: true,
            upstream_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            send_origin_header: false,
            segment_action: ReferenceAction::Proxy,
            key_action: ReferenceAction::Proxy,
            other_action: ReferenceAction::Passthrough,
            rewrite_tag_uris: false,
            max_unwrap_depth: 5,
            upgrade_insecure: true,
            block_private_targets: true,
            segment_cache_control: None,
            playlist_path_hints: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Config::default();

        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let upstream_timeout = Duration::from_secs(parse_or(
            "UPSTREAM_TIMEOUT_SECS",
            defaults.upstream_timeout.as_secs(),
        ));
        let connect_timeout = Duration::from_secs(parse_or(
            "UPSTREAM_CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout.as_secs(),
        ));
        let max_redirects = parse_or("MAX_REDIRECTS", defaults.max_redirects);

        let user_agent = env::var("USER_AGENT")
            .ok()
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or(defaults.user_agent);

        let segment_action = action_or("SEGMENT_ACTION", defaults.segment_action)?;
        let key_action = action_or("KEY_ACTION", defaults.key_action)?;
        let other_action = action_or("OTHER_ACTION", defaults.other_action)?;

        // Zero would make every wrapped reference an error
        let max_unwrap_depth = parse_or("MAX_UNWRAP_DEPTH", defaults.max_unwrap_depth).max(1);

        let segment_cache_control = env::var("SEGMENT_CACHE_CONTROL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let playlist_path_hints = env::var("PLAYLIST_PATH_HINTS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            port,
            is_dev,
            upstream_timeout,
            connect_timeout,
            max_redirects,
            user_agent,
            send_origin_header: parse_or("SEND_ORIGIN_HEADER", defaults.send_origin_header),
            segment_action,
            key_action,
            other_action,
            rewrite_tag_uris: parse_or("REWRITE_TAG_URIS", defaults.rewrite_tag_uris),
            max_unwrap_depth,
            upgrade_insecure: parse_or("UPGRADE_INSECURE", defaults.upgrade_insecure),
            block_private_targets: parse_or(
                "BLOCK_PRIVATE_TARGETS",
                defaults.block_private_targets,
            ),
            segment_cache_control,
            playlist_path_hints,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset or unparsable.
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Policy actions are rejected outright when misspelled rather than silently defaulted.
fn action_or(
    key: &str,
    default: ReferenceAction,
) -> Result<ReferenceAction, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => ReferenceAction::parse(&value)
            .ok_or_else(|| format!("{key} must be 'proxy' or 'passthrough', got '{value}'").into()),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "DEV_MODE",
        "PORT",
        "UPSTREAM_TIMEOUT_SECS",
        "UPSTREAM_CONNECT_TIMEOUT_SECS",
        "MAX_REDIRECTS",
        "USER_AGENT",
        "SEND_ORIGIN_HEADER",
        "SEGMENT_ACTION",
        "KEY_ACTION",
        "OTHER_ACTION",
        "REWRITE_TAG_URIS",
        "MAX_UNWRAP_DEPTH",
        "UPGRADE_INSECURE",
        "BLOCK_PRIVATE_TARGETS",
        "SEGMENT_CACHE_CONTROL",
        "PLAYLIST_PATH_HINTS",
    ];

    /// Set env vars, run `f`, then restore original state.
    ///
    /// Every variable the loader reads is cleared first so tests never see
    /// leftovers from the surrounding environment.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            ALL_VARS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK, no other thread modifies env vars concurrently.
            unsafe { std::env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { std::env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn dev_mode_uses_defaults() {
        with_env(&[("DEV_MODE", "true")], || {
            let config = Config::from_env().expect("should succeed in dev mode");
            assert!(config.is_dev);
            assert_eq!(config.port, 3000);
            assert_eq!(config.upstream_timeout, Duration::from_secs(30));
            assert_eq!(config.segment_action, ReferenceAction::Proxy);
            assert_eq!(config.other_action, ReferenceAction::Passthrough);
            assert_eq!(config.max_unwrap_depth, 5);
            assert!(config.upgrade_insecure);
            assert!(config.block_private_targets);
            assert!(!config.rewrite_tag_uris);
            assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        });
    }

    #[test]
    fn prod_mode_requires_port() {
        with_env(&[], || {
            let result = Config::from_env();
            assert!(result.is_err(), "Should fail without PORT in prod mode");
        });
    }

    #[test]
    fn prod_mode_with_port() {
        with_env(&[("PORT", "8080")], || {
            let config = Config::from_env().unwrap();
            assert!(!config.is_dev);
            assert_eq!(config.port, 8080);
        });
    }

    #[test]
    fn segment_action_passthrough() {
        with_env(
            &[("DEV_MODE", "true"), ("SEGMENT_ACTION", "passthrough")],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.segment_action, ReferenceAction::Passthrough);
            },
        );
    }

    #[test]
    fn misspelled_action_is_rejected() {
        with_env(&[("DEV_MODE", "true"), ("KEY_ACTION", "wrapp")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn unwrap_depth_never_zero() {
        with_env(&[("DEV_MODE", "true"), ("MAX_UNWRAP_DEPTH", "0")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.max_unwrap_depth, 1);
        });
    }

    #[test]
    fn playlist_hints_are_split_and_lowercased() {
        with_env(
            &[("DEV_MODE", "true"), ("PLAYLIST_PATH_HINTS", "IPTV.php, ,/live/")],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.playlist_path_hints, vec!["iptv.php", "/live/"]);
            },
        );
    }

    #[test]
    fn timeouts_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("UPSTREAM_TIMEOUT_SECS", "5"),
                ("UPSTREAM_CONNECT_TIMEOUT_SECS", "2"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.upstream_timeout, Duration::from_secs(5));
                assert_eq!(config.connect_timeout, Duration::from_secs(2));
            },
        );
    }

    #[test]
    fn blank_user_agent_falls_back() {
        with_env(&[("DEV_MODE", "true"), ("USER_AGENT", "  ")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        });
    }
}
