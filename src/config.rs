use std::path::Path;

use serde::{Deserialize, Serialize};

// ─── Bot Configuration ─────────────────────────────────────────────

/// config.json contents. Every key has a default so a partial (or
/// absent) file still yields a runnable configuration; unknown keys,
/// including the `comment*` convention, are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    pub symbols_to_monitor: Vec<String>,
    pub quote: String,
    pub leverage: u32,
    pub notional_per_position: f64,
    pub hold_duration_hours: f64,
    pub wait_between_cycles_minutes: f64,
    pub check_interval_seconds: u64,
    pub min_net_apr_threshold: f64,
    pub max_spread_pct: f64,
    pub enable_stop_loss: bool,
    pub funding_table_refresh_minutes: f64,
    pub cross_ticks: u32,
    pub scan_stagger_seconds: f64,
    pub max_concurrent_requests_per_venue: usize,
    pub size_reconcile_tolerance_pct: f64,
    pub size_reconcile_tolerance_abs: f64,
}

fn default_symbols() -> Vec<String> {
    ["BTC", "ETH", "SOL", "DOGE", "XRP", "LINK", "AVAX", "LTC", "ADA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols_to_monitor: default_symbols(),
            quote: "USDT".to_string(),
            leverage: 3,
            notional_per_position: 100.0,
            hold_duration_hours: 8.0,
            wait_between_cycles_minutes: 5.0,
            check_interval_seconds: 60,
            min_net_apr_threshold: 5.0,
            max_spread_pct: 0.15,
            enable_stop_loss: true,
            funding_table_refresh_minutes: 5.0,
            cross_ticks: 100,
            scan_stagger_seconds: 2.5,
            max_concurrent_requests_per_venue: 2,
            size_reconcile_tolerance_pct: 0.1,
            size_reconcile_tolerance_abs: 0.001,
        }
    }
}

impl BotConfig {
    /// Loads the config file, falling back to defaults (with a warning)
    /// when it is missing or unparseable. A broken config must never
    /// keep the engine from starting.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<BotConfig>(&content) {
                Ok(cfg) => {
                    log::info!(
                        "Loaded config from {:?}: {} symbols, notional ${:.2}, hold {:.1}h",
                        path,
                        cfg.symbols_to_monitor.len(),
                        cfg.notional_per_position,
                        cfg.hold_duration_hours
                    );
                    cfg
                }
                Err(e) => {
                    log::warn!("Failed to parse config {:?}: {}. Using defaults.", path, e);
                    BotConfig::default()
                }
            },
            Err(_) => {
                log::warn!("Config file {:?} not found. Using defaults.", path);
                BotConfig::default()
            }
        }
    }

    /// Venue-native full symbol, e.g. "BTC" -> "BTCUSDT".
    pub fn full_symbol(&self, base: &str) -> String {
        format!("{}{}", base, self.quote)
    }
}

// ─── Environment Credentials ───────────────────────────────────────

/// Aster API credentials: the pro-API signer triple plus the v1
/// HMAC key pair used for signed REST calls.
#[derive(Debug, Clone, Default)]
pub struct AsterCredentials {
    pub api_user: Option<String>,
    pub api_signer: Option<String>,
    pub api_private_key: Option<String>,
    pub apiv1_public: Option<String>,
    pub apiv1_private: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LighterCredentials {
    pub base_url: String,
    pub ws_url: String,
    pub api_private_key: Option<String>,
    pub account_index: i64,
    pub api_key_index: u8,
}

impl Default for LighterCredentials {
    fn default() -> Self {
        Self {
            base_url: "https://mainnet.zklighter.elliot.ai".to_string(),
            ws_url: "wss://mainnet.zklighter.elliot.ai/stream".to_string(),
            api_private_key: None,
            account_index: 0,
            api_key_index: 0,
        }
    }
}

fn env_or(names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| std::env::var(n).ok()).filter(|v| !v.is_empty())
}

/// Reads both venues' credentials from the environment (after dotenvy
/// has loaded `.env`). Missing values only warn here; the gateways fail
/// with `MissingCredentials` at first authenticated use.
pub fn load_credentials() -> (AsterCredentials, LighterCredentials) {
    let aster = AsterCredentials {
        api_user: env_or(&["ASTER_API_USER"]),
        api_signer: env_or(&["ASTER_API_SIGNER"]),
        api_private_key: env_or(&["ASTER_API_PRIVATE_KEY"]),
        apiv1_public: env_or(&["ASTER_APIV1_PUBLIC"]),
        apiv1_private: env_or(&["ASTER_APIV1_PRIVATE"]),
    };

    let lighter = LighterCredentials {
        base_url: env_or(&["LIGHTER_BASE_URL", "BASE_URL"])
            .unwrap_or_else(|| LighterCredentials::default().base_url),
        ws_url: env_or(&["LIGHTER_WS_URL", "WEBSOCKET_URL"])
            .unwrap_or_else(|| LighterCredentials::default().ws_url),
        api_private_key: env_or(&["API_KEY_PRIVATE_KEY", "LIGHTER_PRIVATE_KEY"]),
        account_index: env_or(&["ACCOUNT_INDEX", "LIGHTER_ACCOUNT_INDEX"])
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        api_key_index: env_or(&["API_KEY_INDEX", "LIGHTER_API_KEY_INDEX"])
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    };

    if aster.apiv1_public.is_none() || aster.apiv1_private.is_none() {
        log::warn!("Aster APIv1 credentials not set; Aster trading calls will fail.");
    }
    if lighter.api_private_key.is_none() {
        log::warn!("Lighter API private key not set; Lighter trading calls will fail.");
    }

    (aster, lighter)
}
