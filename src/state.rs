// ─────────────────────────────────────────────────────────────────────────────
// state.rs — Bot State Machine + Persistor
//
// The StatePersistor is the single owner of the on-disk state file.
// Every mutation goes through it and triggers a full atomic rewrite
// (tmp + fsync + rename), so a crash at any instant leaves either the
// previous or the new valid file on disk.
// ─────────────────────────────────────────────────────────────────────────────
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BotConfig;
use crate::gateway::Venue;

pub const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotState {
    Idle,
    Analyzing,
    Opening,
    Holding,
    Closing,
    Waiting,
    Error,
    Shutdown,
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BotState::Idle => "IDLE",
            BotState::Analyzing => "ANALYZING",
            BotState::Opening => "OPENING",
            BotState::Holding => "HOLDING",
            BotState::Closing => "CLOSING",
            BotState::Waiting => "WAITING",
            BotState::Error => "ERROR",
            BotState::Shutdown => "SHUTDOWN",
        };
        write!(f, "{}", s)
    }
}

/// The one live delta-neutral pair. Signed net base size across both
/// venues is zero within one amount tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub long_venue: Venue,
    pub short_venue: Venue,
    pub leverage: u32,
    pub opened_at: DateTime<Utc>,
    pub target_close_at: DateTime<Utc>,
    pub size_base: f64,
    pub avg_mid: f64,
    pub expected_net_apr: f64,
    #[serde(default)]
    pub last_table_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "stop-loss")]
    StopLoss,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: String,
    pub symbol: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub expected_net_apr: f64,
    pub status: CycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl_at_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl_pct_at_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worst_exchange: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CumulativeStats {
    pub cycles_completed: u64,
    pub successful_cycles: u64,
    pub stop_loss_cycles: u64,
    pub failed_cycles: u64,
    pub total_pnl_usd: f64,
    pub last_error: Option<String>,
}

/// Balance snapshot carried for the operator's benefit. Sizing always
/// uses `notional_per_position`; these numbers are informational.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalStatus {
    pub aster_total: Option<f64>,
    pub aster_available: Option<f64>,
    pub lighter_total: Option<f64>,
    pub lighter_available: Option<f64>,
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotStateFile {
    pub version: u32,
    pub state: BotState,
    pub current_cycle: u64,
    pub current_position: Option<Position>,
    pub capital_status: CapitalStatus,
    pub completed_cycles: Vec<CycleRecord>,
    pub cumulative_stats: CumulativeStats,
    pub config: BotConfig,
    /// ISO-8601 UTC with Z suffix.
    pub last_updated: String,
}

impl Default for BotStateFile {
    fn default() -> Self {
        Self {
            version: STATE_FILE_VERSION,
            state: BotState::Idle,
            current_cycle: 0,
            current_position: None,
            capital_status: CapitalStatus::default(),
            completed_cycles: Vec::new(),
            cumulative_stats: CumulativeStats::default(),
            config: BotConfig::default(),
            last_updated: utc_now_iso(),
        }
    }
}

pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ─── Persistor ─────────────────────────────────────────────────────

const PERSIST_RETRIES: u32 = 3;

pub struct StatePersistor {
    path: PathBuf,
    pub file: BotStateFile,
}

impl StatePersistor {
    /// Loads the state file, or starts from defaults. A missing or
    /// corrupt file warns and falls back; it never aborts startup.
    pub fn load<P: AsRef<Path>>(path: P, config: &BotConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BotStateFile>(&content) {
                Ok(f) => {
                    log::info!(
                        "Loaded state from {:?}: state={}, {} completed cycles, position={}",
                        path,
                        f.state,
                        f.completed_cycles.len(),
                        f.current_position
                            .as_ref()
                            .map(|p| p.symbol.as_str())
                            .unwrap_or("none")
                    );
                    f
                }
                Err(e) => {
                    log::warn!(
                        "State file {:?} is unparseable ({}). Starting with a fresh state.",
                        path,
                        e
                    );
                    BotStateFile {
                        config: config.clone(),
                        ..BotStateFile::default()
                    }
                }
            },
            Err(_) => {
                log::info!("State file {:?} not found. Starting with a fresh state.", path);
                BotStateFile {
                    config: config.clone(),
                    ..BotStateFile::default()
                }
            }
        };
        let mut persistor = Self { path, file };
        persistor.file.config = config.clone();
        persistor
    }

    /// Full atomic rewrite: serialize, write `<file>.tmp`, fsync,
    /// rename over the target. Up to 3 attempts with growing delay on
    /// transient OS errors.
    pub async fn persist(&mut self) -> std::io::Result<()> {
        self.file.last_updated = utc_now_iso();
        let json = serde_json::to_string_pretty(&self.file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut last_err = None;
        for attempt in 0..PERSIST_RETRIES {
            match atomic_write(&self.path, json.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "[STATE] write attempt {}/{} failed: {}",
                        attempt + 1,
                        PERSIST_RETRIES,
                        e
                    );
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "state write failed")
        }))
    }

    pub fn state(&self) -> BotState {
        self.file.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.file.current_position.as_ref()
    }

    pub async fn set_state(&mut self, next: BotState) -> std::io::Result<()> {
        if next == BotState::Holding && self.file.current_position.is_none() {
            log::error!("[STATE] HOLDING requested with no position recorded");
        }
        if self.file.state != next {
            log::info!("[STATE] {} -> {}", self.file.state, next);
        }
        self.file.state = next;
        self.persist().await
    }

    /// Records a freshly opened position and enters HOLDING in one write.
    pub async fn open_position(&mut self, position: Position) -> std::io::Result<()> {
        self.file.current_cycle += 1;
        log::info!(
            "[STATE] cycle #{}: holding {} long={} short={} size={:.6}",
            self.file.current_cycle,
            position.symbol,
            position.long_venue,
            position.short_venue,
            position.size_base
        );
        self.file.current_position = Some(position);
        self.file.state = BotState::Holding;
        self.persist().await
    }

    pub async fn clear_position(&mut self, next: BotState) -> std::io::Result<()> {
        self.file.current_position = None;
        self.file.state = next;
        self.persist().await
    }

    pub async fn update_position_size(&mut self, size_base: f64) -> std::io::Result<()> {
        if let Some(pos) = self.file.current_position.as_mut() {
            pos.size_base = size_base;
        }
        self.persist().await
    }

    pub async fn touch_table_refresh(&mut self) -> std::io::Result<()> {
        if let Some(pos) = self.file.current_position.as_mut() {
            pos.last_table_refresh = Some(Utc::now());
        }
        self.persist().await
    }

    /// Appends a cycle record and rolls the aggregate counters.
    pub async fn record_cycle(&mut self, record: CycleRecord) -> std::io::Result<()> {
        let stats = &mut self.file.cumulative_stats;
        stats.cycles_completed += 1;
        match record.status {
            CycleStatus::Success => stats.successful_cycles += 1,
            CycleStatus::StopLoss => stats.stop_loss_cycles += 1,
            CycleStatus::Failed => stats.failed_cycles += 1,
        }
        if let Some(pnl) = record.pnl_at_close {
            stats.total_pnl_usd += pnl;
        }
        log::info!(
            "[STATE] cycle recorded: {} {:?} pnl={:?}",
            record.symbol,
            record.status,
            record.pnl_at_close
        );
        self.file.completed_cycles.push(record);
        self.persist().await
    }

    pub async fn record_error(&mut self, message: &str) -> std::io::Result<()> {
        self.file.cumulative_stats.last_error = Some(message.to_string());
        self.file.state = BotState::Error;
        self.persist().await
    }

    pub async fn update_capital(&mut self, capital: CapitalStatus) -> std::io::Result<()> {
        self.file.capital_status = capital;
        self.persist().await
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_position() -> Position {
        Position {
            symbol: "BTC".to_string(),
            long_venue: Venue::Lighter,
            short_venue: Venue::Aster,
            leverage: 3,
            opened_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            target_close_at: Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap(),
            size_base: 0.002,
            avg_mid: 50_000.0,
            expected_net_apr: 30.0,
            last_table_refresh: None,
        }
    }

    fn tmp_state_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rotator_state_{}_{}.json", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn state_file_round_trips_every_state() {
        // parse(serialize(s)) == s for every reachable state
        for state in [
            BotState::Idle,
            BotState::Analyzing,
            BotState::Opening,
            BotState::Holding,
            BotState::Closing,
            BotState::Waiting,
            BotState::Error,
            BotState::Shutdown,
        ] {
            let mut file = BotStateFile::default();
            file.state = state;
            if state == BotState::Holding || state == BotState::Closing {
                file.current_position = Some(sample_position());
            }
            file.completed_cycles.push(CycleRecord {
                cycle_id: "c-1".to_string(),
                symbol: "BTC".to_string(),
                opened_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
                closed_at: Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap(),
                expected_net_apr: 30.0,
                status: CycleStatus::Success,
                pnl_at_close: Some(1.25),
                pnl_pct_at_close: Some(1.25),
                worst_exchange: Some("Aster".to_string()),
            });
            let json = serde_json::to_string(&file).unwrap();
            let parsed: BotStateFile = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, file);
        }
    }

    #[test]
    fn states_serialize_uppercase_and_statuses_kebab() {
        assert_eq!(serde_json::to_string(&BotState::Holding).unwrap(), "\"HOLDING\"");
        assert_eq!(serde_json::to_string(&CycleStatus::StopLoss).unwrap(), "\"stop-loss\"");
    }

    #[test]
    fn missing_optional_keys_load_with_defaults() {
        // Back-compat contract: an older file without the newer keys
        // still parses.
        let json = r#"{"state": "WAITING", "last_updated": "2025-06-01T12:00:00Z"}"#;
        let parsed: BotStateFile = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.state, BotState::Waiting);
        assert!(parsed.current_position.is_none());
        assert!(parsed.completed_cycles.is_empty());
        assert_eq!(parsed.cumulative_stats, CumulativeStats::default());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = tmp_state_path("corrupt");
        std::fs::write(&path, b"{\"state\": \"HOLDI").unwrap();
        let persistor = StatePersistor::load(&path, &BotConfig::default());
        assert_eq!(persistor.state(), BotState::Idle);
        assert!(persistor.position().is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn persist_is_atomic_and_reloadable() {
        // after persist, the on-disk file parses and no tmp remains
        let path = tmp_state_path("atomic");
        let mut persistor = StatePersistor::load(&path, &BotConfig::default());
        persistor.file.current_position = Some(sample_position());
        persistor.file.state = BotState::Holding;
        persistor.persist().await.unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = StatePersistor::load(&path, &BotConfig::default());
        assert_eq!(reloaded.state(), BotState::Holding);
        assert_eq!(reloaded.position().unwrap().symbol, "BTC");
        assert!(reloaded.file.last_updated.ends_with('Z'));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn cycle_records_roll_the_counters() {
        let path = tmp_state_path("cycles");
        let mut persistor = StatePersistor::load(&path, &BotConfig::default());
        persistor
            .record_cycle(CycleRecord {
                cycle_id: uuid::Uuid::new_v4().to_string(),
                symbol: "ETH".to_string(),
                opened_at: Utc::now(),
                closed_at: Utc::now(),
                expected_net_apr: 12.0,
                status: CycleStatus::StopLoss,
                pnl_at_close: Some(-2.5),
                pnl_pct_at_close: Some(-25.0),
                worst_exchange: Some("Aster".to_string()),
            })
            .await
            .unwrap();
        let stats = &persistor.file.cumulative_stats;
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.stop_loss_cycles, 1);
        assert_eq!(stats.total_pnl_usd, -2.5);
        let _ = std::fs::remove_file(&path);
    }
}
