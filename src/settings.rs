//! Hub configuration.
//!
//! All settings are read from the environment once at startup and carried as
//! an immutable value. Components receive a clone; nothing mutates settings
//! after `Settings::load()`.

use std::env;

/// Environment variable names shared with addon containers.
pub const ENV_SHARED_PATH: &str = "SHARED_PATH";
pub const ENV_CACHE_PATH: &str = "CACHE_PATH";
pub const ENV_HUB_BASE_URL: &str = "HUB_BASE_URL";
pub const ENV_TASK: &str = "TASK";
pub const ENV_HUB_TOKEN: &str = "TOKEN";

/// Hub settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Namespace the hub schedules pods into.
    pub namespace: String,
    /// SQLite database path.
    pub db_path: String,
    /// REST bind address.
    pub api_addr: String,
    /// Base URL injected into addon pods.
    pub hub_base_url: String,
    /// Scheduler pause between iterations (seconds).
    pub frequency: u64,
    /// Max retries for killed (exit 137) pods.
    pub retries: i32,
    /// Pod service account.
    pub service_account: String,
    /// Mount path of the shared emptyDir.
    pub shared_path: String,
    /// Mount path of the cache volume.
    pub cache_path: String,
    /// Cache backed by an RWX PVC rather than emptyDir.
    pub cache_rwx: bool,
    /// PVC name when `cache_rwx` is set.
    pub cache_pvc: String,
    /// HMAC key for addon tokens.
    pub token_key: String,
    /// Require bearer tokens on the REST surface.
    pub auth_required: bool,
    /// Hub has no cluster connectivity; fail ready tasks.
    pub disconnected: bool,
    /// Root directory for attached files.
    pub files_path: String,
    /// Root directory for task buckets.
    pub bucket_path: String,
}

impl Settings {
    /// Load settings from the environment.
    pub fn load() -> Self {
        let namespace = get_str("NAMESPACE", "task-hub");
        let hub_base_url = get_str(
            "HUB_BASE_URL",
            &format!("http://task-hub.{namespace}.svc:8080"),
        );
        Self {
            db_path: get_str("DB_PATH", "task-hub.db"),
            api_addr: get_str("API_ADDR", "0.0.0.0:8080"),
            frequency: get_u64("TASK_FREQUENCY", 1),
            retries: get_i32("TASK_RETRIES", 1),
            service_account: get_str("TASK_SA", "task-hub"),
            shared_path: get_str(ENV_SHARED_PATH, "/shared"),
            cache_path: get_str(ENV_CACHE_PATH, "/cache"),
            cache_rwx: get_bool("CACHE_RWX", false),
            cache_pvc: get_str("CACHE_PVC", "task-hub-cache"),
            token_key: get_str("TOKEN_KEY", ""),
            auth_required: get_bool("AUTH_REQUIRED", false),
            disconnected: get_bool("DISCONNECTED", false),
            files_path: get_str("FILES_PATH", "/tmp/task-hub/files"),
            bucket_path: get_str("BUCKET_PATH", "/tmp/task-hub/buckets"),
            hub_base_url,
            namespace,
        }
    }
}

fn get_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
