//! In-memory, TTL-bound store of full downstream payloads.
//!
//! Correctness relies on the read-path age check; the background sweep only
//! keeps the map from accumulating garbage between reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::bridge::compact::{self, CompactionSettings};
use crate::bridge::error::BridgeError;

struct StoredResult {
    full_payload: Value,
    summary: Value,
    created_at: Instant,
}

/// Id-keyed table of stored results with size-based compaction on write and
/// expiry on read.
pub struct ResultStore {
    entries: DashMap<String, StoredResult>,
    counter: AtomicU64,
    ttl: Duration,
    compaction: CompactionSettings,
}

impl ResultStore {
    pub fn new(ttl: Duration, compaction: CompactionSettings) -> Self {
        Self {
            entries: DashMap::new(),
            counter: AtomicU64::new(0),
            ttl,
            compaction,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn compaction(&self) -> &CompactionSettings {
        &self.compaction
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store `payload` if it classifies as large (or `force` is set) and
    /// return the compacted envelope; otherwise return the passthrough
    /// envelope with the payload untouched.
    pub fn store(&self, payload: Value, server: &str, tool: &str, force: bool) -> Value {
        self.store_at(
            payload,
            server,
            tool,
            force,
            Instant::now(),
            chrono::Utc::now().timestamp_millis(),
        )
    }

    pub(crate) fn store_at(
        &self,
        payload: Value,
        server: &str,
        tool: &str,
        force: bool,
        now: Instant,
        wall_millis: i64,
    ) -> Value {
        if !force && !compact::is_large(&payload, &self.compaction) {
            return json!({ "compacted": false, "data": payload });
        }

        let summary = compact::summarize(&payload, server, tool);
        let preview = compact::preview(&payload, &self.compaction);
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let result_id = result_id_from_parts(server, tool, wall_millis, counter);

        log::debug!(
            "storing result {result_id} ({} bytes)",
            compact::payload_size_bytes(&payload)
        );
        self.entries.insert(
            result_id.clone(),
            StoredResult {
                full_payload: payload,
                summary: summary.clone(),
                created_at: now,
            },
        );

        json!({
            "compacted": true,
            "result_id": result_id,
            "summary": summary,
            "preview": preview,
            "hint": format!("Full result stored. Use get_result(result_id=\"{result_id}\") to fetch the complete payload."),
        })
    }

    /// Fetch a stored payload. Expired entries are removed on read.
    pub fn get(&self, result_id: &str) -> Result<Value, BridgeError> {
        self.get_at(result_id, Instant::now())
    }

    pub(crate) fn get_at(&self, result_id: &str, now: Instant) -> Result<Value, BridgeError> {
        let (age, payload) = {
            let entry = self
                .entries
                .get(result_id)
                .ok_or_else(|| BridgeError::ResultMissing(result_id.to_string()))?;
            (
                now.saturating_duration_since(entry.created_at),
                entry.full_payload.clone(),
            )
        };

        if age > self.ttl {
            self.entries.remove(result_id);
            return Err(BridgeError::ResultExpired(result_id.to_string()));
        }

        Ok(json!({
            "result_id": result_id,
            "age_seconds": age.as_secs(),
            "data": payload,
        }))
    }

    /// Summaries of every extant (non-expired) entry.
    pub fn list(&self) -> Vec<Value> {
        self.list_at(Instant::now())
    }

    pub(crate) fn list_at(&self, now: Instant) -> Vec<Value> {
        let mut listed: Vec<Value> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let age = now.saturating_duration_since(entry.created_at);
                if age > self.ttl {
                    return None;
                }
                Some(json!({
                    "result_id": entry.key(),
                    "summary": entry.summary,
                    "age_seconds": age.as_secs(),
                    "expires_in_seconds": self.ttl.saturating_sub(age).as_secs(),
                }))
            })
            .collect();
        // DashMap iteration order is arbitrary; keep the listing stable
        listed.sort_by(|a, b| a["result_id"].as_str().cmp(&b["result_id"].as_str()));
        listed
    }

    /// Remove every entry older than the TTL. Returns how many were dropped.
    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.created_at) <= self.ttl);
        before - self.entries.len()
    }

    /// Background expiry sweep. Missed ticks are skipped, not replayed.
    pub fn spawn_sweeper(
        self: std::sync::Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep_at(Instant::now());
                        if removed > 0 {
                            log::debug!("expiry sweep removed {removed} result(s)");
                        }
                    }
                    () = shutdown.cancelled() => break,
                }
            }
        })
    }
}

/// `<server>_<tool>_<base36 millis>_<base36 counter>`; unique for the process
/// lifetime because the counter never repeats.
pub(crate) fn result_id_from_parts(server: &str, tool: &str, wall_millis: i64, counter: u64) -> String {
    format!(
        "{server}_{tool}_{}_{}",
        base36(wall_millis.max(0) as u64),
        base36(counter)
    )
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ResultStore {
        ResultStore::new(Duration::from_secs(600), CompactionSettings::default())
    }

    #[test]
    fn small_payload_passes_through() {
        let store = store();
        let payload = json!({ "rows": [1, 2, 3] });
        let envelope = store.store(payload.clone(), "srv", "t", false);
        assert_eq!(envelope, json!({ "compacted": false, "data": payload }));
        assert!(store.is_empty());
    }

    #[test]
    fn large_payload_is_compacted_and_round_trips() {
        let store = store();
        let payload = Value::Array((0..21).map(|i| json!(i)).collect());
        let envelope = store.store(payload.clone(), "srv", "query", false);

        assert_eq!(envelope["compacted"], json!(true));
        assert_eq!(envelope["summary"]["item_count"], json!(21));
        assert_eq!(envelope["preview"]["showing"], json!(5));
        assert_eq!(envelope["preview"]["items"], json!([0, 1, 2, 3, 4]));

        let id = envelope["result_id"].as_str().unwrap();
        assert!(id.starts_with("srv_query_"));
        let fetched = store.get(id).unwrap();
        assert_eq!(fetched["data"], payload);
    }

    #[test]
    fn force_flag_compacts_small_payloads() {
        let store = store();
        let envelope = store.store(json!({ "ok": true }), "srv", "t", true);
        assert_eq!(envelope["compacted"], json!(true));
        let id = envelope["result_id"].as_str().unwrap();
        assert_eq!(store.get(id).unwrap()["data"], json!({ "ok": true }));
    }

    #[test]
    fn missing_result_errors() {
        let store = store();
        assert!(matches!(
            store.get("nope"),
            Err(BridgeError::ResultMissing(_))
        ));
    }

    #[test]
    fn expiry_is_strict_and_removes_the_entry() {
        let store = store();
        let base = Instant::now();
        let envelope = store.store_at(
            Value::Array(vec![json!(0); 30]),
            "srv",
            "t",
            false,
            base,
            1_000,
        );
        let id = envelope["result_id"].as_str().unwrap().to_string();

        // At exactly the TTL the entry is still readable
        let at_ttl = store.get_at(&id, base + store.ttl()).unwrap();
        assert!(at_ttl["age_seconds"].as_u64().unwrap() <= store.ttl().as_secs());

        // One second past it, the read fails and the entry is gone
        let err = store
            .get_at(&id, base + store.ttl() + Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, BridgeError::ResultExpired(_)));
        assert!(store.is_empty());
        assert!(matches!(
            store.get_at(&id, base),
            Err(BridgeError::ResultMissing(_))
        ));
    }

    #[test]
    fn listing_reports_age_and_remaining_ttl() {
        let store = store();
        let base = Instant::now();
        store.store_at(Value::Array(vec![json!(0); 30]), "a", "t", false, base, 1);
        store.store_at(Value::Array(vec![json!(0); 30]), "b", "t", false, base, 2);

        let listed = store.list_at(base + Duration::from_secs(100));
        assert_eq!(listed.len(), 2);
        for item in &listed {
            assert_eq!(item["age_seconds"], json!(100));
            assert_eq!(item["expires_in_seconds"], json!(500));
            assert!(item["summary"]["size_bytes"].is_number());
        }
    }

    #[test]
    fn expired_entries_drop_out_of_the_listing() {
        let store = store();
        let base = Instant::now();
        store.store_at(Value::Array(vec![json!(0); 30]), "a", "t", false, base, 1);
        let listed = store.list_at(base + store.ttl() + Duration::from_secs(1));
        assert!(listed.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let store = store();
        let base = Instant::now();
        store.store_at(Value::Array(vec![json!(0); 30]), "old", "t", false, base, 1);
        store.store_at(
            Value::Array(vec![json!(0); 30]),
            "new",
            "t",
            false,
            base + Duration::from_secs(500),
            2,
        );

        let removed = store.sweep_at(base + store.ttl() + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn result_ids_are_unique_per_store() {
        let store = store();
        let a = store.store_at(Value::Array(vec![json!(0); 30]), "s", "t", false, Instant::now(), 99);
        let b = store.store_at(Value::Array(vec![json!(0); 30]), "s", "t", false, Instant::now(), 99);
        assert_ne!(a["result_id"], b["result_id"]);
    }

    #[test]
    fn result_id_encodes_base36_parts() {
        let id = result_id_from_parts("srv", "tool", 36, 35);
        assert_eq!(id, "srv_tool_10_z");
        assert_eq!(result_id_from_parts("s", "t", 0, 0), "s_t_0_0");
    }
}
