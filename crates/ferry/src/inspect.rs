// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline inspection of a client's store: `ferry queue` and `ferry cache`.
//!
//! These commands open the SQLite database directly and never touch the
//! network.

use std::sync::Arc;

use colored::Colorize;
use serde_json::json;

use ferry_cache::{CacheRecord, ReconciliationCache, RecordStatus};
use ferry_config::FerryConfig;
use ferry_core::{EntityId, QueuedAction, SyncError};
use ferry_storage::{PersistentQueue, PersistentStore, SqliteStore};

async fn open_store(config: &FerryConfig) -> Result<Arc<PersistentStore>, SyncError> {
    if config.storage.in_memory {
        return Err(SyncError::Config(
            "storage.in_memory is set; there is no database to inspect".to_string(),
        ));
    }
    let backend = SqliteStore::open(&config.storage.database_path).await?;
    Ok(PersistentStore::new(Arc::new(backend)))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, SyncError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| SyncError::Internal(format!("failed to encode output: {e}")))
}

fn describe_action(action: &QueuedAction) -> String {
    let mut line = format!(
        "{}  {:<6} {}  {}",
        action.id.to_string().dimmed(),
        action.method.to_string(),
        action.endpoint,
        action.kind.cyan(),
    );
    if action.retry_count > 0 {
        line.push_str(&format!("  (retries: {})", action.retry_count).yellow().to_string());
    }
    line
}

fn status_label(status: RecordStatus) -> String {
    match status {
        RecordStatus::Pending => "pending".yellow().to_string(),
        RecordStatus::Confirmed => "confirmed".green().to_string(),
        RecordStatus::Failed => "failed".red().to_string(),
    }
}

fn describe_record(record: &CacheRecord) -> String {
    let data = serde_json::Value::Object(record.data.clone());
    format!(
        "{:<38} {:<10} {}",
        record.id,
        status_label(record.status),
        data.to_string().dimmed()
    )
}

/// `ferry queue list`
pub async fn queue_list(config: &FerryConfig, json: bool) -> Result<(), SyncError> {
    let store = open_store(config).await?;
    let queue = PersistentQueue::load(&store, config.queue.capacity).await?;
    let actions = queue.snapshot().await;

    if json {
        println!("{}", to_json(&actions)?);
        return Ok(());
    }
    if actions.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    println!("{} pending action(s):", actions.len().to_string().bold());
    for action in &actions {
        println!("  {}", describe_action(action));
    }
    Ok(())
}

/// `ferry queue clear`
pub async fn queue_clear(config: &FerryConfig, json: bool) -> Result<(), SyncError> {
    let store = open_store(config).await?;
    let queue = PersistentQueue::load(&store, config.queue.capacity).await?;
    let removed = queue.len();
    queue.clear().await?;

    if json {
        println!("{}", to_json(&json!({ "removed": removed }))?);
    } else {
        println!("removed {removed} queued action(s)");
    }
    Ok(())
}

/// `ferry cache show <entity>`
pub async fn cache_show(config: &FerryConfig, entity: &str, json: bool) -> Result<(), SyncError> {
    let store = open_store(config).await?;
    let cache = ReconciliationCache::load(&store, config.cache.staleness()).await?;
    let entity_id = EntityId::from(entity);
    let records = cache.snapshot(&entity_id).await;

    if json {
        println!("{}", to_json(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        let known = cache.entity_ids().await;
        println!("no records cached for {entity}");
        if !known.is_empty() {
            let names: Vec<String> = known.iter().map(ToString::to_string).collect();
            println!("cached entities: {}", names.join(", "));
        }
        return Ok(());
    }
    println!("{} ({} record(s))", entity.bold(), records.len());
    for record in &records {
        println!("  {}", describe_record(record));
    }
    Ok(())
}

/// `ferry cache unconfirmed`
pub async fn cache_unconfirmed(config: &FerryConfig, json: bool) -> Result<(), SyncError> {
    let store = open_store(config).await?;
    let cache = ReconciliationCache::load(&store, config.cache.staleness()).await?;
    let stale = cache.unconfirmed().await;

    if json {
        let entries: Vec<_> = stale
            .iter()
            .map(|u| json!({ "entity_id": u.entity_id, "record": u.record }))
            .collect();
        println!("{}", to_json(&entries)?);
        return Ok(());
    }
    if stale.is_empty() {
        println!("no unconfirmed records");
        return Ok(());
    }
    println!(
        "{} record(s) pending for more than {}s:",
        stale.len().to_string().bold(),
        config.cache.staleness_secs
    );
    for entry in &stale {
        println!("  {}  {}", entry.entity_id.to_string().cyan(), describe_record(&entry.record));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{HttpMethod, NewAction};
    use serde_json::Map;

    fn config_at(dir: &tempfile::TempDir) -> FerryConfig {
        let mut config = FerryConfig::default();
        config.storage.database_path = dir.path().join("ferry.db").display().to_string();
        config
    }

    #[tokio::test]
    async fn commands_read_what_the_client_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(&dir);

        {
            let store = open_store(&config).await.unwrap();
            let queue = PersistentQueue::load(&store, 10).await.unwrap();
            queue
                .enqueue(NewAction::new("message.send", HttpMethod::Post, "/messages").into_queued())
                .await
                .unwrap();
            let cache = ReconciliationCache::load(&store, config.cache.staleness())
                .await
                .unwrap();
            cache
                .apply_optimistic(&EntityId::from("conv-1"), &"tmp-1".into(), Map::new())
                .await
                .unwrap();
        }

        queue_list(&config, true).await.unwrap();
        cache_show(&config, "conv-1", false).await.unwrap();
        cache_unconfirmed(&config, true).await.unwrap();
        queue_clear(&config, false).await.unwrap();

        let store = open_store(&config).await.unwrap();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn in_memory_storage_cannot_be_inspected() {
        let mut config = FerryConfig::default();
        config.storage.in_memory = true;
        let err = queue_list(&config, false).await.unwrap_err();
        assert_eq!(err.kind(), ferry_core::ErrorKind::Config);
    }
}
