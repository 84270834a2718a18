//! Device mapping store: one JSON file per backend, atomic rewrites, and the
//! mapping-level operations behind the operator surfaces.
//!
//! Every mutation builds the new record first, persists it, and only then
//! commits it to the in-memory map, so a failed write leaves the prior state
//! intact on disk and in memory.

use crate::record::{
    BackendRecord, BackendStatus, BackendType, ConnectionConfig, DeviceMapping,
    EntityDescriptor, MappingConflict, MappingPatch, DEFAULT_DEVICE_TYPES,
};
use chrono::Utc;
use orac_core::{fsutil, Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct MappingStore {
    backends_dir: PathBuf,
    backends: RwLock<HashMap<String, BackendRecord>>,
}

impl MappingStore {
    /// Load every `backends/*.json` document. A missing directory yields an
    /// empty store; a corrupt file is a startup error, not silent data loss.
    pub async fn load(backends_dir: PathBuf) -> Result<Self> {
        let mut backends = HashMap::new();

        match tokio::fs::read_dir(&backends_dir).await {
            Ok(mut dir) => {
                while let Some(entry) = dir.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let raw = tokio::fs::read(&path).await?;
                    let record: BackendRecord = serde_json::from_slice(&raw).map_err(|e| {
                        Error::config(format!(
                            "corrupt backend file {}: {e}",
                            path.display()
                        ))
                    })?;
                    info!(backend = %record.id, file = %path.display(), "loaded backend");
                    backends.insert(record.id.clone(), record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&backends_dir).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(count = backends.len(), "mapping store ready");
        Ok(Self {
            backends_dir,
            backends: RwLock::new(backends),
        })
    }

    fn backend_file(&self, backend_id: &str) -> PathBuf {
        self.backends_dir.join(format!("{backend_id}.json"))
    }

    async fn persist(&self, record: &BackendRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        fsutil::write_atomic(&self.backend_file(&record.id), &json).await?;
        Ok(())
    }

    /// Create a backend with a fresh `<type>_<random8>` id, seeded device
    /// types and empty locations.
    pub async fn create_backend(
        &self,
        name: &str,
        backend_type: BackendType,
        connection: ConnectionConfig,
    ) -> Result<BackendRecord> {
        let id = format!(
            "{}_{}",
            backend_type.as_str(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let now = Utc::now();
        let record = BackendRecord {
            id: id.clone(),
            name: name.to_string(),
            backend_type,
            connection,
            device_mappings: BTreeMap::new(),
            device_types: DEFAULT_DEVICE_TYPES.iter().map(|s| s.to_string()).collect(),
            locations: Vec::new(),
            status: BackendStatus::default(),
            statistics: Default::default(),
            created_at: now,
            updated_at: now,
        };

        self.persist(&record).await?;
        self.backends.write().await.insert(id.clone(), record.clone());
        info!(backend = %id, name, "created backend");
        Ok(record)
    }

    pub async fn get(&self, backend_id: &str) -> Option<BackendRecord> {
        self.backends.read().await.get(backend_id).cloned()
    }

    pub async fn require(&self, backend_id: &str) -> Result<BackendRecord> {
        self.get(backend_id)
            .await
            .ok_or_else(|| Error::not_found(format!("backend '{backend_id}'")))
    }

    pub async fn list(&self) -> Vec<BackendRecord> {
        let mut records: Vec<_> = self.backends.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub async fn contains(&self, backend_id: &str) -> bool {
        self.backends.read().await.contains_key(backend_id)
    }

    /// Update name and/or connection settings.
    pub async fn update_backend(
        &self,
        backend_id: &str,
        name: Option<String>,
        connection: Option<ConnectionConfig>,
    ) -> Result<BackendRecord> {
        self.mutate(backend_id, |record| {
            if let Some(name) = name {
                record.name = name;
            }
            if let Some(connection) = connection {
                record.connection = connection;
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_backend(&self, backend_id: &str) -> Result<()> {
        {
            let backends = self.backends.read().await;
            if !backends.contains_key(backend_id) {
                return Err(Error::not_found(format!("backend '{backend_id}'")));
            }
        }
        let file = self.backend_file(backend_id);
        if let Err(e) = tokio::fs::remove_file(&file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        self.backends.write().await.remove(backend_id);
        info!(backend = %backend_id, "deleted backend");
        Ok(())
    }

    /// Merge a partial mapping update. Creates the entity record if missing;
    /// `original_name` and `domain` are preserved when absent from the patch.
    pub async fn upsert_entity(
        &self,
        backend_id: &str,
        entity_id: &str,
        patch: &MappingPatch,
    ) -> Result<DeviceMapping> {
        let record = self
            .mutate(backend_id, |record| {
                let mapping = record
                    .device_mappings
                    .entry(entity_id.to_string())
                    .or_default();
                patch.apply_to(mapping);
                record.refresh_statistics();
                Ok(())
            })
            .await?;
        Ok(record.device_mappings[entity_id].clone())
    }

    /// Apply one patch to many entities. The rewrite is a single persisted
    /// document, so either every entity's change lands or none do.
    pub async fn bulk_upsert(
        &self,
        backend_id: &str,
        entity_ids: &[String],
        patch: &MappingPatch,
    ) -> Result<usize> {
        let mut updated = 0;
        self.mutate(backend_id, |record| {
            for entity_id in entity_ids {
                let mapping = record
                    .device_mappings
                    .entry(entity_id.clone())
                    .or_default();
                patch.apply_to(mapping);
                updated += 1;
            }
            record.refresh_statistics();
            Ok(())
        })
        .await?;
        Ok(updated)
    }

    /// Add a device-type label. Comparison is case-insensitive; storage keeps
    /// the operator's casing. Adding an existing label is a no-op.
    pub async fn add_device_type(&self, backend_id: &str, label: &str) -> Result<Vec<String>> {
        let record = self
            .mutate(backend_id, |record| {
                add_label(&mut record.device_types, label);
                Ok(())
            })
            .await?;
        Ok(record.device_types)
    }

    pub async fn add_location(&self, backend_id: &str, label: &str) -> Result<Vec<String>> {
        let record = self
            .mutate(backend_id, |record| {
                add_label(&mut record.locations, label);
                Ok(())
            })
            .await?;
        Ok(record.locations)
    }

    /// Every `(device_type, location)` pair claimed by more than one enabled
    /// mapping, with the entity ids involved.
    pub async fn validate_mappings(&self, backend_id: &str) -> Result<Vec<MappingConflict>> {
        let record = self.require(backend_id).await?;
        let mut claims: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for (entity_id, mapping) in record.complete_mappings() {
            claims
                .entry((
                    mapping.device_type.to_lowercase(),
                    mapping.location.to_lowercase(),
                ))
                .or_default()
                .push(entity_id.clone());
        }
        Ok(claims
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|((device_type, location), entity_ids)| MappingConflict {
                device_type,
                location,
                entity_ids,
            })
            .collect())
    }

    /// Fold a `fetch_entities` result into the store. New entities arrive
    /// disabled; existing mappings keep their operator-set fields and only
    /// refresh `original_name` and `domain`.
    pub async fn merge_fetched_entities(
        &self,
        backend_id: &str,
        entities: &[EntityDescriptor],
    ) -> Result<BackendRecord> {
        self.mutate(backend_id, |record| {
            for entity in entities {
                match record.device_mappings.get_mut(&entity.entity_id) {
                    Some(mapping) => {
                        mapping.original_name = entity.original_name.clone();
                        mapping.domain = entity.domain.clone();
                    }
                    None => {
                        record.device_mappings.insert(
                            entity.entity_id.clone(),
                            DeviceMapping {
                                enabled: false,
                                device_type: String::new(),
                                location: String::new(),
                                original_name: entity.original_name.clone(),
                                domain: entity.domain.clone(),
                            },
                        );
                    }
                }
            }
            record.refresh_statistics();
            record.statistics.last_sync = Some(Utc::now());
            Ok(())
        })
        .await
    }

    /// Refresh the connectivity block after a probe or fetch.
    pub async fn record_status(&self, backend_id: &str, status: BackendStatus) -> Result<()> {
        self.mutate(backend_id, |record| {
            record.status = status;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Clone-modify-persist-commit. The closure mutates a copy; nothing is
    /// visible to readers until the new document is on disk.
    async fn mutate<F>(&self, backend_id: &str, f: F) -> Result<BackendRecord>
    where
        F: FnOnce(&mut BackendRecord) -> Result<()>,
    {
        let mut backends = self.backends.write().await;
        let current = backends
            .get(backend_id)
            .ok_or_else(|| Error::not_found(format!("backend '{backend_id}'")))?;

        let mut next = current.clone();
        f(&mut next)?;
        next.updated_at = Utc::now();

        if let Err(e) = self.persist(&next).await {
            warn!(backend = %backend_id, error = %e, "backend persist failed, keeping prior state");
            return Err(e);
        }
        backends.insert(backend_id.to_string(), next.clone());
        Ok(next)
    }
}

fn add_label(labels: &mut Vec<String>, label: &str) {
    let label = label.trim();
    if label.is_empty() {
        return;
    }
    if !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
        labels.push(label.to_string());
    }
}
