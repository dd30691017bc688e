//! `data.*` handlers over an in-memory record store.
//!
//! Every mutation publishes the matching `data.*` event after the store
//! lock has been released.

use std::collections::HashMap;
use std::sync::Arc;

use hub_core::{Broadcaster, Topic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::HandlerContext;
use crate::errors::{RpcError, NOT_FOUND};
use crate::handlers::subscription::Ack;
use crate::handlers::HubServices;
use crate::registry::{HttpVerb, NoParams, RegistryBuilder};

/// A stored record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// `rec_<uuid v7>`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form attributes.
    pub attributes: Map<String, Value>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 last update time.
    pub updated_at: String,
}

/// In-memory record table.
#[derive(Default)]
pub struct DataStore {
    records: Mutex<HashMap<String, Record>>,
}

impl DataStore {
    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// `data.create` params.
#[derive(Clone, Debug, Deserialize)]
pub struct CreateParams {
    /// Display name. Must not be blank.
    pub name: String,
    /// Initial attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// `data.create` result.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    /// New record id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Params addressing one record.
#[derive(Clone, Debug, Deserialize)]
pub struct IdParams {
    /// Record id.
    pub id: String,
}

/// `data.update` params.
#[derive(Clone, Debug, Deserialize)]
pub struct UpdateParams {
    /// Record id.
    pub id: String,
    /// Attributes to merge. A `null` value removes the key.
    pub attributes: Map<String, Value>,
}

/// `data.update` result.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Updated {
    /// Record id.
    pub id: String,
    /// RFC 3339 update time.
    pub updated_at: String,
}

/// `data.list` result.
#[derive(Clone, Debug, Serialize)]
pub struct RecordList {
    /// Records ordered by id (and thus by creation time).
    pub records: Vec<Record>,
}

/// Payload of a `data.deleted` event.
#[derive(Clone, Debug, Serialize)]
pub struct Deleted {
    /// Removed record id.
    pub id: String,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn not_found(id: &str) -> RpcError {
    RpcError::custom(NOT_FOUND, format!("record '{id}' not found"))
}

/// Create a record and publish `data.created`.
pub fn create(
    store: &DataStore,
    broadcaster: &Broadcaster,
    params: CreateParams,
) -> Result<Created, RpcError> {
    let name = params.name.trim();
    if name.is_empty() {
        return Err(RpcError::invalid_field("name", "name must not be empty"));
    }
    let timestamp = now();
    let record = Record {
        id: format!("rec_{}", uuid::Uuid::now_v7()),
        name: name.to_owned(),
        attributes: params.attributes,
        created_at: timestamp.clone(),
        updated_at: timestamp,
    };
    let _ = store.records.lock().insert(record.id.clone(), record.clone());
    debug!(record_id = %record.id, "record created");

    let _ = broadcaster.publish(Topic::DataCreated, &record);
    Ok(Created {
        id: record.id,
        name: record.name,
        created_at: record.created_at,
    })
}

/// Fetch one record.
pub fn get(store: &DataStore, params: &IdParams) -> Result<Record, RpcError> {
    store
        .records
        .lock()
        .get(&params.id)
        .cloned()
        .ok_or_else(|| not_found(&params.id))
}

/// All records, ordered by id.
pub fn list(store: &DataStore) -> RecordList {
    let mut records: Vec<Record> = store.records.lock().values().cloned().collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    RecordList { records }
}

/// Merge attributes into a record and publish `data.updated`.
pub fn update(
    store: &DataStore,
    broadcaster: &Broadcaster,
    params: UpdateParams,
) -> Result<Updated, RpcError> {
    let record = {
        let mut records = store.records.lock();
        let record = records
            .get_mut(&params.id)
            .ok_or_else(|| not_found(&params.id))?;
        for (key, value) in params.attributes {
            if value.is_null() {
                let _ = record.attributes.remove(&key);
            } else {
                let _ = record.attributes.insert(key, value);
            }
        }
        record.updated_at = now();
        record.clone()
    };
    debug!(record_id = %record.id, "record updated");

    let _ = broadcaster.publish(Topic::DataUpdated, &record);
    Ok(Updated {
        id: record.id,
        updated_at: record.updated_at,
    })
}

/// Remove a record and publish `data.deleted`.
pub fn delete(store: &DataStore, broadcaster: &Broadcaster, params: IdParams) -> Result<Ack, RpcError> {
    if store.records.lock().remove(&params.id).is_none() {
        return Err(not_found(&params.id));
    }
    debug!(record_id = %params.id, "record deleted");

    let _ = broadcaster.publish(Topic::DataDeleted, &Deleted { id: params.id });
    Ok(Ack { success: true })
}

pub(super) fn register(builder: &mut RegistryBuilder, services: &HubServices) {
    let store = Arc::clone(&services.store);
    let broadcaster = services.broadcaster.clone();
    let _ = builder
        .method(
            "data.create",
            "Create a record. Publishes `data.created`.",
            move |_ctx: HandlerContext, params: CreateParams| {
                let result = create(&store, &broadcaster, params);
                async move { result }
            },
        )
        .http(HttpVerb::Post, "/api/data");

    let store = Arc::clone(&services.store);
    let _ = builder
        .method(
            "data.get",
            "Fetch one record by id.",
            move |_ctx: HandlerContext, params: IdParams| {
                let result = get(&store, &params);
                async move { result }
            },
        )
        .http(HttpVerb::Post, "/api/data/get");

    let store = Arc::clone(&services.store);
    let _ = builder
        .method(
            "data.list",
            "List all records.",
            move |_ctx: HandlerContext, _params: NoParams| {
                let result = list(&store);
                async move { Ok(result) }
            },
        )
        .http(HttpVerb::Get, "/api/data");

    let store = Arc::clone(&services.store);
    let broadcaster = services.broadcaster.clone();
    let _ = builder
        .method(
            "data.update",
            "Merge attributes into a record. Publishes `data.updated`.",
            move |_ctx: HandlerContext, params: UpdateParams| {
                let result = update(&store, &broadcaster, params);
                async move { result }
            },
        )
        .http(HttpVerb::Put, "/api/data");

    let store = Arc::clone(&services.store);
    let broadcaster = services.broadcaster.clone();
    let _ = builder
        .method(
            "data.delete",
            "Delete a record. Publishes `data.deleted`.",
            move |_ctx: HandlerContext, params: IdParams| {
                let result = delete(&store, &broadcaster, params);
                async move { result }
            },
        )
        .http(HttpVerb::Delete, "/api/data");

    let _ = builder
        .event::<Record>(Topic::DataCreated, "A record was created.")
        .event::<Record>(Topic::DataUpdated, "A record was updated.")
        .event::<Deleted>(Topic::DataDeleted, "A record was deleted.");
}
