// 管理接口
// Admin routes: pure request dispatch over the gateway state, plus the tiny_http transport

use crate::debug_log::DebugLog;
use crate::drivers::link::LinkManager;
use crate::registry;
use crate::stats::{StatsLedger, TimingLedger};
use crate::storage::{
    load_network_params, load_polling_config, load_slave_document, save_network_params,
    save_polling_config, save_slave_document, ConfigStore,
};
use crate::templates::{diff, merge, Document, TemplateError, TemplateStore};
use crate::types::{NetworkParams, PollingConfig, SlaveDocument, SlaveRecord};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRequest {
    pub method: Method,
    pub path: String,
    pub body: String,
}

impl AdminRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            body: String::new(),
        }
    }

    pub fn post(path: &str, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminResponse {
    pub status: u16,
    pub body: String,
}

impl AdminResponse {
    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::error(500, &format!("Serialization failed: {}", e)),
        }
    }

    fn success() -> Self {
        Self {
            status: 200,
            body: json!({"status": "success"}).to_string(),
        }
    }

    fn success_with(message: &str) -> Self {
        Self {
            status: 200,
            body: json!({"status": "success", "message": message}).to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({"status": "error", "message": message}).to_string(),
        }
    }
}

/// Result of one admin request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub response: AdminResponse,
    /// The registry or polling timing changed; the engine must reload
    pub reload: bool,
}

impl From<AdminResponse> for Handled {
    fn from(response: AdminResponse) -> Self {
        Self {
            response,
            reload: false,
        }
    }
}

impl Handled {
    fn reload(response: AdminResponse) -> Self {
        Self {
            response,
            reload: true,
        }
    }
}

/// Gateway state the admin surface may read or mutate
pub struct AdminContext<'a> {
    pub store: &'a mut dyn ConfigStore,
    pub templates: &'a mut TemplateStore,
    pub stats: &'a mut StatsLedger,
    pub timing: &'a mut TimingLedger,
    pub debug: &'a mut DebugLog,
    pub link: &'a mut dyn LinkManager,
    pub now_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SlaveKey {
    #[serde(rename = "slaveId")]
    slave_id: u8,
    #[serde(rename = "slaveName")]
    slave_name: String,
}

#[derive(Debug, Deserialize)]
struct DebugToggle {
    #[serde(default)]
    enabled: bool,
}

type HandlerResult = Result<Handled, AdminResponse>;
type Handler = fn(&AdminRequest, &mut AdminContext<'_>) -> HandlerResult;

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, AdminResponse> {
    if body.trim().is_empty() {
        return Err(AdminResponse::error(400, "Empty request body"));
    }
    let value: Value = serde_json::from_str(body).map_err(|e| {
        warn!("JSON parsing failed: {}", e);
        AdminResponse::error(400, "Invalid JSON")
    })?;
    serde_json::from_value(value).map_err(|e| AdminResponse::error(400, &format!("Invalid request: {}", e)))
}

fn storage_failure(e: impl std::fmt::Display) -> AdminResponse {
    error!("Config store failure: {}", e);
    AdminResponse::error(500, &e.to_string())
}

fn matches_key(entry: &Value, id: u8, name: &str) -> bool {
    entry.get("id").and_then(Value::as_u64) == Some(id as u64)
        && entry.get("name").and_then(Value::as_str) == Some(name)
}

/// Route one request
pub fn dispatch(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> Handled {
    debug!("Admin {:?} {}", request.method, request.path);
    let (method, handler): (Method, Handler) = match request.path.as_str() {
        "/getslaves" => (Method::Get, get_slaves),
        "/saveslaves" => (Method::Post, save_slaves),
        "/getslaveconfig" => (Method::Post, get_slave_config),
        "/updateslaveconfig" => (Method::Post, update_slave_config),
        "/getpollingconfig" => (Method::Get, get_polling_config),
        "/savepollingconfig" => (Method::Post, save_polling),
        "/getstatistics" => (Method::Get, get_statistics),
        "/removeslavestats" => (Method::Post, remove_slave_stats),
        "/toggledebug" => (Method::Post, toggle_debug),
        "/getdebugstate" => (Method::Get, get_debug_state),
        "/getdebugmessages" => (Method::Get, get_debug_messages),
        "/cleartable" => (Method::Post, clear_table),
        "/getwifi" => (Method::Get, get_wifi),
        "/savewifi" => (Method::Post, save_wifi),
        "/getipinfo" => (Method::Get, get_ip_info),
        _ => return AdminResponse::error(404, "Not found").into(),
    };
    if method != request.method {
        return AdminResponse::error(405, "Method not allowed").into();
    }
    handler(request, ctx).unwrap_or_else(Handled::from)
}

fn get_slaves(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let document = load_slave_document(&*ctx.store).map_err(storage_failure)?;
    Ok(AdminResponse::json(&document.unwrap_or_default()).into())
}

/// Every entry must materialise and ids must be unique
fn validate_entries(
    entries: &[Value],
    store: &dyn ConfigStore,
    templates: &mut TemplateStore,
) -> Result<(), AdminResponse> {
    let mut seen = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let slave = registry::materialise(entry, store, templates)
            .map_err(|e| AdminResponse::error(400, &format!("Slave {}: {}", index, e)))?;
        if !seen.insert(slave.id) {
            return Err(AdminResponse::error(
                400,
                &format!("Slave {}: duplicate slave id {}", index, slave.id),
            ));
        }
    }
    Ok(())
}

fn save_slaves(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let mut incoming: SlaveDocument = parse_body(&request.body)?;
    info!("Received slave config: {} entries", incoming.slaves.len());

    match load_slave_document(&*ctx.store) {
        Ok(Some(existing)) => preserve_overrides(&mut incoming, &existing),
        Ok(None) => {}
        Err(e) => warn!("Existing slave config unreadable, overrides not preserved: {}", e),
    }

    validate_entries(&incoming.slaves, &*ctx.store, ctx.templates)?;
    save_slave_document(ctx.store, &incoming).map_err(storage_failure)?;
    ctx.templates.invalidate();
    Ok(Handled::reload(AdminResponse::success()))
}

/// Carry each stored `override` over to the incoming entry with the same id and name
fn preserve_overrides(incoming: &mut SlaveDocument, existing: &SlaveDocument) {
    for entry in incoming.slaves.iter_mut() {
        let Some(object) = entry.as_object_mut() else {
            continue;
        };
        if object.contains_key("override") {
            continue;
        }
        let (Some(id), Some(name)) = (
            object.get("id").and_then(Value::as_u64),
            object.get("name").and_then(Value::as_str).map(str::to_string),
        ) else {
            continue;
        };
        let Ok(id) = u8::try_from(id) else {
            continue;
        };
        let stored = existing
            .slaves
            .iter()
            .find(|e| matches_key(e, id, &name))
            .and_then(|e| e.get("override"))
            .filter(|o| o.is_object());
        if let Some(overrides) = stored {
            object.insert("override".to_string(), overrides.clone());
            info!("Preserved overrides for slave {}: {}", id, name);
        }
    }
}

fn find_stored(ctx: &AdminContext<'_>, id: u8, name: &str) -> Result<(SlaveDocument, usize), AdminResponse> {
    let document = load_slave_document(&*ctx.store)
        .map_err(storage_failure)?
        .ok_or_else(|| AdminResponse::error(404, "No slave configuration found"))?;
    let index = document
        .slaves
        .iter()
        .position(|e| matches_key(e, id, name))
        .ok_or_else(|| AdminResponse::error(404, "Slave not found"))?;
    Ok((document, index))
}

fn get_slave_config(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let key: SlaveKey = parse_body(&request.body)?;
    let (document, index) = find_stored(ctx, key.slave_id, &key.slave_name)?;
    let entry = &document.slaves[index];
    let record: SlaveRecord = serde_json::from_value(entry.clone())
        .map_err(|e| AdminResponse::error(500, &format!("Stored slave is malformed: {}", e)))?;

    let template = match ctx.templates.load_template(&*ctx.store, &record.device_type) {
        Ok(template) => template,
        Err(TemplateError::NotFound(device_type)) => {
            warn!("No template for {}, returning raw config", device_type);
            return Ok(AdminResponse::json(entry).into());
        }
        Err(e) => return Err(storage_failure(e)),
    };
    let merged = merge(&record.overrides.clone().unwrap_or_default(), &template)
        .map_err(|e| AdminResponse::error(500, &e.to_string()))?;

    let mut view = Map::new();
    for field in SlaveRecord::BASIC_FIELDS {
        if let Some(value) = entry.get(field) {
            view.insert(field.to_string(), value.clone());
        }
    }
    view.extend(merged);
    info!(
        "Sent merged config for slave {}: {} (template: {})",
        record.id, record.name, record.device_type
    );
    Ok(AdminResponse::json(&view).into())
}

fn update_slave_config(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let update: Document = parse_body(&request.body)?;
    let id = update.get("id").and_then(Value::as_u64).and_then(|id| u8::try_from(id).ok());
    let name = update.get("name").and_then(Value::as_str);
    let (Some(id), Some(name)) = (id, name) else {
        return Err(AdminResponse::error(400, "Missing required fields: id or name"));
    };

    let (mut document, index) = find_stored(ctx, id, name)?;
    let stored = document.slaves[index].clone();
    let Some(device_type) = stored.get("deviceType").and_then(Value::as_str) else {
        return Err(AdminResponse::error(404, "Slave not found or no deviceType"));
    };
    let template = match ctx.templates.load_template(&*ctx.store, device_type) {
        Ok(template) => template,
        Err(TemplateError::NotFound(_)) => {
            return Err(AdminResponse::error(404, "Template not found for device type"))
        }
        Err(e) => return Err(storage_failure(e)),
    };

    let params: Document = update
        .iter()
        .filter(|(key, _)| !SlaveRecord::BASIC_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let overrides = diff(&params, &template);
    debug!("Detected {} parameter overrides", overrides.len());

    let mut entry = Map::new();
    entry.insert("id".to_string(), json!(id));
    entry.insert("name".to_string(), json!(name));
    entry.insert("deviceType".to_string(), json!(device_type));
    for field in ["startReg", "numReg", "mqttTopic", "registerSize", "ct", "pt"] {
        if let Some(value) = update.get(field).or_else(|| stored.get(field)) {
            entry.insert(field.to_string(), value.clone());
        }
    }
    if !overrides.is_empty() {
        entry.insert("override".to_string(), Value::Object(overrides));
    }
    let entry = Value::Object(entry);
    registry::materialise(&entry, &*ctx.store, ctx.templates)
        .map_err(|e| AdminResponse::error(400, &e.to_string()))?;

    document.slaves[index] = entry;
    save_slave_document(ctx.store, &document).map_err(storage_failure)?;
    ctx.templates.invalidate();
    Ok(Handled::reload(AdminResponse::success_with(
        "Slave configuration updated successfully",
    )))
}

fn get_polling_config(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let config = load_polling_config(&*ctx.store).map_err(storage_failure)?;
    Ok(AdminResponse::json(&config).into())
}

fn save_polling(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let config: PollingConfig = parse_body(&request.body)?;
    config
        .validate()
        .map_err(|message| AdminResponse::error(400, &message))?;
    save_polling_config(ctx.store, &config).map_err(storage_failure)?;
    Ok(Handled::reload(AdminResponse::success()))
}

fn get_statistics(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    Ok(AdminResponse::json(&ctx.stats.snapshot()).into())
}

fn remove_slave_stats(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let key: SlaveKey = parse_body(&request.body)?;
    ctx.stats.remove(key.slave_id, &key.slave_name);
    Ok(AdminResponse::success().into())
}

fn toggle_debug(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let toggle: DebugToggle = parse_body(&request.body)?;
    ctx.debug.set_enabled(toggle.enabled);
    info!("Debug mode {}", if toggle.enabled { "enabled" } else { "disabled" });
    Ok(AdminResponse::success().into())
}

fn get_debug_state(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    Ok(AdminResponse::json(&json!({"enabled": ctx.debug.is_enabled()})).into())
}

fn get_debug_messages(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    Ok(AdminResponse::json(&ctx.debug.drain()).into())
}

fn clear_table(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    ctx.timing.reset_all(ctx.now_ms);
    ctx.debug.clear();
    Ok(AdminResponse::success_with("Table cleared and timing reset").into())
}

fn get_wifi(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let params = load_network_params(&*ctx.store).map_err(storage_failure)?;
    Ok(AdminResponse::json(&params).into())
}

fn save_wifi(request: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    let params: NetworkParams = parse_body(&request.body)?;
    save_network_params(ctx.store, &params).map_err(storage_failure)?;
    ctx.link.apply(&params);
    info!("Network settings saved");
    Ok(AdminResponse::success().into())
}

fn get_ip_info(_: &AdminRequest, ctx: &mut AdminContext<'_>) -> HandlerResult {
    Ok(AdminResponse::json(&ctx.link.info()).into())
}

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Cannot bind admin server on {addr}: {message}")]
    Bind { addr: String, message: String },
}

/// Non-blocking HTTP front end for [`dispatch`]
pub struct AdminServer {
    server: tiny_http::Server,
}

impl AdminServer {
    pub fn bind(addr: &str) -> Result<Self, AdminError> {
        let server = tiny_http::Server::http(addr).map_err(|e| AdminError::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        info!("Admin server listening on {}", addr);
        Ok(Self { server })
    }

    /// Next queued request, if any
    pub fn try_next(&self) -> Option<(AdminRequest, tiny_http::Request)> {
        let mut raw = match self.server.try_recv() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("Admin server receive failed: {}", e);
                return None;
            }
        };
        let method = match raw.method() {
            tiny_http::Method::Get => Method::Get,
            tiny_http::Method::Post => Method::Post,
            _ => Method::Other,
        };
        let path = raw.url().split('?').next().unwrap_or_default().to_string();
        let mut body = String::new();
        if let Err(e) = raw.as_reader().read_to_string(&mut body) {
            warn!("Failed to read request body for {}: {}", path, e);
        }
        Some((AdminRequest { method, path, body }, raw))
    }

    pub fn respond(raw: tiny_http::Request, response: AdminResponse) {
        let mut reply = tiny_http::Response::from_string(response.body).with_status_code(response.status);
        if let Ok(header) = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
            reply = reply.with_header(header);
        }
        if let Err(e) = raw.respond(reply) {
            warn!("Failed to send admin response: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::link::HostLink;
    use crate::storage::{MemoryStore, NETWORK_PATH, POLLING_PATH, SLAVES_PATH};
    use crate::types::Outcome;

    struct State {
        store: MemoryStore,
        templates: TemplateStore,
        stats: StatsLedger,
        timing: TimingLedger,
        debug: DebugLog,
        link: HostLink,
    }

    impl State {
        fn new(store: MemoryStore) -> Self {
            Self {
                store,
                templates: TemplateStore::new(),
                stats: StatsLedger::default(),
                timing: TimingLedger::new(0),
                debug: DebugLog::new(),
                link: HostLink::new(NetworkParams::default()),
            }
        }

        fn call(&mut self, request: AdminRequest) -> Handled {
            let mut ctx = AdminContext {
                store: &mut self.store,
                templates: &mut self.templates,
                stats: &mut self.stats,
                timing: &mut self.timing,
                debug: &mut self.debug,
                link: &mut self.link,
                now_ms: 10_000,
            };
            dispatch(&request, &mut ctx)
        }

        fn body(&mut self, request: AdminRequest) -> Value {
            let handled = self.call(request);
            assert_eq!(handled.response.status, 200, "{}", handled.response.body);
            serde_json::from_str(&handled.response.body).unwrap()
        }

        fn stored_slaves(&self) -> Value {
            serde_json::from_str(&self.store.read(SLAVES_PATH).unwrap().unwrap()).unwrap()
        }
    }

    fn meter_entry() -> Value {
        json!({
            "id": 9, "name": "Main", "deviceType": "HeylaParam",
            "startReg": 0, "numReg": 20, "mqttTopic": "meter/main", "registerSize": 1,
            "ct": 100.0, "pt": 1.0,
            "override": {"meter": {"aActivePower": {"divider": 2000.0}}}
        })
    }

    #[test]
    fn unknown_route_and_bad_json() {
        let mut state = State::new(MemoryStore::new());
        assert_eq!(state.call(AdminRequest::get("/nope")).response.status, 404);
        let bad = state.call(AdminRequest::post("/saveslaves", "{oops"));
        assert_eq!(bad.response.status, 400);
        assert_eq!(
            serde_json::from_str::<Value>(&bad.response.body).unwrap(),
            json!({"status": "error", "message": "Invalid JSON"})
        );
        assert!(!bad.reload);
        assert_eq!(state.call(AdminRequest::get("/saveslaves")).response.status, 405);
    }

    #[test]
    fn get_slaves_defaults_to_empty_list() {
        let mut state = State::new(MemoryStore::new());
        assert_eq!(state.body(AdminRequest::get("/getslaves")), json!({"slaves": []}));
    }

    #[test]
    fn save_slaves_preserves_overrides_and_requests_reload() {
        let existing = json!({"slaves": [meter_entry()]}).to_string();
        let mut state = State::new(MemoryStore::new().with_file(SLAVES_PATH, existing));

        let mut replacement = meter_entry();
        replacement.as_object_mut().unwrap().remove("override");
        replacement["mqttTopic"] = json!("meter/renamed");
        let handled = state.call(AdminRequest::post(
            "/saveslaves",
            json!({"slaves": [replacement]}).to_string(),
        ));
        assert_eq!(handled.response.status, 200);
        assert!(handled.reload);

        let stored = state.stored_slaves();
        assert_eq!(stored["slaves"][0]["mqttTopic"], "meter/renamed");
        assert_eq!(stored["slaves"][0]["override"]["meter"]["aActivePower"]["divider"], json!(2000.0));
    }

    #[test]
    fn save_slaves_rejects_invalid_entries() {
        let mut state = State::new(MemoryStore::new());
        let mut bad = meter_entry();
        bad["numReg"] = json!(0);
        let handled = state.call(AdminRequest::post("/saveslaves", json!({"slaves": [bad]}).to_string()));
        assert_eq!(handled.response.status, 400);
        assert!(!handled.reload);
        assert!(!state.store.exists(SLAVES_PATH));
    }

    #[test]
    fn slave_config_view_is_materialised() {
        let existing = json!({"slaves": [meter_entry()]}).to_string();
        let mut state = State::new(MemoryStore::new().with_file(SLAVES_PATH, existing));
        let view = state.body(AdminRequest::post(
            "/getslaveconfig",
            json!({"slaveId": 9, "slaveName": "Main"}).to_string(),
        ));
        assert_eq!(view["deviceType"], "HeylaParam");
        assert_eq!(view["meter"]["aActivePower"]["divider"], json!(2000.0));
        assert_eq!(view["meter"]["bActivePower"]["divider"], json!(1000.0));
        assert!(view.get("override").is_none());

        let missing = state.call(AdminRequest::post(
            "/getslaveconfig",
            json!({"slaveId": 9, "slaveName": "Other"}).to_string(),
        ));
        assert_eq!(missing.response.status, 404);
    }

    #[test]
    fn update_slave_config_stores_only_the_diff() {
        let existing = json!({"slaves": [meter_entry()]}).to_string();
        let mut state = State::new(MemoryStore::new().with_file(SLAVES_PATH, existing));
        let view = state.body(AdminRequest::post(
            "/getslaveconfig",
            json!({"slaveId": 9, "slaveName": "Main"}).to_string(),
        ));

        let mut edited = view.clone();
        edited["meter"]["aActivePower"]["divider"] = json!(1000.0);
        edited["meter"]["aCurrent"]["divider"] = json!(10.0);
        edited["deviceType"] = json!("G01S");
        let handled = state.call(AdminRequest::post("/updateslaveconfig", edited.to_string()));
        assert_eq!(handled.response.status, 200, "{}", handled.response.body);
        assert!(handled.reload);

        let stored = &state.stored_slaves()["slaves"][0];
        assert_eq!(stored["deviceType"], "HeylaParam");
        assert_eq!(stored["ct"], json!(100.0));
        assert_eq!(
            stored["override"],
            json!({"meter": {"aCurrent": {"divider": 10.0}}})
        );
    }

    #[test]
    fn update_requires_id_and_name() {
        let mut state = State::new(MemoryStore::new());
        let handled = state.call(AdminRequest::post("/updateslaveconfig", r#"{"name":"x"}"#));
        assert_eq!(handled.response.status, 400);
    }

    #[test]
    fn polling_config_round_trip() {
        let mut state = State::new(MemoryStore::new());
        assert_eq!(
            state.body(AdminRequest::get("/getpollingconfig")),
            json!({"pollInterval": 10, "timeout": 1})
        );
        let handled = state.call(AdminRequest::post(
            "/savepollingconfig",
            r#"{"pollInterval": 5, "timeout": 2}"#,
        ));
        assert!(handled.reload);
        assert!(state.store.exists(POLLING_PATH));
        assert_eq!(
            state.body(AdminRequest::get("/getpollingconfig")),
            json!({"pollInterval": 5, "timeout": 2})
        );

        let zero = state.call(AdminRequest::post("/savepollingconfig", r#"{"pollInterval": 0}"#));
        assert_eq!(zero.response.status, 400);
    }

    #[test]
    fn oversized_polling_values_are_rejected() {
        let mut state = State::new(MemoryStore::new());
        for body in [
            r#"{"pollInterval": 18446744073709552, "timeout": 1}"#,
            r#"{"pollInterval": 10, "timeout": 3601}"#,
        ] {
            let handled = state.call(AdminRequest::post("/savepollingconfig", body));
            assert_eq!(handled.response.status, 400, "{}", body);
            assert!(!handled.reload);
        }
        assert!(!state.store.exists(POLLING_PATH));
    }

    #[test]
    fn statistics_view_and_removal() {
        let mut state = State::new(MemoryStore::new());
        state.stats.record(3, "Room", Outcome::Success);
        state.stats.record(4, "Hall", Outcome::Timeout);
        let stats = state.body(AdminRequest::get("/getstatistics"));
        assert_eq!(stats.as_array().unwrap().len(), 2);
        assert_eq!(stats[0]["statusHistory"], "S  ");

        state.body(AdminRequest::post(
            "/removeslavestats",
            json!({"slaveId": 3, "slaveName": "Room"}).to_string(),
        ));
        let stats = state.body(AdminRequest::get("/getstatistics"));
        assert_eq!(stats.as_array().unwrap().len(), 1);
        assert_eq!(stats[0]["slaveName"], "Hall");
    }

    #[test]
    fn debug_toggle_and_clear_table() {
        let mut state = State::new(MemoryStore::new());
        state.body(AdminRequest::post("/toggledebug", r#"{"enabled": true}"#));
        assert_eq!(state.body(AdminRequest::get("/getdebugstate")), json!({"enabled": true}));
        state.timing.since_any_delta(500);

        let cleared = state.body(AdminRequest::post("/cleartable", ""));
        assert_eq!(cleared["status"], "success");
        assert_eq!(state.timing.real_time(10_000), "00:00:00");
        assert_eq!(state.body(AdminRequest::get("/getdebugmessages")), json!([]));
    }

    #[test]
    fn wifi_settings_persist() {
        let mut state = State::new(MemoryStore::new());
        assert_eq!(state.body(AdminRequest::get("/getwifi"))["mqtt_port"], 1883);
        let params = NetworkParams {
            sta_ssid: "plant".to_string(),
            mqtt_server: "10.0.0.7".to_string(),
            ..Default::default()
        };
        state.body(AdminRequest::post("/savewifi", serde_json::to_string(&params).unwrap()));
        assert!(state.store.exists(NETWORK_PATH));
        assert!(state.link.restart_pending());
        assert_eq!(state.body(AdminRequest::get("/getwifi"))["sta_ssid"], "plant");
    }
}
