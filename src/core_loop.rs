// 网关主循环
// Gateway aggregate: owns every subsystem and drives them from one cooperative tick

use crate::admin::{self, AdminContext, AdminRequest, AdminResponse, AdminServer};
use crate::config::GatewayConfig;
use crate::debug_log::DebugLog;
use crate::drivers::cloud::Publisher;
use crate::drivers::link::LinkManager;
use crate::drivers::modbus::ModbusTransport;
use crate::poll_engine::{PollContext, PollEngine};
use crate::registry::{RegistryError, ReloadReport, SlaveRegistry};
use crate::stats::{StatsLedger, TimingLedger};
use crate::storage::ConfigStore;
use crate::templates::{ensure_default_templates, TemplateStore};
use log::{error, info};

pub struct Gateway<T: ModbusTransport, P: Publisher> {
    store: Box<dyn ConfigStore>,
    templates: TemplateStore,
    registry: SlaveRegistry,
    engine: PollEngine,
    stats: StatsLedger,
    timing: TimingLedger,
    debug: DebugLog,
    transport: T,
    publisher: P,
    link: Box<dyn LinkManager>,
    admin: Option<AdminServer>,
    reload_requested: bool,
}

impl<T: ModbusTransport, P: Publisher> Gateway<T, P> {
    pub fn new(
        store: Box<dyn ConfigStore>,
        transport: T,
        publisher: P,
        link: Box<dyn LinkManager>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            store,
            templates: TemplateStore::new(),
            registry: SlaveRegistry::new(),
            engine: PollEngine::new(config.polling.query_interval_ms, config.polling.settle_ms),
            stats: StatsLedger::with_capacity(config.stats_capacity),
            timing: TimingLedger::new(0),
            debug: DebugLog::new(),
            transport,
            publisher,
            link,
            admin: None,
            reload_requested: false,
        }
    }

    pub fn with_admin(mut self, server: AdminServer) -> Self {
        self.admin = Some(server);
        self
    }

    /// Write missing default templates and load the registry for the first time
    pub fn start(&mut self) -> Result<ReloadReport, RegistryError> {
        ensure_default_templates(self.store.as_mut())?;
        self.reload()
    }

    /// Rebuild the registry and restart the engine on the new list.
    /// On failure the engine keeps polling the previous list.
    pub fn reload(&mut self) -> Result<ReloadReport, RegistryError> {
        self.reload_requested = false;
        self.templates.invalidate();
        let report = self.registry.reload(self.store.as_ref(), &mut self.templates)?;
        self.engine
            .reset(&mut self.transport, self.registry.list(), report.polling);
        Ok(report)
    }

    /// Serve one admin request; mutating routes schedule a reload for the next tick
    pub fn handle_admin(&mut self, request: &AdminRequest, now_ms: u64) -> AdminResponse {
        let mut ctx = AdminContext {
            store: self.store.as_mut(),
            templates: &mut self.templates,
            stats: &mut self.stats,
            timing: &mut self.timing,
            debug: &mut self.debug,
            link: self.link.as_mut(),
            now_ms,
        };
        let handled = admin::dispatch(request, &mut ctx);
        if handled.reload {
            info!("{} changed the configuration, reload scheduled", request.path);
            self.reload_requested = true;
        }
        handled.response
    }

    fn drain_admin(&mut self, now_ms: u64) {
        loop {
            let Some((request, raw)) = self.admin.as_ref().and_then(AdminServer::try_next) else {
                return;
            };
            let response = self.handle_admin(&request, now_ms);
            AdminServer::respond(raw, response);
        }
    }

    /// One scheduler step
    pub fn tick(&mut self, now_ms: u64) {
        self.drain_admin(now_ms);
        if self.reload_requested {
            if let Err(e) = self.reload() {
                error!("Reload failed, keeping the previous slave list: {}", e);
            }
        }

        self.link.service(now_ms);
        self.publisher.service(now_ms);

        let mut ctx = PollContext {
            transport: &mut self.transport,
            publisher: &mut self.publisher,
            stats: &mut self.stats,
            timing: &mut self.timing,
            debug: &mut self.debug,
        };
        self.engine.tick(now_ms, &mut ctx);
    }

    pub fn reload_pending(&self) -> bool {
        self.reload_requested
    }

    pub fn engine(&self) -> &PollEngine {
        &self.engine
    }

    pub fn registry(&self) -> &SlaveRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsLedger {
        &self.stats
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.debug
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn ConfigStore {
        self.store.as_mut()
    }
}
