/// OPC UA bridge server
///
/// This module owns the lifecycle state machine, the read/write value
/// callbacks and the scan-tick publisher. A fresh stack instance is
/// created for every start and destroyed on stop or on any startup
/// failure; reusing an instance across restarts leaks allocations inside
/// the protocol stack.
///
/// Locking discipline:
/// - the image mutex (scan lock) protects every process-image slot and is
///   held only for the write-apply step and the publish snapshot
/// - the control mutex (bridge lock) protects the lifecycle state and the
///   binding table, and is never held across a call into the stack
/// - no path calls into the stack while holding the scan lock, and the
///   bridge lock is never taken while the scan lock is held

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::address_space::{AddressSpaceBuilder, BindingTable, NodeBinding};
use crate::error::{BridgeError, BridgeResult};
use crate::image::ProcessImage;
use crate::location::{locate_manifest, parse_manifest_file, ManifestScan};
use crate::logging::BridgeLogger;
use crate::stack::{
    DataValue, NodeContext, ReadCallback, StatusCode, UaStack, ValueCallbacks, WriteCallback,
};
use crate::utils::{OperationTimer, PublishMetrics};

/// Default endpoint port
pub const DEFAULT_PORT: u16 = 4840;

/// Namespace registered for the bridge's nodes
pub const NAMESPACE_URI: &str = "http://openplc.org/";

/// Factory producing a fresh stack instance for each start
pub type StackFactory = Box<dyn Fn() -> Box<dyn UaStack> + Send + Sync>;

/// Lifecycle states; every history is a prefix of
/// `(Idle Starting Running Stopping)*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BridgeState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "idle",
            BridgeState::Starting => "starting",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// What the read callback serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReadMode {
    /// Serve the shadow value with Good status
    #[default]
    Shadow,
    /// Compatibility mode: report Good with no value and let clients rely
    /// on the values the publisher pushes into the nodes
    EmptyGood,
}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// TCP endpoint port
    pub port: u16,
    /// Namespace URI registered at start
    pub namespace_uri: String,
    /// Explicit manifest path; when unset the fixed search list is probed
    pub manifest_path: Option<PathBuf>,
    /// Cooperative sleep between server-loop iterations
    pub iterate_interval: Duration,
    /// How long `stop()` waits for the iterate loop before forcing teardown
    pub stop_grace: Duration,
    /// Read-callback behavior
    pub read_mode: ReadMode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            namespace_uri: NAMESPACE_URI.to_string(),
            manifest_path: None,
            iterate_interval: Duration::from_millis(50),
            stop_grace: Duration::from_millis(100),
            read_mode: ReadMode::default(),
        }
    }
}

/// Bridge statistics
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub state: BridgeState,
    /// Manifest lines that carried the record marker
    pub manifest_seen: usize,
    /// Variable nodes actually created
    pub manifest_added: usize,
    /// Live bindings
    pub bindings: usize,
    pub publish: PublishMetrics,
}

/// State behind the bridge lock
struct Control {
    state: BridgeState,
    bindings: BindingTable,
    manifest_seen: usize,
    manifest_added: usize,
}

/// State shared between the bridge, its callbacks, the iterate loop and
/// the scan publisher
struct BridgeShared {
    image: Arc<Mutex<ProcessImage>>,
    control: Mutex<Control>,
    running: AtomicBool,
    stack: Mutex<Option<Box<dyn UaStack>>>,
    publish_metrics: Mutex<PublishMetrics>,
    logger: BridgeLogger,
    read_mode: ReadMode,
}

impl BridgeShared {
    /// Resolve a node context to its binding; brief bridge-lock hold
    fn binding(&self, handle: NodeContext) -> Option<Arc<NodeBinding>> {
        self.control.lock().unwrap().bindings.get(handle)
    }
}

/// Handle invoked by the scan engine once per cycle
///
/// Cheap to clone and safe to keep across restarts: publishing while the
/// server is not running returns immediately.
#[derive(Clone)]
pub struct ScanPublisher {
    shared: Arc<BridgeShared>,
}

impl ScanPublisher {
    /// Copy image values into the shadow cache under the scan lock, then
    /// push them into the protocol nodes with no lock held
    ///
    /// The caller must not hold the scan lock; publish takes it itself
    /// for the duration of the snapshot.
    pub fn publish(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }

        let bindings = self.shared.control.lock().unwrap().bindings.bindings();

        let started = Instant::now();
        let mut updates = Vec::with_capacity(bindings.len());
        {
            let image = self.shared.image.lock().unwrap();
            for binding in &bindings {
                match image.read(binding.slot) {
                    Ok(value) => {
                        binding.store_shadow(value);
                        updates.push((binding.node_id, value));
                    }
                    Err(error) => {
                        debug!("snapshot skipped for {}: {}", binding.node_id, error)
                    }
                }
            }
        }
        let snapshot = started.elapsed();

        let mut failures = 0u64;
        {
            let mut guard = self.shared.stack.lock().unwrap();
            if let Some(stack) = guard.as_mut() {
                for (node_id, value) in &updates {
                    let status = stack.write_value(*node_id, *value);
                    if !status.is_good() {
                        failures += 1;
                        self.shared
                            .logger
                            .warn(&format!("node value push failed for {}: {}", node_id, status));
                    }
                }
            }
        }

        self.shared.publish_metrics.lock().unwrap().record_cycle(
            snapshot,
            updates.len() as u64,
            failures,
        );
    }
}

/// Bridge server lifecycle operations
#[async_trait]
pub trait BridgeServer: Send {
    /// Start the server; a no-op when not idle
    async fn start(&mut self) -> BridgeResult<()>;

    /// Stop the server; a no-op when not running
    async fn stop(&mut self) -> BridgeResult<()>;

    /// Check if the server is running
    fn is_running(&self) -> bool;

    /// Get bridge statistics
    fn stats(&self) -> BridgeStats;
}

/// The OPC UA bridge server
pub struct OpcUaBridge {
    config: BridgeConfig,
    factory: StackFactory,
    shared: Arc<BridgeShared>,
    loop_handle: Option<JoinHandle<()>>,
}

impl OpcUaBridge {
    /// Create a bridge over a shared process image, with console event
    /// logging
    pub fn new(image: Arc<Mutex<ProcessImage>>, factory: StackFactory, config: BridgeConfig) -> Self {
        Self::with_logger(image, factory, config, BridgeLogger::console())
    }

    /// Create a bridge with an injected event sink
    pub fn with_logger(
        image: Arc<Mutex<ProcessImage>>,
        factory: StackFactory,
        config: BridgeConfig,
        logger: BridgeLogger,
    ) -> Self {
        let shared = Arc::new(BridgeShared {
            image,
            control: Mutex::new(Control {
                state: BridgeState::Idle,
                bindings: BindingTable::new(),
                manifest_seen: 0,
                manifest_added: 0,
            }),
            running: AtomicBool::new(false),
            stack: Mutex::new(None),
            publish_metrics: Mutex::new(PublishMetrics::new()),
            logger,
            read_mode: config.read_mode,
        });
        Self {
            config,
            factory,
            shared,
            loop_handle: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> BridgeState {
        self.shared.control.lock().unwrap().state
    }

    /// Handle for the scan engine's per-cycle publish call
    pub fn publisher(&self) -> ScanPublisher {
        ScanPublisher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot of the live bindings
    pub fn bindings(&self) -> Vec<Arc<NodeBinding>> {
        self.shared.control.lock().unwrap().bindings.bindings()
    }

    fn load_manifest_scan(&self) -> ManifestScan {
        let path = match &self.config.manifest_path {
            Some(path) => Some(path.clone()),
            None => locate_manifest(),
        };
        let Some(path) = path else {
            self.shared
                .logger
                .warn("manifest not found in search paths, no nodes created");
            return ManifestScan::default();
        };
        match parse_manifest_file(&path) {
            Ok(scan) => {
                debug!("manifest read from {}", path.display());
                scan
            }
            Err(error) => {
                self.shared
                    .logger
                    .warn(&format!("manifest {} unreadable: {}", path.display(), error));
                ManifestScan::default()
            }
        }
    }

    async fn start_inner(&mut self) -> BridgeResult<()> {
        let logger = self.shared.logger.clone();
        logger.info(&format!(
            "starting OPC UA bridge on port {}",
            self.config.port
        ));

        // Fresh instance for every start
        let mut stack = (self.factory)();

        let status = stack.configure_endpoint(self.config.port);
        if !status.is_good() {
            return Err(BridgeError::stack("endpoint configuration", status));
        }

        let ns = stack.add_namespace(&self.config.namespace_uri);
        if ns == 0 {
            return Err(BridgeError::namespace(&self.config.namespace_uri));
        }
        logger.info(&format!(
            "namespace {} registered with index {}",
            self.config.namespace_uri, ns
        ));
        logger.info(&format!(
            "stack runtime: {}, bridge {}",
            stack.software_version(),
            crate::VERSION
        ));

        let scan = self.load_manifest_scan();
        for error in &scan.errors {
            logger.warn(&format!("manifest record skipped: {}", error));
        }

        // Resolve every record against the image in one scan-lock hold,
        // released before any stack call below.
        let (resolved, skipped_absent, skipped_unsupported) = {
            let image = self.shared.image.lock().unwrap();
            let mut resolved = Vec::new();
            let mut skipped_absent = 0usize;
            let mut skipped_unsupported = 0usize;
            for variable in &scan.variables {
                match image.resolve(&variable.location) {
                    Ok(found) => resolved.push((variable.clone(), found)),
                    Err(BridgeError::Unsupported { .. }) => skipped_unsupported += 1,
                    Err(BridgeError::Unavailable { .. }) => skipped_absent += 1,
                    Err(error) => logger.warn(&format!(
                        "manifest record {} skipped: {}",
                        variable.location, error
                    )),
                }
            }
            (resolved, skipped_absent, skipped_unsupported)
        };
        if skipped_absent > 0 || skipped_unsupported > 0 {
            logger.info(&format!(
                "skipped {} absent and {} unsupported manifest records",
                skipped_absent, skipped_unsupported
            ));
        }

        let callbacks = make_callbacks(&self.shared);
        let timer = OperationTimer::start("address space construction");
        let mut added = 0usize;
        {
            let mut builder = AddressSpaceBuilder::new(stack.as_mut(), ns);
            let program_folder = builder.ensure_folders()?;

            for (variable, found) in resolved {
                let node_id = builder.allocate_node_id();
                let binding = NodeBinding::new(
                    node_id,
                    variable.name.clone(),
                    found.slot,
                    found.scalar_type,
                );
                // The binding must be resolvable before the node is live
                let handle = self.shared.control.lock().unwrap().bindings.insert(binding);

                let status = builder.add_variable(
                    program_folder,
                    node_id,
                    &variable.name,
                    found.scalar_type,
                    handle,
                    callbacks.clone(),
                );
                if status.is_good() {
                    added += 1;
                    logger.info(&format!(
                        "node {} added for {} as {}",
                        node_id, variable.location, variable.name
                    ));
                } else {
                    self.shared.control.lock().unwrap().bindings.remove(handle);
                    logger.warn(&format!(
                        "node for {} not created: {}",
                        variable.name, status
                    ));
                }
            }
        }
        timer.stop();

        {
            let mut control = self.shared.control.lock().unwrap();
            control.manifest_seen = scan.seen;
            control.manifest_added = added;
        }
        logger.info(&format!(
            "manifest ingestion complete: seen={}, added={}",
            scan.seen, added
        ));

        let status = stack.run_startup();
        if !status.is_good() {
            return Err(BridgeError::stack("startup", status));
        }

        *self.shared.stack.lock().unwrap() = Some(stack);
        self.shared.publish_metrics.lock().unwrap().reset();
        self.shared.running.store(true, Ordering::Release);
        self.shared.control.lock().unwrap().state = BridgeState::Running;
        logger.info(&format!(
            "OPC UA bridge running on port {}",
            self.config.port
        ));

        let shared = Arc::clone(&self.shared);
        let interval = self.config.iterate_interval;
        self.loop_handle = Some(tokio::spawn(async move {
            debug!("iterate loop entered");
            while shared.running.load(Ordering::Acquire) {
                {
                    let mut guard = shared.stack.lock().unwrap();
                    match guard.as_mut() {
                        Some(stack) => stack.iterate(true),
                        None => break,
                    }
                }
                tokio::time::sleep(interval).await;
            }
            debug!("iterate loop exited");
        }));
        Ok(())
    }

    /// Destroy the stack instance, drain bindings and return to idle
    fn teardown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
        if let Some(mut stack) = self.shared.stack.lock().unwrap().take() {
            let status = stack.run_shutdown();
            if !status.is_good() {
                warn!("stack shutdown returned {}", status);
            }
        }
        let drained = {
            let mut control = self.shared.control.lock().unwrap();
            let drained = control.bindings.drain();
            control.state = BridgeState::Idle;
            drained
        };
        for binding in drained {
            if Arc::strong_count(&binding) > 1 {
                self.shared
                    .logger
                    .warn(&format!("binding {} still referenced after teardown", binding));
            }
        }
    }
}

#[async_trait]
impl BridgeServer for OpcUaBridge {
    async fn start(&mut self) -> BridgeResult<()> {
        {
            let mut control = self.shared.control.lock().unwrap();
            if control.state != BridgeState::Idle {
                self.shared.logger.warn(&format!(
                    "start request ignored in state {}",
                    control.state
                ));
                return Ok(());
            }
            control.state = BridgeState::Starting;
        }

        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.shared
                    .logger
                    .error(&format!("bridge start failed: {}", error));
                self.teardown();
                Err(error)
            }
        }
    }

    async fn stop(&mut self) -> BridgeResult<()> {
        {
            let mut control = self.shared.control.lock().unwrap();
            if control.state != BridgeState::Running {
                self.shared.logger.warn(&format!(
                    "stop request ignored in state {}",
                    control.state
                ));
                return Ok(());
            }
            control.state = BridgeState::Stopping;
        }

        self.shared.logger.info("stopping OPC UA bridge");
        self.shared.running.store(false, Ordering::Release);

        // Let the iterate loop exit on its own before forcing teardown
        if let Some(mut handle) = self.loop_handle.take() {
            if tokio::time::timeout(self.config.stop_grace, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    "iterate loop did not exit within {:?}, forcing teardown",
                    self.config.stop_grace
                );
                handle.abort();
            }
        }

        self.teardown();
        self.shared.logger.info("OPC UA bridge stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn stats(&self) -> BridgeStats {
        let control = self.shared.control.lock().unwrap();
        BridgeStats {
            state: control.state,
            manifest_seen: control.manifest_seen,
            manifest_added: control.manifest_added,
            bindings: control.bindings.len(),
            publish: self.shared.publish_metrics.lock().unwrap().clone(),
        }
    }
}

/// Build the read/write callback pair over the shared bridge state
fn make_callbacks(shared: &Arc<BridgeShared>) -> ValueCallbacks {
    let read_shared = Arc::clone(shared);
    let on_read: ReadCallback = Arc::new(move |handle: NodeContext| -> DataValue {
        // Pure with respect to the live image: shadow only, no scan lock
        let Some(binding) = read_shared.binding(handle) else {
            return DataValue::empty_good();
        };
        match read_shared.read_mode {
            ReadMode::Shadow => DataValue::good(binding.shadow_value()),
            ReadMode::EmptyGood => DataValue::empty_good(),
        }
    });

    let write_shared = Arc::clone(shared);
    let on_write: WriteCallback = Arc::new(move |handle: NodeContext, incoming: &DataValue| -> StatusCode {
        let Some(binding) = write_shared.binding(handle) else {
            warn!("write callback for unknown node context {}", handle);
            return StatusCode::BadInternalError;
        };
        let Some(value) = incoming.value else {
            return StatusCode::BadInternalError;
        };
        if value.scalar_type() != binding.scalar_type {
            write_shared.logger.warn(&format!(
                "write to {} rejected: expected {}, got {}",
                binding.node_id,
                binding.scalar_type,
                value.scalar_type()
            ));
            return StatusCode::BadTypeMismatch;
        }

        // Image and shadow move together under one scan-lock hold so a
        // concurrent publish cannot observe a half-applied write
        let mut image = write_shared.image.lock().unwrap();
        match image.write(binding.slot, value) {
            Ok(()) => {
                binding.store_shadow(value);
                StatusCode::Good
            }
            Err(BridgeError::TypeMismatch { .. }) => StatusCode::BadTypeMismatch,
            Err(error) => {
                write_shared.logger.warn(&format!(
                    "write to {} failed: {}",
                    binding.node_id, error
                ));
                StatusCode::BadInternalError
            }
        }
    });

    ValueCallbacks { on_read, on_write }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ProcessImage;
    use crate::stack::InMemoryStack;

    fn idle_bridge() -> OpcUaBridge {
        let image = Arc::new(Mutex::new(ProcessImage::new()));
        let factory: StackFactory = Box::new(|| Box::new(InMemoryStack::new()));
        OpcUaBridge::with_logger(
            image,
            factory,
            BridgeConfig::default(),
            BridgeLogger::disabled(),
        )
    }

    #[test]
    fn test_initial_state_is_idle() {
        let bridge = idle_bridge();
        assert_eq!(bridge.state(), BridgeState::Idle);
        assert!(!bridge.is_running());
        assert_eq!(bridge.stats().bindings, 0);
    }

    #[test]
    fn test_publish_is_a_noop_when_idle() {
        let bridge = idle_bridge();
        let publisher = bridge.publisher();
        publisher.publish();
        assert_eq!(bridge.stats().publish.cycles, 0);
    }

    #[tokio::test]
    async fn test_stop_from_idle_is_a_noop() {
        let mut bridge = idle_bridge();
        bridge.stop().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Idle);
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.namespace_uri, NAMESPACE_URI);
        assert_eq!(config.read_mode, ReadMode::Shadow);
        assert_eq!(config.iterate_interval, Duration::from_millis(50));
    }
}
