/// Consumed OPC UA server-stack interface
///
/// The bridge drives the underlying protocol stack through a deliberately
/// small server-side API: namespace registration, folder and variable
/// node creation with a value-callback pair and a numeric node context,
/// server-side value writes, and the startup/iterate/shutdown entry
/// points. Session handling, encoding, transport and security all stay
/// behind this trait.
///
/// `InMemoryStack` implements the trait over a plain ordered address
/// space and adds client-side simulation entry points, so integration
/// tests and demos can exercise the full read/write path without a
/// network endpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::scalar::{ScalarType, ScalarValue};

/// Numeric node identifier: namespace index plus numeric id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub ns: u16,
    pub id: u32,
}

impl NodeId {
    pub const fn new(ns: u16, id: u32) -> Self {
        Self { ns, id }
    }

    /// The standard Objects folder in namespace 0
    pub const OBJECTS_FOLDER: NodeId = NodeId::new(0, 85);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.ns, self.id)
    }
}

/// Status codes surfaced by the consumed stack API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Good,
    BadNodeIdExists,
    BadNodeIdUnknown,
    BadParentNodeIdInvalid,
    BadTypeMismatch,
    BadInternalError,
    BadOutOfRange,
    BadServerHalted,
    BadCommunicationError,
}

impl StatusCode {
    pub fn is_good(self) -> bool {
        self == StatusCode::Good
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Good => "Good",
            StatusCode::BadNodeIdExists => "BadNodeIdExists",
            StatusCode::BadNodeIdUnknown => "BadNodeIdUnknown",
            StatusCode::BadParentNodeIdInvalid => "BadParentNodeIdInvalid",
            StatusCode::BadTypeMismatch => "BadTypeMismatch",
            StatusCode::BadInternalError => "BadInternalError",
            StatusCode::BadOutOfRange => "BadOutOfRange",
            StatusCode::BadServerHalted => "BadServerHalted",
            StatusCode::BadCommunicationError => "BadCommunicationError",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value container exchanged through read and write callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataValue {
    pub value: Option<ScalarValue>,
    pub status: StatusCode,
}

impl DataValue {
    /// A value with `Good` status
    pub fn good(value: ScalarValue) -> Self {
        Self {
            value: Some(value),
            status: StatusCode::Good,
        }
    }

    /// `Good` status with no value
    pub fn empty_good() -> Self {
        Self {
            value: None,
            status: StatusCode::Good,
        }
    }

    /// No value, carrying a failure status
    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: None,
            status,
        }
    }
}

/// Attributes for a variable node: read+write access, scalar value rank
#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub node_id: NodeId,
    pub parent: NodeId,
    pub browse_name: String,
    pub display_name: String,
    pub data_type: ScalarType,
    pub initial: ScalarValue,
}

/// Numeric context attached to a node and handed back to its callbacks
pub type NodeContext = u32;

/// Read callback: node context in, data value out
pub type ReadCallback = Arc<dyn Fn(NodeContext) -> DataValue + Send + Sync>;

/// Write callback: node context and incoming value in, status out
pub type WriteCallback = Arc<dyn Fn(NodeContext, &DataValue) -> StatusCode + Send + Sync>;

/// Callback pair installed on a variable node
#[derive(Clone)]
pub struct ValueCallbacks {
    pub on_read: ReadCallback,
    pub on_write: WriteCallback,
}

/// Minimal server-side stack API consumed by the bridge
pub trait UaStack: Send {
    /// Configure a plain TCP endpoint on the given port, security policy None
    fn configure_endpoint(&mut self, port: u16) -> StatusCode;

    /// Register a namespace by URI and return its index; 0 signals failure
    fn add_namespace(&mut self, uri: &str) -> u16;

    /// Add a folder-typed object node
    fn add_folder(
        &mut self,
        node_id: NodeId,
        parent: NodeId,
        browse_name: &str,
        display_name: &str,
    ) -> StatusCode;

    /// Add a variable node with context and value callbacks attached
    fn add_variable(
        &mut self,
        spec: VariableSpec,
        context: NodeContext,
        callbacks: ValueCallbacks,
    ) -> StatusCode;

    /// Server-side write of a node value, used by the publisher
    fn write_value(&mut self, node_id: NodeId, value: ScalarValue) -> StatusCode;

    /// Non-blocking startup entry point
    fn run_startup(&mut self) -> StatusCode;

    /// Run one iteration of the server loop
    fn iterate(&mut self, blocking: bool);

    /// Shutdown entry point
    fn run_shutdown(&mut self) -> StatusCode;

    /// Runtime version string, logged at bridge start
    fn software_version(&self) -> String {
        "unknown".to_string()
    }
}

/// Shared-handle delegation so a caller can keep a handle to the stack it
/// hands to the bridge (tests and demos simulate clients through it)
impl<S: UaStack> UaStack for Arc<Mutex<S>> {
    fn configure_endpoint(&mut self, port: u16) -> StatusCode {
        self.lock().unwrap().configure_endpoint(port)
    }

    fn add_namespace(&mut self, uri: &str) -> u16 {
        self.lock().unwrap().add_namespace(uri)
    }

    fn add_folder(
        &mut self,
        node_id: NodeId,
        parent: NodeId,
        browse_name: &str,
        display_name: &str,
    ) -> StatusCode {
        self.lock()
            .unwrap()
            .add_folder(node_id, parent, browse_name, display_name)
    }

    fn add_variable(
        &mut self,
        spec: VariableSpec,
        context: NodeContext,
        callbacks: ValueCallbacks,
    ) -> StatusCode {
        self.lock().unwrap().add_variable(spec, context, callbacks)
    }

    fn write_value(&mut self, node_id: NodeId, value: ScalarValue) -> StatusCode {
        self.lock().unwrap().write_value(node_id, value)
    }

    fn run_startup(&mut self) -> StatusCode {
        self.lock().unwrap().run_startup()
    }

    fn iterate(&mut self, blocking: bool) {
        self.lock().unwrap().iterate(blocking)
    }

    fn run_shutdown(&mut self) -> StatusCode {
        self.lock().unwrap().run_shutdown()
    }

    fn software_version(&self) -> String {
        self.lock().unwrap().software_version()
    }
}

/// One node of the in-memory address space
#[derive(Clone)]
struct StackNode {
    browse_name: String,
    #[allow(dead_code)]
    display_name: String,
    is_folder: bool,
    parent: Option<NodeId>,
    data_type: Option<ScalarType>,
    value: Option<ScalarValue>,
    context: NodeContext,
    callbacks: Option<ValueCallbacks>,
}

/// Loopback stack implementation backed by an ordered node map
///
/// Serves no network clients; instead `client_read` and `client_write`
/// drive the installed callbacks exactly like a session thread would.
pub struct InMemoryStack {
    namespaces: Vec<String>,
    nodes: BTreeMap<NodeId, StackNode>,
    endpoint_port: Option<u16>,
    started: bool,
    iterations: u64,
    refuse_namespaces: bool,
}

impl InMemoryStack {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::OBJECTS_FOLDER,
            StackNode {
                browse_name: "Objects".to_string(),
                display_name: "Objects".to_string(),
                is_folder: true,
                parent: None,
                data_type: None,
                value: None,
                context: 0,
                callbacks: None,
            },
        );
        Self {
            namespaces: vec!["http://opcfoundation.org/UA/".to_string()],
            nodes,
            endpoint_port: None,
            started: false,
            iterations: 0,
            refuse_namespaces: false,
        }
    }

    /// A stack that rejects every namespace registration, for failure-path tests
    pub fn refusing_namespaces() -> Self {
        Self {
            refuse_namespaces: true,
            ..Self::new()
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn endpoint_port(&self) -> Option<u16> {
        self.endpoint_port
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// The value last stored into a variable node, by initial value,
    /// server-side write or accepted client write
    pub fn stored_value(&self, node_id: NodeId) -> Option<ScalarValue> {
        self.nodes.get(&node_id).and_then(|n| n.value)
    }

    /// Child nodes of a parent, in node-id order
    pub fn browse_children(&self, parent: NodeId) -> Vec<(NodeId, String)> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent == Some(parent))
            .map(|(id, node)| (*id, node.browse_name.clone()))
            .collect()
    }

    /// First node whose browse name matches, in node-id order
    pub fn find_by_browse_name(&self, browse_name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.browse_name == browse_name)
            .map(|(id, _)| *id)
    }

    /// Simulate a client read: drives the read callback when installed,
    /// otherwise serves the stored node value
    pub fn client_read(&self, node_id: NodeId) -> DataValue {
        if !self.started {
            return DataValue::bad(StatusCode::BadServerHalted);
        }
        let Some(node) = self.nodes.get(&node_id) else {
            return DataValue::bad(StatusCode::BadNodeIdUnknown);
        };
        match &node.callbacks {
            Some(callbacks) => (callbacks.on_read)(node.context),
            None => match node.value {
                Some(value) => DataValue::good(value),
                None => DataValue::empty_good(),
            },
        }
    }

    /// Simulate a client write: drives the write callback when installed,
    /// then mirrors accepted values into the stored node value
    pub fn client_write(&mut self, node_id: NodeId, incoming: DataValue) -> StatusCode {
        if !self.started {
            return StatusCode::BadServerHalted;
        }
        let Some(node) = self.nodes.get(&node_id) else {
            return StatusCode::BadNodeIdUnknown;
        };
        let status = match &node.callbacks {
            Some(callbacks) => (callbacks.on_write)(node.context, &incoming),
            None => StatusCode::Good,
        };
        if status.is_good() {
            if let Some(value) = incoming.value {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.value = Some(value);
                }
            }
        }
        status
    }
}

impl Default for InMemoryStack {
    fn default() -> Self {
        Self::new()
    }
}

impl UaStack for InMemoryStack {
    fn configure_endpoint(&mut self, port: u16) -> StatusCode {
        self.endpoint_port = Some(port);
        StatusCode::Good
    }

    fn add_namespace(&mut self, uri: &str) -> u16 {
        if self.refuse_namespaces {
            return 0;
        }
        if let Some(index) = self.namespaces.iter().position(|n| n == uri) {
            return index as u16;
        }
        self.namespaces.push(uri.to_string());
        (self.namespaces.len() - 1) as u16
    }

    fn add_folder(
        &mut self,
        node_id: NodeId,
        parent: NodeId,
        browse_name: &str,
        display_name: &str,
    ) -> StatusCode {
        if self.nodes.contains_key(&node_id) {
            return StatusCode::BadNodeIdExists;
        }
        if !self.nodes.contains_key(&parent) {
            return StatusCode::BadParentNodeIdInvalid;
        }
        self.nodes.insert(
            node_id,
            StackNode {
                browse_name: browse_name.to_string(),
                display_name: display_name.to_string(),
                is_folder: true,
                parent: Some(parent),
                data_type: None,
                value: None,
                context: 0,
                callbacks: None,
            },
        );
        debug!("folder {} added under {}", node_id, parent);
        StatusCode::Good
    }

    fn add_variable(
        &mut self,
        spec: VariableSpec,
        context: NodeContext,
        callbacks: ValueCallbacks,
    ) -> StatusCode {
        if self.nodes.contains_key(&spec.node_id) {
            return StatusCode::BadNodeIdExists;
        }
        if !self.nodes.contains_key(&spec.parent) {
            return StatusCode::BadParentNodeIdInvalid;
        }
        // Initial value is type-checked against the declared data type
        if spec.initial.scalar_type() != spec.data_type {
            return StatusCode::BadTypeMismatch;
        }
        debug!(
            "variable {} ({}, {}) added under {}",
            spec.node_id, spec.browse_name, spec.data_type, spec.parent
        );
        self.nodes.insert(
            spec.node_id,
            StackNode {
                browse_name: spec.browse_name,
                display_name: spec.display_name,
                is_folder: false,
                parent: Some(spec.parent),
                data_type: Some(spec.data_type),
                value: Some(spec.initial),
                context,
                callbacks: Some(callbacks),
            },
        );
        StatusCode::Good
    }

    fn write_value(&mut self, node_id: NodeId, value: ScalarValue) -> StatusCode {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return StatusCode::BadNodeIdUnknown;
        };
        if node.is_folder {
            return StatusCode::BadNodeIdUnknown;
        }
        if node.data_type != Some(value.scalar_type()) {
            return StatusCode::BadTypeMismatch;
        }
        node.value = Some(value);
        StatusCode::Good
    }

    fn run_startup(&mut self) -> StatusCode {
        self.started = true;
        StatusCode::Good
    }

    fn iterate(&mut self, _blocking: bool) {
        self.iterations += 1;
    }

    fn run_shutdown(&mut self) -> StatusCode {
        self.started = false;
        StatusCode::Good
    }

    fn software_version(&self) -> String {
        format!("in-memory stack {}", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_only_callbacks(value: ScalarValue) -> ValueCallbacks {
        ValueCallbacks {
            on_read: Arc::new(move |_| DataValue::good(value)),
            on_write: Arc::new(|_, _| StatusCode::Good),
        }
    }

    #[test]
    fn test_namespace_registration() {
        let mut stack = InMemoryStack::new();
        let ns = stack.add_namespace("http://openplc.org/");
        assert_eq!(ns, 1);
        // Re-registering the same URI yields the same index
        assert_eq!(stack.add_namespace("http://openplc.org/"), 1);

        let mut refusing = InMemoryStack::refusing_namespaces();
        assert_eq!(refusing.add_namespace("http://openplc.org/"), 0);
    }

    #[test]
    fn test_folder_creation_is_flagged_on_duplicate() {
        let mut stack = InMemoryStack::new();
        let folder = NodeId::new(1, 1000);
        assert_eq!(
            stack.add_folder(folder, NodeId::OBJECTS_FOLDER, "OpenPLC", "OpenPLC"),
            StatusCode::Good
        );
        assert_eq!(
            stack.add_folder(folder, NodeId::OBJECTS_FOLDER, "OpenPLC", "OpenPLC"),
            StatusCode::BadNodeIdExists
        );
    }

    #[test]
    fn test_variable_initial_value_type_checked() {
        let mut stack = InMemoryStack::new();
        let spec = VariableSpec {
            node_id: NodeId::new(1, 4_000_000),
            parent: NodeId::OBJECTS_FOLDER,
            browse_name: "V".to_string(),
            display_name: "V".to_string(),
            data_type: ScalarType::UInt16,
            initial: ScalarValue::Boolean(false),
        };
        let status = stack.add_variable(spec, 0, read_only_callbacks(ScalarValue::UInt16(0)));
        assert_eq!(status, StatusCode::BadTypeMismatch);
    }

    #[test]
    fn test_client_read_drives_callback() {
        let mut stack = InMemoryStack::new();
        let node = NodeId::new(1, 4_000_000);
        let spec = VariableSpec {
            node_id: node,
            parent: NodeId::OBJECTS_FOLDER,
            browse_name: "V".to_string(),
            display_name: "V".to_string(),
            data_type: ScalarType::UInt16,
            initial: ScalarValue::UInt16(0),
        };
        stack.add_variable(spec, 7, read_only_callbacks(ScalarValue::UInt16(42)));

        // Reads are refused until startup
        assert_eq!(stack.client_read(node).status, StatusCode::BadServerHalted);

        stack.run_startup();
        assert_eq!(stack.client_read(node).value, Some(ScalarValue::UInt16(42)));
    }

    #[test]
    fn test_server_side_write_type_checked() {
        let mut stack = InMemoryStack::new();
        let node = NodeId::new(1, 4_000_000);
        let spec = VariableSpec {
            node_id: node,
            parent: NodeId::OBJECTS_FOLDER,
            browse_name: "V".to_string(),
            display_name: "V".to_string(),
            data_type: ScalarType::Float,
            initial: ScalarValue::Float(0.0),
        };
        stack.add_variable(spec, 0, read_only_callbacks(ScalarValue::Float(0.0)));

        assert_eq!(
            stack.write_value(node, ScalarValue::Float(1.5)),
            StatusCode::Good
        );
        assert_eq!(stack.stored_value(node), Some(ScalarValue::Float(1.5)));
        assert_eq!(
            stack.write_value(node, ScalarValue::Double(1.5)),
            StatusCode::BadTypeMismatch
        );
    }
}
