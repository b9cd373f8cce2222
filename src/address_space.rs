/// Address-space construction and node bindings
///
/// The bridge owns one binding per exposed variable: the node id, the
/// process-image slot handle, the immutable scalar type and the shadow
/// cell that serves every read. Bindings live in an arena keyed by a
/// numeric handle; the handle doubles as the node context installed on
/// the protocol node, so callbacks resolve context to binding through
/// the arena instead of trusting a raw pointer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::BridgeResult;
use crate::image::SlotId;
use crate::scalar::{ScalarType, ScalarValue};
use crate::stack::{NodeContext, NodeId, StatusCode, UaStack, ValueCallbacks, VariableSpec};

/// Numeric id of the root OpenPLC folder in the custom namespace
pub const OPENPLC_FOLDER_ID: u32 = 1000;

/// Per-type folders, created even when empty
pub const TYPE_FOLDERS: [(u32, &str, &str); 5] = [
    (2000, "BooleanInputs", "Boolean Inputs"),
    (2001, "BooleanOutputs", "Boolean Outputs"),
    (2002, "IntegerInputs", "Integer Inputs"),
    (2003, "IntegerOutputs", "Integer Outputs"),
    (2004, "MemoryVariables", "Memory Variables"),
];

/// Folder that receives every variable discovered from the manifest
pub const PROGRAM_VARIABLES_ID: u32 = 2100;

/// First node id handed out to variable nodes
pub const VARIABLE_ID_BASE: u32 = 4_000_000;

/// One exposed variable: node id, image slot, declared type, shadow cell
///
/// The shadow cell is the only source consulted by reads; the image slot
/// is the only sink consulted by writes. Both move together under the
/// scan lock.
#[derive(Debug)]
pub struct NodeBinding {
    pub node_id: NodeId,
    pub browse_name: String,
    pub slot: SlotId,
    pub scalar_type: ScalarType,
    shadow: Mutex<ScalarValue>,
}

impl NodeBinding {
    pub fn new(node_id: NodeId, browse_name: String, slot: SlotId, scalar_type: ScalarType) -> Self {
        Self {
            node_id,
            browse_name,
            slot,
            scalar_type,
            shadow: Mutex::new(scalar_type.zero()),
        }
    }

    /// Current shadow value
    pub fn shadow_value(&self) -> ScalarValue {
        *self.shadow.lock().unwrap()
    }

    /// Replace the shadow value
    pub fn store_shadow(&self, value: ScalarValue) {
        *self.shadow.lock().unwrap() = value;
    }
}

impl fmt::Display for NodeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, {})",
            self.browse_name,
            self.node_id,
            self.slot.location(),
            self.scalar_type
        )
    }
}

/// Arena of bindings keyed by node-context handle
///
/// Handles are allocated monotonically, so iteration order is stable for
/// the lifetime of one server instance.
#[derive(Debug, Default)]
pub struct BindingTable {
    entries: BTreeMap<NodeContext, Arc<NodeBinding>>,
    next_handle: NodeContext,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a binding and return its handle
    pub fn insert(&mut self, binding: NodeBinding) -> NodeContext {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.entries.insert(handle, Arc::new(binding));
        handle
    }

    pub fn get(&self, handle: NodeContext) -> Option<Arc<NodeBinding>> {
        self.entries.get(&handle).cloned()
    }

    pub fn remove(&mut self, handle: NodeContext) -> Option<Arc<NodeBinding>> {
        self.entries.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all bindings in handle order
    pub fn bindings(&self) -> Vec<Arc<NodeBinding>> {
        self.entries.values().cloned().collect()
    }

    /// Remove and return every binding
    pub fn drain(&mut self) -> Vec<Arc<NodeBinding>> {
        let drained = self.entries.values().cloned().collect();
        self.entries.clear();
        drained
    }
}

/// Builds the bridge's half of the address space on a fresh stack
/// instance: the folder hierarchy and the per-variable nodes
pub struct AddressSpaceBuilder<'a> {
    stack: &'a mut dyn UaStack,
    ns: u16,
    next_node_id: u32,
}

impl<'a> AddressSpaceBuilder<'a> {
    pub fn new(stack: &'a mut dyn UaStack, ns: u16) -> Self {
        Self {
            stack,
            ns,
            next_node_id: VARIABLE_ID_BASE,
        }
    }

    /// Create the OpenPLC folder hierarchy, tolerating nodes that already
    /// exist. Returns the ProgramVariables folder id.
    pub fn ensure_folders(&mut self) -> BridgeResult<NodeId> {
        let openplc = NodeId::new(self.ns, OPENPLC_FOLDER_ID);
        self.add_folder_tolerant(openplc, NodeId::OBJECTS_FOLDER, "OpenPLC", "OpenPLC");

        for (id, browse_name, display_name) in TYPE_FOLDERS {
            self.add_folder_tolerant(
                NodeId::new(self.ns, id),
                openplc,
                browse_name,
                display_name,
            );
        }

        let program = NodeId::new(self.ns, PROGRAM_VARIABLES_ID);
        self.add_folder_tolerant(program, openplc, "ProgramVariables", "Program Variables");
        Ok(program)
    }

    fn add_folder_tolerant(
        &mut self,
        node_id: NodeId,
        parent: NodeId,
        browse_name: &str,
        display_name: &str,
    ) {
        let status = self
            .stack
            .add_folder(node_id, parent, browse_name, display_name);
        match status {
            StatusCode::Good => debug!("folder {} created as {}", node_id, browse_name),
            StatusCode::BadNodeIdExists => {
                debug!("folder {} already exists, keeping it", node_id)
            }
            other => warn!("failed to create folder {}: {}", browse_name, other),
        }
    }

    /// Allocate the next variable node id
    pub fn allocate_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        NodeId::new(self.ns, id)
    }

    /// Add one variable node: read+write access, scalar rank, zero
    /// initial value, callbacks bound to the given context handle
    pub fn add_variable(
        &mut self,
        parent: NodeId,
        node_id: NodeId,
        name: &str,
        scalar_type: ScalarType,
        context: NodeContext,
        callbacks: ValueCallbacks,
    ) -> StatusCode {
        let spec = VariableSpec {
            node_id,
            parent,
            browse_name: name.to_string(),
            display_name: name.to_string(),
            data_type: scalar_type,
            initial: scalar_type.zero(),
        };
        let status = self.stack.add_variable(spec, context, callbacks);
        match status {
            StatusCode::Good => {
                debug!("node {} added for {} ({})", node_id, name, scalar_type)
            }
            StatusCode::BadNodeIdExists => {
                warn!("node {} already exists, skipping {}", node_id, name)
            }
            other => warn!("failed to add node {}: {}", name, other),
        }
        status
    }
}
