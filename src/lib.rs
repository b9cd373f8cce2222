//! # OpenPLC OPC UA Bridge
//!
//! An OPC UA binding layer that exposes a running PLC runtime's process
//! image (the live input, output and memory variables manipulated by an
//! IEC 61131-3 scan cycle) to external supervisory clients.
//!
//! ## Features
//!
//! - **🏭 Manifest discovery**: located variables are read from the
//!   compiler-emitted `LOCATED_VARIABLES.h` manifest
//! - **🔎 Address resolution**: textual IEC addresses (`%IX0.1`,
//!   `%QW10`, `%MD954`) resolve to typed slots in the live image
//! - **🌳 Typed address space**: an `OpenPLC` folder hierarchy with one
//!   read/write variable node per resolvable manifest record
//! - **🪞 Shadow cache**: every client read is served from a per-node
//!   shadow value, never from live PLC memory
//! - **🔄 Scan-tick publishing**: the scan engine pushes a consistent
//!   image snapshot into the address space once per cycle
//! - **🛡️ Strict typing**: client writes must match the declared node
//!   type exactly, no widening and no clamping
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use openplc_opcua::{
//!     BridgeConfig, BridgeServer, InMemoryStack, OpcUaBridge, ProcessImage, StackFactory,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // The scan engine owns the image and allocates cells at program load
//!     let image = Arc::new(Mutex::new(ProcessImage::new()));
//!     image.lock().unwrap().allocate_token("%QX0.1")?;
//!
//!     let factory: StackFactory = Box::new(|| Box::new(InMemoryStack::new()));
//!     let mut bridge = OpcUaBridge::new(image, factory, BridgeConfig::default());
//!     bridge.start().await?;
//!
//!     // Called by the scan loop once per cycle, after the program body
//!     let publisher = bridge.publisher();
//!     publisher.publish();
//!
//!     bridge.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────┐
//! │   Scan Engine    │        │  OPC UA Clients  │
//! └──────────────────┘        └──────────────────┘
//!          │ publish()                 │
//! ┌──────────────────┐        ┌──────────────────┐
//! │  Process Image   │───────▶│   Shadow Cache   │
//! │   (scan lock)    │◀───────│   (per binding)  │
//! └──────────────────┘ writes └──────────────────┘
//!          │                           │
//! ┌──────────────────┐        ┌──────────────────┐
//! │    Manifest      │───────▶│  Address Space   │
//! │   + Resolver     │  build │  (UaStack API)   │
//! └──────────────────┘        └──────────────────┘
//! ```
//!
//! The scan engine, the structured-text compiler and the wire-level OPC
//! UA stack stay outside this crate; the stack is consumed through the
//! minimal [`UaStack`] trait and the scan engine interacts through the
//! shared [`ProcessImage`] and a [`ScanPublisher`] handle.

/// Core error types and result handling
pub mod error;

/// Scalar type and value model
pub mod scalar;

/// IEC location tokens and the compiler manifest
pub mod location;

/// Process-image registry and type resolver
pub mod image;

/// Consumed OPC UA stack interface and the in-memory loopback stack
pub mod stack;

/// Node bindings, shadow cells and address-space construction
pub mod address_space;

/// Bridge server lifecycle, callbacks and scan-tick publisher
pub mod server;

/// Injected per-event log sink
pub mod logging;

/// Publish-cycle metrics and timing helpers
pub mod utils;

// Re-export main types for convenience
pub use address_space::{
    BindingTable, NodeBinding, OPENPLC_FOLDER_ID, PROGRAM_VARIABLES_ID, TYPE_FOLDERS,
    VARIABLE_ID_BASE,
};
pub use error::{BridgeError, BridgeResult};
pub use image::{ProcessImage, ResolvedSlot, SlotId, BUFFER_SIZE};
pub use location::{
    locate_manifest, parse_manifest_file, parse_manifest_line, parse_manifest_text, Area,
    LocatedVariable, Location, ManifestScan, Width, MANIFEST_FILE_NAME, MANIFEST_MARKER,
    MANIFEST_SEARCH_PATHS,
};
pub use logging::{BridgeLogger, LogLevel, LogSink};
pub use scalar::{ScalarType, ScalarValue};
pub use server::{
    BridgeConfig, BridgeServer, BridgeState, BridgeStats, OpcUaBridge, ReadMode, ScanPublisher,
    StackFactory, DEFAULT_PORT, NAMESPACE_URI,
};
pub use stack::{
    DataValue, InMemoryStack, NodeContext, NodeId, ReadCallback, StatusCode, UaStack,
    ValueCallbacks, VariableSpec, WriteCallback,
};
pub use utils::{OperationTimer, PublishMetrics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "OpenPLC OPC UA Bridge v{} - process-image binding layer for IEC 61131-3 runtimes",
        VERSION
    )
}
