/// OPC UA Bridge Demo
///
/// Wires a simulated scan cycle to the bridge over the in-memory loopback
/// stack: located variables come from a generated manifest, the scan
/// thread mutates inputs and publishes once per cycle, and a simulated
/// client reads and writes node values.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info};
use tokio::signal;
use tokio::time::interval;

use openplc_opcua::{
    BridgeConfig, BridgeServer, DataValue, InMemoryStack, OpcUaBridge, ProcessImage, ScalarValue,
    StackFactory,
};

const DEMO_MANIFEST: &str = "\
__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1)
__LOCATED_VAR(UINT,__IW5,I,W,5)
__LOCATED_VAR(REAL,__MR2,M,R,2)
__LOCATED_VAR(LREAL,__MF3,M,F,3)
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🚀 OpenPLC OPC UA Bridge Demo");
    println!("=============================");
    println!("{}", openplc_opcua::info());
    println!();

    // The scan engine owns the image and allocates located variables at
    // program load
    let image = Arc::new(Mutex::new(ProcessImage::new()));
    let (coil, input_word) = {
        let mut image = image.lock().unwrap();
        let coil = image.allocate_token("%QX0.1")?;
        let input_word = image.allocate_token("%IW5")?;
        image.allocate_token("%MR2")?;
        image.allocate_token("%MF3")?;
        (coil, input_word)
    };

    // Compiler-emitted manifest
    let manifest_path = std::env::temp_dir().join(format!(
        "LOCATED_VARIABLES.{}.h",
        std::process::id()
    ));
    fs::write(&manifest_path, DEMO_MANIFEST)?;

    // Keep a handle to the loopback stack so we can act as a client
    let stack = Arc::new(Mutex::new(InMemoryStack::new()));
    let client = stack.clone();
    let factory: StackFactory = Box::new(move || Box::new(stack.clone()));

    let config = BridgeConfig {
        manifest_path: Some(manifest_path.clone()),
        ..Default::default()
    };

    let mut bridge = OpcUaBridge::new(image.clone(), factory, config);
    bridge.start().await?;

    info!("✅ Bridge started");
    info!("📋 Exposed variables:");
    for binding in bridge.bindings() {
        info!("   - {}", binding);
    }

    // Simulated scan cycle: refresh inputs, run nothing, publish
    let publisher = bridge.publisher();
    let scan_image = image.clone();
    let scan_running = Arc::new(AtomicBool::new(true));
    let scan_flag = scan_running.clone();
    let scan = std::thread::spawn(move || {
        let mut counter = 0u16;
        while scan_flag.load(Ordering::Relaxed) {
            {
                let mut image = scan_image.lock().unwrap();
                let _ = image.write(input_word, ScalarValue::UInt16(counter));
            }
            publisher.publish();
            counter = counter.wrapping_add(1);
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    // Simulated supervisory client
    let client_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(2));
        let mut on = false;
        loop {
            ticker.tick().await;
            let (coil_node, word_node) = {
                let stack = client.lock().unwrap();
                (
                    stack.find_by_browse_name("QX0_1"),
                    stack.find_by_browse_name("IW5"),
                )
            };
            let (Some(coil_node), Some(word_node)) = (coil_node, word_node) else {
                continue;
            };

            on = !on;
            let mut stack = client.lock().unwrap();
            let status = stack.client_write(coil_node, DataValue::good(ScalarValue::Boolean(on)));
            let word = stack.client_read(word_node);
            info!(
                "🔄 client wrote QX0_1={} ({}), read IW5={:?}",
                on, status, word.value
            );
        }
    });

    println!();
    println!("📋 Demo running...");
    println!("💡 The scan thread increments %IW5 every 100 ms and publishes");
    println!("💡 A simulated client toggles QX0_1 every 2 s");
    println!("💡 Press Ctrl+C to stop");
    println!();

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received interrupt signal, stopping bridge..."),
        Err(err) => error!("❌ Failed to listen for interrupt signal: {}", err),
    }
    client_task.abort();

    // Scan observes the last client write through the image
    let coil_value = image.lock().unwrap().read(coil)?;
    info!("scan-side value of %QX0.1: {}", coil_value);

    bridge.stop().await?;
    scan_running.store(false, Ordering::Relaxed);
    scan.join().ok();

    let stats = bridge.stats();
    info!("📊 Final bridge statistics:");
    info!("{}", serde_json::to_string_pretty(&stats)?);

    fs::remove_file(&manifest_path).ok();
    println!();
    println!("✅ Bridge stopped safely");
    Ok(())
}
