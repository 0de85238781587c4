//! Walk-through of the entity store.
//!
//! Connects using `ENTITYSTORE_*` environment variables (or a YAML file
//! passed as the first argument), then inserts a person, updates it, prints
//! its history, enumerates every stored person, and deletes the stream.
//!
//! ```bash
//! ENTITYSTORE_BACKEND=memory cargo run -p entitystore-demo
//! ```

use std::path::Path;

use entitystore_core::{EntityStore, StoreConfig, entity_shape};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// The demo's stored shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: Option<u32>,
}

entity_shape!(Person as "Person" {
    name => "Name",
    age => "Age",
});

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connecting, or any store operation
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("entitystore-demo starting");

    let config = match std::env::args().nth(1) {
        Some(path) => StoreConfig::from_file(Path::new(&path))?,
        None => StoreConfig::from_env()?,
    };
    info!(
        backend = %config.backend,
        host = config.host.as_str(),
        page_size = config.page_size,
        "configuration loaded"
    );

    let store = EntityStore::connect(&config).await?;

    let alice = Person {
        name: "Alice".to_owned(),
        age: Some(30),
    };
    let stream = store.insert(&alice).await?;
    info!(stream = stream.as_str(), "inserted");

    let older = Person {
        age: Some(31),
        ..alice
    };
    let changes = store.update(&older, &stream).await?;
    info!(
        stream = stream.as_str(),
        changes = serde_json::to_string(&changes)?,
        "updated"
    );

    if let Some(state) = store.get_with_history::<Person>(&stream).await? {
        info!(
            entity = ?state.entity,
            history = serde_json::to_string(&state.history)?,
            "reconstructed"
        );
    }

    let everyone = store.entities::<Person>().await?;
    for (name, person) in &everyone {
        info!(stream = name.as_str(), person = ?person, "enumerated");
    }

    store.delete(&stream).await?;
    let after = store.get::<Person>(&stream).await?;
    info!(stream = stream.as_str(), present = after.is_some(), "deleted");

    Ok(())
}
