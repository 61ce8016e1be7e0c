use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, Instrument};

use receta_live::config::LiveConfig;
use receta_live::session::Session;
use receta_live::store::memory::InMemoryStore;
use receta_live::store::{BackendTimestamp, CollectionPath, RawDocument};
use receta_live::subscription::SubscriptionSystem;
use receta_live::telemetry::setup_tracing;

fn order(id: &str, estado: &str, created_secs: i64) -> RawDocument {
    RawDocument::new(
        id,
        json!({
            "userId": "user_1",
            "recetaId": "receta_1",
            "cotizacionId": "cot_1",
            "farmaciaId": "farm_1",
            "precio": 18500,
            "estado": estado,
            "fechaCreacion": BackendTimestamp::new(created_secs, 0).to_value(),
            "nombreComercial": "Farmacia Central",
        }),
    )
}

fn quote(id: &str, estado: &str, precio: u32) -> RawDocument {
    RawDocument::new(
        id,
        json!({
            "farmaciaId": format!("farm_{}", id),
            "precio": precio,
            "estado": estado,
            "fechaCreacion": BackendTimestamp::new(1_700_000_000, 0).to_value(),
        }),
    )
}

#[tokio::main]
async fn main() -> Result<(), String> {
    // Optional YAML path as the only argument
    let config = match std::env::args().nth(1) {
        Some(path) => LiveConfig::load(path),
        None => LiveConfig::from_env(),
    }
    .map_err(|e| e.to_string())?;

    setup_tracing(&config.log_level);
    info!(
        blocking_statuses = config.blocking_statuses.len(),
        channel_buffer = config.channel_buffer,
        "Starting realtime demo"
    );

    let (store, store_handle) = InMemoryStore::start(config.channel_buffer);
    let session = Session::new();
    let mut system = SubscriptionSystem::new(Arc::new(store.clone()), session.clone(), config);

    // Nobody signed in yet: stays idle, no query issued
    let orders = system.watch_orders();
    info!(phase = ?orders.current().phase, "Orders before sign-in");

    let span = tracing::info_span!("seeding");
    async {
        info!("Seeding backend documents");
        store.upsert(CollectionPath::orders(), order("ped_1", "entregado", 1_700_000_000)).await?;
        store.upsert(CollectionPath::quotes("receta_1"), quote("cot_1", "aceptada", 18500)).await?;
        store.upsert(CollectionPath::quotes("receta_1"), quote("cot_2", "cotizada", 17900)).await
    }
    .instrument(span)
    .await
    .map_err(|e| e.to_string())?;

    session.sign_in("user_1");

    let active = system.watch_active_order(Some("receta_1".to_string()));
    let quotes = system.watch_quotes(Some("receta_1".to_string()));

    let state = orders.wait_for(|s| s.is_live()).await.map_err(|e| e.to_string())?;
    info!(orders = state.value.len(), "Orders after sign-in");

    let state = quotes.wait_for(|s| s.is_live()).await.map_err(|e| e.to_string())?;
    for q in &state.value {
        info!(quote_id = %q.id, status = %q.status, price = q.price, "Quote");
    }

    let state = active.wait_for(|s| s.is_live()).await.map_err(|e| e.to_string())?;
    info!(blocked = state.blocks_new_quotes(), "Prescription before new order");

    // A fresh order in a blocking status locks the prescription
    let span = tracing::info_span!("order_processing");
    let result = async {
        info!("Backend creates an order awaiting payment");
        store.upsert(CollectionPath::orders(), order("ped_2", "pendiente", 1_700_000_500)).await
    }
    .instrument(span)
    .await;

    match result {
        Ok(()) => {
            let state = active
                .wait_for(|s| s.value.is_some())
                .await
                .map_err(|e| e.to_string())?;
            if let Some(order) = &state.value {
                info!(
                    order_id = %order.id,
                    status = %order.status,
                    pharmacy = %order.pharmacy_name,
                    "Prescription blocked"
                );
            }
        }
        Err(e) => error!(error = %e, "Order write failed"),
    }

    session.sign_out();
    let state = orders
        .wait_for(|s| s.value.is_empty() && !s.loading)
        .await
        .map_err(|e| e.to_string())?;
    info!(phase = ?state.phase, "Orders after sign-out");

    // Shutdown system gracefully
    system.shutdown().await.map_err(|e| e.to_string())?;
    drop(store);
    store_handle.await.map_err(|e| e.to_string())?;

    info!("Demo completed successfully");
    Ok(())
}
