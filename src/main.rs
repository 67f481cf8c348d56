use anyhow::Context;
use housing_monitor::models::PreferenceRecord;
use housing_monitor::monitoring::{ChangeDetector, Monitor, MonitorOptions};
use housing_monitor::scrapers::types::{FetchOptions, SessionOptions};
use housing_monitor::scrapers::{Fetcher, ListingParser, SessionManager};
use housing_monitor::storage::{ListingStore, RestStore};
use housing_monitor::{ListingRecord, Settings};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("🏠 Housing Monitor");
    info!("==========================================");
    info!(
        "Endpoints: {}, proxies: {}, poll interval: {}s",
        settings.endpoints.len(),
        settings.proxy_list.len(),
        settings.poll_interval.as_secs_f64()
    );

    let session = Arc::new(SessionManager::new(SessionOptions::from(&settings))?);
    let store: Arc<dyn ListingStore> = Arc::new(
        RestStore::new(
            &settings.supabase_url,
            &settings.supabase_service_key,
            settings.seen_page_size,
            settings.request_timeout,
        )
        .context("Failed to create persistence client")?,
    );
    let detector = Arc::new(ChangeDetector::new(store.clone(), settings.preload_seen));
    let fetcher = Fetcher::new(session, FetchOptions::from(&settings));
    let parser = ListingParser::new(&settings.listing_base_url)?;
    let monitor = Monitor::new(
        fetcher,
        parser,
        detector,
        store.clone(),
        MonitorOptions::from(&settings),
    );

    let preferences = match store.fetch_active_preferences().await {
        Ok(preferences) => {
            info!("Loaded {} active search preferences", preferences.len());
            preferences
        }
        Err(e) => {
            warn!("Could not load search preferences: {}", e);
            Vec::new()
        }
    };

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);
    let monitor_task = tokio::spawn(monitor.run(tx, cancel.clone()));

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        }
    });

    let mut reported = 0;
    while let Some(listing) = rx.recv().await {
        reported += 1;
        report(reported, &listing, &preferences);

        if settings.upsert_listings {
            if let Err(e) = store.upsert_listing(&listing).await {
                warn!("Failed to store listing {}: {}", listing.external_id, e);
            }
        }
    }

    monitor_task.await.context("Monitor task failed")?;
    info!("✅ Reported {} new listings", reported);

    Ok(())
}

fn report(index: usize, listing: &ListingRecord, preferences: &[PreferenceRecord]) {
    println!("{}. {} ({} €)", index, listing.title, listing.price_eur);
    match (listing.rooms, listing.size_sqm) {
        (Some(rooms), Some(size)) => println!("   {} Zimmer, {} m²", rooms, size),
        (Some(rooms), None) => println!("   {} Zimmer", rooms),
        (None, Some(size)) => println!("   {} m²", size),
        (None, None) => {}
    }
    if let Some(district) = &listing.district {
        println!("   District: {}", district);
    }
    println!("   ID: {}", listing.external_id);
    println!("   URL: {}", listing.detail_url);

    let matching = preferences.iter().filter(|p| p.matches(listing)).count();
    if matching > 0 {
        info!("Listing {} matches {} search preferences", listing.external_id, matching);
    }
}
