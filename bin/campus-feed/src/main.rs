//! # Campus Feed Binary
//!
//! Assembles the feed client from the backends selected at compile time and
//! follows the merged feed until interrupted.

use std::sync::Arc;

use anyhow::Context;
use cf_config::{LogFormat, Settings};
use cf_feed::posts::permalink;
use cf_feed::{
    wait_for_verification, FeedAggregator, FeedUpdate, PollPolicy, PostComposer, SessionManager,
    StoreHandle,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "auth-memory")]
use cf_auth_memory::MemorySessionProvider;
#[cfg(feature = "store-memory")]
use cf_store_memory::MemoryStore;

#[cfg(not(all(feature = "store-memory", feature = "auth-memory")))]
compile_error!("campus-feed needs a store backend and an auth backend feature");

mod seed;

fn init_tracing(settings: &Settings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level));
    let registry = tracing_subscriber::registry().with(filter);
    match settings.log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings);
    let spaces = settings.spaces()?;
    tracing::info!(
        project = %settings.backend.project_id,
        auth_domain = %settings.backend.auth_domain,
        spaces = spaces.len(),
        "campus-feed starting"
    );

    // 1. Document store
    let store = MemoryStore::new();
    let handle: StoreHandle = Arc::new(store.clone());

    // 2. Auth provider
    let auth = MemorySessionProvider::new();
    seed::demo_account(&store, &auth).await?;

    // 3. Session state, written only by the manager
    let mut sessions = SessionManager::start(handle.clone(), &auth);
    let ctx = sessions.context();
    let policy = PollPolicy {
        interval: settings.verification_interval(),
        max_attempts: settings.verification.max_attempts,
    };
    let verified = wait_for_verification(&auth, policy)
        .await
        .with_context(|| format!("waiting for {} to verify", seed::DEMO_EMAIL))?;
    sessions.sync().await;
    tracing::info!(uid = %verified.uid, signed_in = ctx.is_signed_in(), "session ready");
    tokio::spawn(sessions.run());

    // 4. Live feed
    let mut feed = FeedAggregator::open(handle.as_ref(), &spaces).await;

    if let Some(space) = spaces.first() {
        let mut composer = PostComposer::new(handle.clone());
        composer.select_space(space.as_str());
        composer.set_title("Welcome to the campus feed");
        composer.set_content("Say hi, ask around, vote on what matters.");
        let id = composer.submit(&ctx).await?;
        tracing::info!(%space, %id, "welcome post submitted");
    }

    loop {
        tokio::select! {
            update = feed.next_update() => match update {
                Some(FeedUpdate::Merged { space, stats }) => {
                    let visible = feed.sorted_posts();
                    tracing::info!(
                        %space,
                        added = stats.added,
                        updated = stats.updated,
                        removed = stats.removed,
                        visible = visible.len(),
                        "feed updated"
                    );
                    if let Some(top) = visible.first() {
                        tracing::info!(
                            link = %permalink(&settings.links.base_url, top),
                            title = %top.title,
                            pending = top.timestamp.is_none(),
                            "latest post"
                        );
                    }
                }
                Some(FeedUpdate::Degraded { space, reason }) => {
                    tracing::warn!(%space, %reason, "space unavailable");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
        }
    }

    feed.close();
    tracing::info!("campus-feed stopped");
    Ok(())
}
