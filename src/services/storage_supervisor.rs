use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::StoreSlot,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a session store installed in `slot`, dropping to degraded mode while it is unreachable.
///
/// Sessions keep running in memory while degraded; the persistence worker catches up once a
/// store is installed again.
pub async fn run<F, Fut>(slot: Arc<StoreSlot>, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                slot.install(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    if store.health_check().await.is_ok() {
                        if slot.is_degraded().await {
                            info!("storage healthy again; leaving degraded mode");
                            slot.install(store.clone()).await;
                        }
                        sleep(HEALTH_POLL_INTERVAL).await;
                        continue;
                    }

                    let mut reconnect_delay = INITIAL_DELAY;
                    let mut reconnected = false;
                    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
                        match store.try_reconnect().await {
                            Ok(()) => {
                                info!("storage reconnection succeeded after health check failure");
                                reconnected = true;
                                break;
                            }
                            Err(reconnect_err) => {
                                if attempt == 0 {
                                    warn!(
                                        attempt, error = %reconnect_err,
                                        "storage reconnect first attempt failed; entering degraded mode"
                                    );
                                    slot.clear().await;
                                } else {
                                    warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                                }
                                sleep(reconnect_delay).await;
                                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                            }
                        }
                    }

                    if reconnected {
                        slot.install(store.clone()).await;
                        sleep(HEALTH_POLL_INTERVAL).await;
                    } else {
                        warn!("exhausted storage reconnect attempts; staying in degraded mode");
                        break;
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}
