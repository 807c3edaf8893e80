//! Concurrent tile fetching.
//!
//! Every tile is fetched by its own task, with a semaphore bounding how many of them talk to the
//! service at once. Finished tiles travel back over a bounded channel to the single coordinating
//! task, which is the only one handing them to the caller. Tiles that still fail after all retries
//! are reported as missing instead of failing the download.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinSet;

use crate::error::StreetViewError;
use crate::retry::RetryPolicy;
use crate::service::TileService;
use crate::session::SessionStore;
use crate::tile_grid::{QualityTier, TileCoordinate, TileGrid};

/// Hard upper bound of parallel tile requests.
pub const MAX_CONCURRENCY: usize = 32;

/// Default number of parallel tile requests for a quality tier on a machine with `cores` cores.
///
/// Higher tiers have many more tiles and get more workers, each tier has its own ceiling so that
/// the remote service is not flooded.
pub fn auto_concurrency(quality: QualityTier, cores: usize) -> usize {
    let workers = match quality {
        QualityTier::High => (cores * 2).min(16),
        QualityTier::Medium => cores.min(12),
        QualityTier::Low => (cores / 2).min(8),
    };
    workers.clamp(1, MAX_CONCURRENCY)
}

/// Resolves a configured concurrency, where 0 selects [`auto_concurrency`] for this machine.
pub fn resolve_concurrency(configured: usize, quality: QualityTier) -> usize {
    if configured == 0 {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        auto_concurrency(quality, cores)
    } else {
        configured.clamp(1, MAX_CONCURRENCY)
    }
}

/// Cooperative cancellation signal shared between a download and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. No new tile requests are issued after this call.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of fetching a whole grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Number of tiles fetched and decoded.
    pub fetched: usize,
    /// Tiles that could not be fetched, sorted by row and column.
    pub missing: Vec<TileCoordinate>,
}

struct TileOutcome {
    coord: TileCoordinate,
    result: Result<RgbImage, StreetViewError>,
}

/// Fetches all tiles of a grid with bounded parallelism.
#[derive(Clone)]
pub struct TileFetcher {
    service: Arc<dyn TileService>,
    session: Arc<SessionStore>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl TileFetcher {
    /// Creates a fetcher running at most `concurrency` requests at a time.
    pub fn new(
        service: Arc<dyn TileService>,
        session: Arc<SessionStore>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            service,
            session,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Maximum number of requests in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetches every tile of `grid` and passes each decoded tile to `place`.
    ///
    /// `place` is only ever called from the coordinating task, one tile at a time, in completion
    /// order. Returns [`StreetViewError::Cancelled`] if `cancel` fires before all tiles are in, and
    /// [`StreetViewError::SessionUnavailable`] if a session could not be (re)created. Any other
    /// tile failure only marks that tile missing.
    pub async fn fetch_all<F>(
        &self,
        pano_id: &str,
        grid: &TileGrid,
        cancel: &CancelToken,
        mut place: F,
    ) -> Result<FetchSummary, StreetViewError>
    where
        F: FnMut(TileCoordinate, RgbImage),
    {
        let total = grid.tile_count();
        log::info!(
            "Fetching {total} tiles ({}x{}) at zoom {} with {} workers",
            grid.tiles_across,
            grid.tiles_down,
            grid.zoom,
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (sender, mut receiver) = mpsc::channel::<TileOutcome>(self.concurrency);
        let pano_id: Arc<str> = Arc::from(pano_id);
        let mut tasks = JoinSet::new();

        for coord in grid.coordinates() {
            let fetcher = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let sender = sender.clone();
            let cancel = cancel.clone();
            let pano_id = Arc::clone(&pano_id);
            let zoom = grid.zoom;

            tasks.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let result = fetcher.fetch_tile(&pano_id, zoom, coord).await;
                drop(permit);

                let _ = sender.send(TileOutcome { coord, result }).await;
            });
        }
        drop(sender);

        let mut summary = FetchSummary::default();
        let mut received = 0;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    log::warn!("Download cancelled after {received} of {total} tiles");
                    return Err(StreetViewError::Cancelled);
                }
                outcome = receiver.recv() => outcome,
            };
            let Some(TileOutcome { coord, result }) = outcome else {
                break;
            };
            received += 1;

            match result {
                Ok(tile) => {
                    place(coord, tile);
                    summary.fetched += 1;
                    log::trace!("Placed tile {coord} ({received}/{total})");
                }
                Err(err @ StreetViewError::SessionUnavailable(_)) => {
                    tasks.abort_all();
                    log::error!("Aborting download at tile {coord}: {err}");
                    return Err(err);
                }
                Err(err) => {
                    log::warn!("Tile {coord} is missing: {err}");
                    summary.missing.push(coord);
                }
            }
        }

        while tasks.join_next().await.is_some() {}

        if cancel.is_cancelled() {
            return Err(StreetViewError::Cancelled);
        }

        summary
            .missing
            .sort_by_key(|coord| (coord.row, coord.column));
        log::info!(
            "Fetched {} of {total} tiles, {} missing",
            summary.fetched,
            summary.missing.len()
        );
        Ok(summary)
    }

    /// Fetches and decodes a single tile, refreshing the session and retrying as configured.
    pub async fn fetch_tile(
        &self,
        pano_id: &str,
        zoom: u8,
        coord: TileCoordinate,
    ) -> Result<RgbImage, StreetViewError> {
        let service = self.service.as_ref();
        let bytes = self
            .session
            .call(service, &self.retry, |token| async move {
                service.fetch_tile(&token, pano_id, zoom, coord).await
            })
            .await?;

        let image = image::load_from_memory(&bytes)?;
        Ok(image.to_rgb8())
    }
}
