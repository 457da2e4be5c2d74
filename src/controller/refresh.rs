//! Metadata refresh and version checks

use super::auth::AuthGate;
use crate::mods::{changed_mods, AttributePatch, GameMods, ModRecord, ModTable};
use crate::nexus::{NexusError, NexusService, VersionCheckReport};
use crate::state::{Host, Intent, Notification};
use futures::stream::{self, StreamExt};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub const CHECK_DENIED_TITLE: &str = "An error occurred checking for mod updates";
pub const CHECK_PARTIAL_TITLE: &str = "Some mods could not be checked for updates";

/// Tuning for [`RefreshOrchestrator`]
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub max_concurrent: usize,
    pub requests_per_second: u32,
    /// Lower bound on how long a version check keeps its game marked updating
    pub version_check_floor: Duration,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            requests_per_second: 5,
            version_check_floor: Duration::from_millis(2000),
        }
    }
}

/// What one refresh cycle did
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub cycle: u64,
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, NexusError)>,
}

/// How a version check ended
#[derive(Debug)]
pub enum VersionCheckOutcome {
    /// No credential; nothing was sent
    Denied,
    /// The check ran; `errors` holds per-mod failures
    Checked { errors: Vec<String> },
    Failed(NexusError),
}

/// Snapshot the next diff compares against
struct Baseline {
    table: ModTable,
    game: Option<String>,
    cycle: u64,
}

pub struct RefreshOrchestrator {
    host: Arc<dyn Host>,
    service: Arc<dyn NexusService>,
    auth: AuthGate,
    limiter: Arc<Limiter>,
    options: RefreshOptions,
    baseline: Mutex<Baseline>,
    cycles: AtomicU64,
}

impl RefreshOrchestrator {
    /// The host's current mod table becomes the first baseline.
    pub fn new(host: Arc<dyn Host>, service: Arc<dyn NexusService>, options: RefreshOptions) -> Self {
        let per_second = NonZeroU32::new(options.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let baseline = Baseline {
            table: host.mod_table(),
            game: host.active_game_id(),
            cycle: 0,
        };

        Self {
            auth: AuthGate::new(Arc::clone(&host), Arc::clone(&service)),
            host,
            service,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            options,
            baseline: Mutex::new(baseline),
            cycles: AtomicU64::new(0),
        }
    }

    fn baseline(&self) -> MutexGuard<'_, Baseline> {
        self.baseline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh metadata for every mod of the active game whose Nexus identity
    /// changed since the baseline.
    ///
    /// Returns once every refresh of this cycle has settled. Failures are
    /// logged and reported per record. Each success moves that record into the
    /// baseline, unless a later cycle already replaced it.
    pub async fn on_mods_changed(&self, snapshot: ModTable) -> RefreshReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let game = self.host.active_game_id();
        let mut report = RefreshReport {
            cycle,
            ..RefreshReport::default()
        };

        let changed: Vec<ModRecord> = {
            let mut baseline = self.baseline();
            let records: Vec<ModRecord> = {
                let mods = game.as_deref().and_then(|g| snapshot.get(g));
                changed_mods(
                    &baseline.table,
                    baseline.game.as_deref(),
                    &snapshot,
                    game.as_deref(),
                )
                .filter_map(|id| mods.and_then(|m| m.get(id)).cloned())
                .collect()
            };

            if records.is_empty() {
                if cycle >= baseline.cycle {
                    *baseline = Baseline {
                        table: snapshot.clone(),
                        game: game.clone(),
                        cycle,
                    };
                }
                return report;
            }

            if cycle >= baseline.cycle {
                let seeded =
                    Self::seeded_baseline(&baseline, &snapshot, game.as_deref(), &records, cycle);
                *baseline = seeded;
            }
            records
        };

        let Some(game) = game else {
            return report;
        };

        tracing::info!(
            "Refreshing metadata for {} changed mod(s) of {}",
            changed.len(),
            game
        );

        let mut results = stream::iter(changed)
            .map(|record| {
                let service = Arc::clone(&self.service);
                let limiter = Arc::clone(&self.limiter);
                let domain = super::record_domain(self.host.as_ref(), &game, &record);

                async move {
                    limiter.until_ready().await;
                    let result = service.retrieve_mod_info(&domain, &record).await;
                    (record, result)
                }
            })
            .buffer_unordered(self.options.max_concurrent.max(1));

        while let Some((record, result)) = results.next().await {
            match result {
                Ok(info) => {
                    if let Some(patch) = info.map(|i| i.into_patch()).filter(|p| !p.is_empty()) {
                        self.host.dispatch(Intent::SetModAttributes {
                            game_id: game.clone(),
                            mod_id: record.id.clone(),
                            patch,
                        });
                    }
                    self.mark_refreshed(cycle, &game, &record);
                    report.refreshed.push(record.id);
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh mod {} of {}: {}", record.id, game, e);
                    report.failed.push((record.id, e));
                }
            }
        }

        report
    }

    /// The snapshot as the next baseline, except that records still being
    /// refreshed keep their previous value (or stay absent) until they succeed.
    fn seeded_baseline(
        previous: &Baseline,
        snapshot: &ModTable,
        game: Option<&str>,
        pending: &[ModRecord],
        cycle: u64,
    ) -> Baseline {
        let mut table = snapshot.clone();

        if let Some(game) = game {
            let before = previous
                .game
                .as_deref()
                .and_then(|g| previous.table.get(g));
            let mut mods = snapshot.get(game).map(|m| (**m).clone()).unwrap_or_default();
            for record in pending {
                match before.and_then(|b| b.get(&record.id)) {
                    Some(old) => mods.insert(record.id.clone(), old.clone()),
                    None => mods.remove(&record.id),
                };
            }
            table.insert(game.to_string(), Arc::new(mods));
        }

        Baseline {
            table,
            game: game.map(ToOwned::to_owned),
            cycle,
        }
    }

    fn mark_refreshed(&self, cycle: u64, game: &str, record: &ModRecord) {
        let mut baseline = self.baseline();
        if cycle < baseline.cycle {
            return;
        }

        if baseline.game.as_deref() != Some(game) {
            baseline.game = Some(game.to_string());
        }
        let mods = baseline
            .table
            .entry(game.to_string())
            .or_insert_with(|| Arc::new(GameMods::new()));
        Arc::make_mut(mods).insert(record.id.clone(), record.clone());
        baseline.cycle = cycle;
    }

    /// Check `mods` of `game_id` for newer versions.
    ///
    /// The game is marked updating for the whole check and for at least the
    /// configured floor, and the marker is cleared on every exit path.
    pub async fn check_mods_version(&self, game_id: &str, mods: &[ModRecord]) -> VersionCheckOutcome {
        if !self.auth.require_credential(CHECK_DENIED_TITLE) {
            return VersionCheckOutcome::Denied;
        }

        let _updating = UpdatingGuard::set(Arc::clone(&self.host), game_id);
        let start = Instant::now();

        tracing::info!("Checking {} mod(s) of {} for updates", mods.len(), game_id);

        let outcome = match self.check_by_domain(game_id, mods).await {
            Ok(report) => {
                for update in report.updates {
                    self.host.dispatch(Intent::SetModAttributes {
                        game_id: game_id.to_string(),
                        mod_id: update.mod_key,
                        patch: AttributePatch {
                            newest_version: Some(update.newest_version),
                            ..AttributePatch::default()
                        },
                    });
                }
                if !report.errors.is_empty() {
                    self.host.notify(Notification::error(
                        CHECK_PARTIAL_TITLE,
                        report.errors.join("\n\n"),
                        false,
                    ));
                }
                VersionCheckOutcome::Checked {
                    errors: report.errors,
                }
            }
            Err(e) => {
                tracing::error!("Version check for {} failed: {}", game_id, e);
                self.host.notify(Notification::error(
                    CHECK_DENIED_TITLE,
                    e.to_string(),
                    e.is_reportable(),
                ));
                VersionCheckOutcome::Failed(e)
            }
        };

        tokio::time::sleep_until(start + self.options.version_check_floor).await;
        tracing::info!("Version check for {} finished", game_id);

        outcome
    }

    /// One remote check per catalog domain, domains resolved like refreshes
    async fn check_by_domain(
        &self,
        game_id: &str,
        mods: &[ModRecord],
    ) -> Result<VersionCheckReport, NexusError> {
        let mut groups: BTreeMap<String, Vec<ModRecord>> = BTreeMap::new();
        for record in mods {
            let domain = super::record_domain(self.host.as_ref(), game_id, record);
            groups.entry(domain).or_default().push(record.clone());
        }

        let mut merged = VersionCheckReport::default();
        for (domain, records) in groups {
            let report = self.service.check_mod_versions(&domain, &records).await?;
            merged.updates.extend(report.updates);
            merged.errors.extend(report.errors);
        }
        Ok(merged)
    }
}

/// Marks a game updating while alive
struct UpdatingGuard {
    host: Arc<dyn Host>,
    game_id: String,
}

impl UpdatingGuard {
    fn set(host: Arc<dyn Host>, game_id: &str) -> Self {
        host.dispatch(Intent::SetUpdatingMods {
            game_id: game_id.to_string(),
            updating: true,
        });
        Self {
            host,
            game_id: game_id.to_string(),
        }
    }
}

impl Drop for UpdatingGuard {
    fn drop(&mut self) {
        self.host.dispatch(Intent::SetUpdatingMods {
            game_id: std::mem::take(&mut self.game_id),
            updating: false,
        });
    }
}
