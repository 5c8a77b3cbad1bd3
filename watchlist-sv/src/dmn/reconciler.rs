use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration as StdDuration, SystemTime};

use actix_web::rt::time::{interval_at, Instant};
use actix_web::web;
use actix_web::web::Data;
use chrono::Duration;
use log::{debug, error, info};

use crate::core::error::Error;
use crate::db::DbConnectionPool;
use crate::ingest::{lists, pipeline};

type Fingerprint = Vec<(String, Option<SystemTime>)>;

/// Keeps the tracked list columns in step with the list files: runs when
/// asked to and on every tick where the directory changed.
pub struct ReconcileDaemon {
    pending: bool,
    running: bool,
    last_seen: Option<Fingerprint>,
}

fn should_run(pending: bool, last_seen: Option<&Fingerprint>, current: &Fingerprint) -> bool {
    pending || last_seen != Some(current)
}

fn lock(me: &Mutex<ReconcileDaemon>) -> MutexGuard<'_, ReconcileDaemon> {
    me.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ReconcileDaemon {
    fn new() -> Self {
        ReconcileDaemon { pending: false, running: false, last_seen: None }
    }

    async fn reconcile(
        me: Data<Mutex<Self>>,
        pool: Data<DbConnectionPool>,
        lists_dir: PathBuf,
    ) -> Result<(), Error> {
        let (pending, last_seen) = {
            let mut state = lock(&me);
            if state.running {
                debug!("tracked list reconcile already running");
                return Ok(());
            }
            state.running = true;
            (std::mem::replace(&mut state.pending, false), state.last_seen.clone())
        };

        let outcome = web::block(move || -> Result<Option<(Fingerprint, usize)>, Error> {
            let current = lists::fingerprint(&lists_dir)?;
            if !should_run(pending, last_seen.as_ref(), &current) {
                return Ok(None);
            }
            let conn = pool.get()?;
            let reports = pipeline::reconcile_all(&conn, &lists_dir)?;
            Ok(Some((current, reports.len())))
        }).await;

        let mut state = lock(&me);
        state.running = false;
        match outcome.map_err(Error::from).and_then(|r| r) {
            Ok(Some((current, count))) => {
                info!("reconciled {} tracked lists", count);
                state.last_seen = Some(current);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                state.pending |= pending;
                Err(err)
            }
        }
    }

    fn spawn_reconcile(me: Data<Mutex<Self>>, pool: Data<DbConnectionPool>, lists_dir: PathBuf) {
        actix_web::rt::spawn(async move {
            Self::reconcile(me, pool, lists_dir)
                .await
                .map_err(|err| error!("error reconciling tracked lists, {}", err))
                .ok();
        });
    }

    fn spawn_reconciler(
        me: Data<Mutex<Self>>,
        pool: Data<DbConnectionPool>,
        lists_dir: PathBuf,
        every: Duration,
    ) {
        let period = every.to_std().unwrap_or_else(|_| StdDuration::from_secs(300));
        actix_web::rt::spawn(async move {
            let mut task = interval_at(Instant::now(), period);
            loop {
                task.tick().await;
                Self::reconcile(me.clone(), pool.clone(), lists_dir.clone())
                    .await
                    .map_err(|err| error!("error reconciling tracked lists, {}", err))
                    .ok(); // continue on after errors
            }
        });
    }

    /// Reconciles as soon as possible, regardless of whether the list files changed.
    pub fn request(me: Data<Mutex<Self>>, pool: Data<DbConnectionPool>, lists_dir: PathBuf) {
        lock(&me).pending = true;
        Self::spawn_reconcile(me, pool, lists_dir);
    }

    pub fn start(
        pool: Data<DbConnectionPool>,
        lists_dir: PathBuf,
        every: Duration,
    ) -> Data<Mutex<Self>> {
        let me = Data::new(Mutex::new(ReconcileDaemon::new()));
        Self::spawn_reconciler(me.clone(), pool, lists_dir, every);
        me
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(stamp: u64) -> Fingerprint {
        vec![("is_imdb_t250".to_string(), Some(SystemTime::UNIX_EPOCH + StdDuration::from_secs(stamp)))]
    }

    #[test]
    fn runs_first_time_and_on_change() {
        assert!(should_run(false, None, &fingerprint(1)));
        assert!(!should_run(false, Some(&fingerprint(1)), &fingerprint(1)));
        assert!(should_run(false, Some(&fingerprint(1)), &fingerprint(2)));
        assert!(should_run(false, Some(&fingerprint(1)), &Vec::new()));
    }

    #[test]
    fn requests_run_even_without_changes() {
        assert!(should_run(true, Some(&fingerprint(1)), &fingerprint(1)));
    }

    #[test]
    fn new_daemon_has_nothing_pending() {
        let daemon = ReconcileDaemon::new();
        assert!(!daemon.pending);
        assert!(!daemon.running);
        assert!(daemon.last_seen.is_none());
    }
}
