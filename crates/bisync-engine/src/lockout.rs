//! Poisoned-history tracking
//!
//! A lockout is recorded two ways: each side's history file is renamed to
//! its `.lst-err` form, and a `lockout.json` record stores the reason. Either
//! one on its own is enough for [`LockoutManager::check`] to report
//! [`HistoryTrust::Poisoned`]. Only a successful resync removes them.

use tracing::{error, info, warn};

use bisync_core::domain::{HistoryTrust, LockoutRecord, PathListing, RunId, Side};

use crate::history::{ListingKind, ListingStore};
use crate::BisyncError;

/// Reads, sets and clears the lockout state of one path pair
#[derive(Debug, Clone)]
pub struct LockoutManager {
    store: ListingStore,
}

impl LockoutManager {
    pub fn new(store: ListingStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    async fn read_record(&self) -> Result<Option<LockoutRecord>, BisyncError> {
        let path = self.store.lockout_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BisyncError::io(path, e)),
        };
        match serde_json::from_str(&text) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // The marker still counts even if its record is unreadable
                warn!(path = %path.display(), error = %e, "Unreadable lockout record");
                Ok(None)
            }
        }
    }

    async fn marker_present(&self) -> Result<bool, BisyncError> {
        let path = self.store.lockout_path();
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BisyncError::io(path, e))
    }

    /// Determines whether persisted history may be used
    pub async fn check(&self) -> Result<HistoryTrust, BisyncError> {
        let mut poisoned = self.marker_present().await?;
        for side in Side::BOTH {
            poisoned |= self.store.exists(side, ListingKind::Poisoned).await?;
        }
        if poisoned {
            return Ok(HistoryTrust::Poisoned {
                record: self.read_record().await?,
            });
        }

        let mut present = true;
        for side in Side::BOTH {
            present &= self.store.exists(side, ListingKind::History).await?;
        }
        Ok(if present {
            HistoryTrust::Trusted
        } else {
            HistoryTrust::Missing
        })
    }

    /// Marks history untrustworthy
    pub async fn poison(
        &self,
        reason: impl Into<String>,
        run_id: RunId,
    ) -> Result<LockoutRecord, BisyncError> {
        let record = LockoutRecord::new(reason, run_id);
        self.store.ensure_workdir().await?;

        for side in Side::BOTH {
            self.store
                .relabel(side, ListingKind::History, ListingKind::Poisoned)
                .await?;
        }

        let path = self.store.lockout_path();
        let json = serde_json::to_string_pretty(&record).map_err(|e| {
            BisyncError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| BisyncError::io(&path, e))?;

        error!(
            run_id = %run_id,
            reason = %record.reason,
            "History poisoned; a resync is required before the next run"
        );
        Ok(record)
    }

    /// Removes every lockout trace; returns whether there was one
    pub async fn clear(&self) -> Result<bool, BisyncError> {
        let was_poisoned = self.check().await?.is_poisoned();
        for side in Side::BOTH {
            self.store.remove(side, ListingKind::Poisoned).await?;
        }
        let path = self.store.lockout_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BisyncError::io(path, e)),
        }
        if was_poisoned {
            info!(base = %self.store.base(), "Lockout cleared");
        }
        Ok(was_poisoned)
    }

    /// Persists both listings as the next run's baseline and clears any lockout
    pub async fn commit(
        &self,
        path1: &PathListing,
        path2: &PathListing,
    ) -> Result<(), BisyncError> {
        self.store.ensure_workdir().await?;
        self.store.save(path1, ListingKind::History).await?;
        self.store.save(path2, ListingKind::History).await?;
        self.clear().await?;
        info!(
            path1 = path1.len(),
            path2 = path2.len(),
            "Listings committed"
        );
        Ok(())
    }
}
