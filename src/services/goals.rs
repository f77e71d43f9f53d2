//! Goal store - daily production targets keyed by business date

use crate::domain::error::{DispatchError, Result};
use crate::domain::types::{DailyGoal, GoalTarget};
use chrono::{NaiveDate, NaiveTime};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct GoalStore {
    goals: RwLock<BTreeMap<NaiveDate, DailyGoal>>,
    path: Option<PathBuf>,
}

impl GoalStore {
    pub fn in_memory() -> Self {
        Self { goals: RwLock::new(BTreeMap::new()), path: None }
    }

    /// Store persisted as a JSON array at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let goals = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<DailyGoal>>(&content) {
                Ok(list) => list.into_iter().map(|goal| (goal.date, goal)).collect(),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "goals_file_unreadable");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        info!(file = %path.display(), goals = %goals.len(), "goals_loaded");
        Ok(Self { goals: RwLock::new(goals), path: Some(path) })
    }

    pub fn get(&self, date: NaiveDate) -> Option<DailyGoal> {
        self.goals.read().get(&date).cloned()
    }

    /// Create or replace the goal for its date
    pub fn set(&self, goal: DailyGoal) -> Result<DailyGoal> {
        validate(&goal)?;

        let mut goals = self.goals.write();
        let previous = goals.insert(goal.date, goal.clone());
        if let Err(e) = self.persist(&goals) {
            // Keep memory consistent with disk
            match previous {
                Some(previous) => goals.insert(goal.date, previous),
                None => goals.remove(&goal.date),
            };
            return Err(e.into());
        }

        info!(date = %goal.date, "goal_saved");
        Ok(goal)
    }

    fn persist(&self, goals: &BTreeMap<NaiveDate, DailyGoal>) -> std::io::Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let list: Vec<&DailyGoal> = goals.values().collect();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&list)?)?;
        fs::rename(&tmp, path)
    }
}

/// Positive targets, non-empty per-seller map, `HH:MM` collection times
pub fn validate(goal: &DailyGoal) -> Result<()> {
    match &goal.target {
        GoalTarget::Aggregate { total } => {
            if *total == 0 {
                return Err(DispatchError::InvalidGoal("aggregate total must be positive".into()));
            }
        }
        GoalTarget::PerSeller { targets } => {
            if targets.is_empty() {
                return Err(DispatchError::InvalidGoal("per-seller goal needs at least one seller".into()));
            }
            if let Some((seller, _)) = targets.iter().find(|(_, &target)| target == 0) {
                return Err(DispatchError::InvalidGoal(format!("target for {seller} must be positive")));
            }
        }
    }

    for (seller, time) in &goal.collection_times {
        if NaiveTime::parse_from_str(time, "%H:%M").is_err() {
            return Err(DispatchError::InvalidGoal(format!(
                "collection time '{time}' for {seller} is not HH:MM"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SellerType;
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn aggregate(total: u64) -> DailyGoal {
        DailyGoal { date: date(), target: GoalTarget::Aggregate { total }, collection_times: BTreeMap::new() }
    }

    #[test]
    fn test_set_and_get() {
        let store = GoalStore::in_memory();
        assert!(store.get(date()).is_none());
        store.set(aggregate(300)).unwrap();
        assert_eq!(store.get(date()).unwrap().target, GoalTarget::Aggregate { total: 300 });

        // Replaces
        store.set(aggregate(350)).unwrap();
        assert_eq!(store.get(date()).unwrap().target, GoalTarget::Aggregate { total: 350 });
    }

    #[test]
    fn test_validation() {
        let store = GoalStore::in_memory();
        assert_eq!(store.set(aggregate(0)).unwrap_err().code(), "invalidGoal");

        let empty = DailyGoal {
            date: date(),
            target: GoalTarget::PerSeller { targets: BTreeMap::new() },
            collection_times: BTreeMap::new(),
        };
        assert!(store.set(empty).is_err());

        let mut bad_time = aggregate(10);
        bad_time.collection_times.insert(SellerType::Shopee, "25:99".into());
        assert!(store.set(bad_time).is_err());

        let mut ok_time = aggregate(10);
        ok_time.collection_times.insert(SellerType::Shopee, "15:30".into());
        assert!(store.set(ok_time).is_ok());
    }

    #[test]
    fn test_persisted_goals_survive_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("goals.json");

        {
            let store = GoalStore::open(&path).unwrap();
            let goal = DailyGoal {
                date: date(),
                target: GoalTarget::PerSeller { targets: [(SellerType::Amazon, 40)].into() },
                collection_times: [(SellerType::Amazon, "16:00".to_string())].into(),
            };
            store.set(goal).unwrap();
        }

        let store = GoalStore::open(&path).unwrap();
        let goal = store.get(date()).unwrap();
        assert_eq!(goal.collection_times[&SellerType::Amazon], "16:00");
    }
}
