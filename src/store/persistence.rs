//! sled-backed Plan Store
//!
//! Trees:
//! - `plans`: plan id -> Plan (JSON, content is arbitrary JSON)
//! - `tasks`: task id -> Task (JSON)
//! - `plan_tasks`: `{plan_id}/{order:010}` -> task id, so a prefix scan yields tasks in order
//! - `user_plans`: `{user_id}\0{plan_id}` -> empty
//! - `user_xp`: user id -> UserXp (bincode)
//! - `leases`: lease key -> Lease (bincode)

use crate::error::StorageError;
use crate::store::{
    Lease, NewPlan, NewTask, Plan, PlanCompletion, PlanStore, PlanUpdate, Status, Task,
    TaskUpdate, UserXp,
};
use crate::types::{PlanId, TaskId, UserId};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::IVec;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// sled implementation of [`PlanStore`]
pub struct SledPlanStore {
    db: sled::Db,
    plans: sled::Tree,
    tasks: sled::Tree,
    plan_tasks: sled::Tree,
    user_plans: sled::Tree,
    user_xp: sled::Tree,
    leases: sled::Tree,
}

impl SledPlanStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Build on an already opened database (shared with the job queue)
    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            plans: db.open_tree("plans")?,
            tasks: db.open_tree("tasks")?,
            plan_tasks: db.open_tree("plan_tasks")?,
            user_plans: db.open_tree("user_plans")?,
            user_xp: db.open_tree("user_xp")?,
            leases: db.open_tree("leases")?,
            db,
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Index entries (index key, task id) for a plan, in order
    fn task_index_entries(&self, plan_id: &PlanId) -> Result<Vec<(IVec, IVec)>, StorageError> {
        let mut entries = Vec::new();
        for item in self.plan_tasks.scan_prefix(task_index_prefix(plan_id).as_bytes()) {
            entries.push(item?);
        }
        Ok(entries)
    }

    fn highest_order(&self, plan_id: &PlanId) -> Result<u32, StorageError> {
        let last = self
            .plan_tasks
            .scan_prefix(task_index_prefix(plan_id).as_bytes())
            .next_back()
            .transpose()?;
        match last {
            Some((key, _)) => parse_order(&key),
            None => Ok(0),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn task_index_prefix(plan_id: &PlanId) -> String {
    format!("{}/", plan_id)
}

fn task_index_key(plan_id: &PlanId, order: u32) -> String {
    format!("{}/{:010}", plan_id, order)
}

fn parse_order(index_key: &[u8]) -> Result<u32, StorageError> {
    let key = std::str::from_utf8(index_key)
        .map_err(|e| StorageError::Serialization(format!("Invalid task index key: {}", e)))?;
    key.rsplit('/')
        .next()
        .and_then(|order| order.parse().ok())
        .ok_or_else(|| StorageError::Serialization(format!("Invalid task index key: {}", key)))
}

fn user_index_prefix(user_id: &UserId) -> Vec<u8> {
    let mut key = user_id.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

fn user_index_key(user_id: &UserId, plan_id: &PlanId) -> Vec<u8> {
    let mut key = user_index_prefix(user_id);
    key.extend_from_slice(plan_id.as_str().as_bytes());
    key
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

type TxResult<T> = Result<T, ConflictableTransactionError<StorageError>>;

fn from_tx(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Database(e),
    }
}

fn abort<E: Into<StorageError>>(err: E) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(err.into())
}

fn version_conflict(entity: String, expected: u64, actual: u64) -> StorageError {
    StorageError::VersionConflict {
        entity,
        expected,
        actual,
    }
}

fn apply_plan_update(mut plan: Plan, update: PlanUpdate) -> Result<Plan, StorageError> {
    let now = Utc::now();
    if let Some(status) = update.status {
        if !plan.status.plan_transition_allowed(status) {
            return Err(StorageError::InvalidTransition {
                entity: format!("plan:{}", plan.id),
                from: plan.status.to_string(),
                to: status.to_string(),
            });
        }
        if status == Status::Completed && plan.status != Status::Completed {
            plan.completed_at = Some(now);
        }
        plan.status = status;
    }
    if let Some(title) = update.title {
        plan.title = title;
    }
    if let Some(description) = update.description {
        plan.description = description;
    }
    if let Some(content) = update.content {
        plan.content = Some(content);
    }
    if let Some(xp_earned) = update.xp_earned {
        plan.xp_earned = xp_earned;
    }
    plan.version += 1;
    plan.updated_at = now;
    Ok(plan)
}

fn apply_task_update(mut task: Task, update: TaskUpdate) -> Task {
    let now = Utc::now();
    if let Some(status) = update.status {
        task.completed_at = match status {
            Status::Completed if task.status == Status::Completed => task.completed_at,
            Status::Completed => Some(now),
            _ => None,
        };
        task.status = status;
    }
    if let Some(title) = update.title {
        task.title = title;
    }
    if let Some(description) = update.description {
        task.description = description;
    }
    if let Some(content) = update.content {
        task.content = Some(content);
    }
    task.version += 1;
    task.updated_at = now;
    task
}

fn build_tasks(plan_id: &PlanId, first_order: u32, tasks: Vec<NewTask>) -> Vec<Task> {
    let now = Utc::now();
    tasks
        .into_iter()
        .zip(first_order..)
        .map(|(task, order)| Task {
            id: TaskId::derive(plan_id, order),
            plan_id: plan_id.clone(),
            title: task.title,
            description: task.description,
            content: None,
            status: Status::Pending,
            order,
            xp_value: task.xp_value,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
        .collect()
}

impl PlanStore for SledPlanStore {
    fn create_plan(&self, new_plan: NewPlan) -> Result<Plan, StorageError> {
        let now = Utc::now();
        let plan = Plan {
            id: PlanId::generate(),
            user_id: new_plan.user_id,
            title: new_plan.title,
            description: new_plan.description,
            content: None,
            status: Status::Pending,
            xp_earned: 0,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let bytes = encode(&plan)?;
        let index_key = user_index_key(&plan.user_id, &plan.id);

        (&self.plans, &self.user_plans)
            .transaction(|(plans, user_plans)| -> TxResult<()> {
                plans.insert(plan.id.as_str().as_bytes(), bytes.clone())?;
                user_plans.insert(index_key.as_slice(), Vec::<u8>::new())?;
                Ok(())
            })
            .map_err(from_tx)?;

        debug!(plan_id = %plan.id, user_id = %plan.user_id, "Plan created");
        Ok(plan)
    }

    fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>, StorageError> {
        self.plans
            .get(id.as_str().as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn update_plan(
        &self,
        id: &PlanId,
        expected_version: u64,
        update: PlanUpdate,
    ) -> Result<Plan, StorageError> {
        let key = id.as_str().as_bytes();
        let current_bytes = self
            .plans
            .get(key)?
            .ok_or_else(|| StorageError::PlanNotFound(id.clone()))?;
        let current: Plan = decode(&current_bytes)?;
        if current.version != expected_version {
            return Err(version_conflict(
                format!("plan:{}", id),
                expected_version,
                current.version,
            ));
        }

        let next = apply_plan_update(current, update)?;
        let next_bytes = encode(&next)?;
        match self
            .plans
            .compare_and_swap(key, Some(current_bytes), Some(next_bytes))?
        {
            Ok(()) => Ok(next),
            Err(cas) => {
                let actual = match cas.current {
                    Some(bytes) => decode::<Plan>(&bytes)?.version,
                    None => return Err(StorageError::PlanNotFound(id.clone())),
                };
                Err(version_conflict(
                    format!("plan:{}", id),
                    expected_version,
                    actual,
                ))
            }
        }
    }

    fn list_plans_for_user(&self, user_id: &UserId) -> Result<Vec<Plan>, StorageError> {
        let prefix = user_index_prefix(user_id);
        let mut plans = Vec::new();
        for item in self.user_plans.scan_prefix(&prefix) {
            let (key, _) = item?;
            let plan_id = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|e| StorageError::Serialization(format!("Invalid user index key: {}", e)))?;
            if let Some(plan) = self.get_plan(&PlanId::from(plan_id))? {
                plans.push(plan);
            }
        }
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    fn create_tasks(
        &self,
        plan_id: &PlanId,
        tasks: Vec<NewTask>,
    ) -> Result<Vec<Task>, StorageError> {
        let plan_key = plan_id.as_str().as_bytes();
        let plan_bytes = self
            .plans
            .get(plan_key)?
            .ok_or_else(|| StorageError::PlanNotFound(plan_id.clone()))?;
        let plan: Plan = decode(&plan_bytes)?;
        let expected_version = plan.version;

        let created = build_tasks(plan_id, self.highest_order(plan_id)? + 1, tasks);
        let mut encoded = Vec::with_capacity(created.len());
        for task in &created {
            encoded.push((
                task.id.clone(),
                task_index_key(plan_id, task.order),
                encode(task)?,
            ));
        }

        // Task set changes bump the plan version so a concurrent
        // complete_plan_generation sees a conflict.
        let mut touched = plan;
        touched.version += 1;
        touched.updated_at = Utc::now();
        let touched_bytes = encode(&touched)?;

        (&self.plans, &self.tasks, &self.plan_tasks)
            .transaction(|(plans, tasks_tree, index)| -> TxResult<()> {
                let stored = plans.get(plan_key)?;
                if stored.as_deref() != Some(&*plan_bytes) {
                    let actual = match stored {
                        Some(bytes) => decode::<Plan>(&bytes).map_err(abort)?.version,
                        None => return Err(abort(StorageError::PlanNotFound(plan_id.clone()))),
                    };
                    return Err(abort(version_conflict(
                        format!("plan:{}", plan_id),
                        expected_version,
                        actual,
                    )));
                }
                for (task_id, index_key, bytes) in &encoded {
                    tasks_tree.insert(task_id.as_str().as_bytes(), bytes.clone())?;
                    index.insert(index_key.as_bytes(), task_id.as_str().as_bytes())?;
                }
                plans.insert(plan_key, touched_bytes.clone())?;
                Ok(())
            })
            .map_err(from_tx)?;

        Ok(created)
    }

    fn complete_plan_generation(
        &self,
        id: &PlanId,
        expected_version: u64,
        completion: PlanCompletion,
    ) -> Result<(Plan, Vec<Task>), StorageError> {
        let plan_key = id.as_str().as_bytes();
        let plan_bytes = self
            .plans
            .get(plan_key)?
            .ok_or_else(|| StorageError::PlanNotFound(id.clone()))?;
        let current: Plan = decode(&plan_bytes)?;
        if current.version != expected_version {
            return Err(version_conflict(
                format!("plan:{}", id),
                expected_version,
                current.version,
            ));
        }

        let next = apply_plan_update(
            current,
            PlanUpdate {
                title: Some(completion.title),
                description: Some(completion.description),
                content: Some(completion.content),
                status: Some(Status::Completed),
                xp_earned: None,
            },
        )?;
        let next_bytes = encode(&next)?;

        let stale = self.task_index_entries(id)?;
        let created = build_tasks(id, 1, completion.tasks);
        let mut encoded = Vec::with_capacity(created.len());
        for task in &created {
            encoded.push((
                task.id.clone(),
                task_index_key(id, task.order),
                encode(task)?,
            ));
        }

        (&self.plans, &self.tasks, &self.plan_tasks)
            .transaction(|(plans, tasks_tree, index)| -> TxResult<()> {
                let stored = plans.get(plan_key)?;
                if stored.as_deref() != Some(&*plan_bytes) {
                    let actual = match stored {
                        Some(bytes) => decode::<Plan>(&bytes).map_err(abort)?.version,
                        None => return Err(abort(StorageError::PlanNotFound(id.clone()))),
                    };
                    return Err(abort(version_conflict(
                        format!("plan:{}", id),
                        expected_version,
                        actual,
                    )));
                }
                for (index_key, task_id) in &stale {
                    index.remove(index_key.clone())?;
                    tasks_tree.remove(task_id.clone())?;
                }
                for (task_id, index_key, bytes) in &encoded {
                    tasks_tree.insert(task_id.as_str().as_bytes(), bytes.clone())?;
                    index.insert(index_key.as_bytes(), task_id.as_str().as_bytes())?;
                }
                plans.insert(plan_key, next_bytes.clone())?;
                Ok(())
            })
            .map_err(from_tx)?;

        debug!(
            plan_id = %id,
            replaced_tasks = stale.len(),
            task_count = created.len(),
            "Plan generation committed"
        );
        Ok((next, created))
    }

    fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StorageError> {
        self.tasks
            .get(id.as_str().as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn update_task(
        &self,
        id: &TaskId,
        expected_version: u64,
        update: TaskUpdate,
    ) -> Result<Task, StorageError> {
        let key = id.as_str().as_bytes();
        let current_bytes = self
            .tasks
            .get(key)?
            .ok_or_else(|| StorageError::TaskNotFound(id.clone()))?;
        let current: Task = decode(&current_bytes)?;
        if current.version != expected_version {
            return Err(version_conflict(
                format!("task:{}", id),
                expected_version,
                current.version,
            ));
        }

        let next = apply_task_update(current, update);
        let next_bytes = encode(&next)?;
        match self
            .tasks
            .compare_and_swap(key, Some(current_bytes), Some(next_bytes))?
        {
            Ok(()) => Ok(next),
            Err(cas) => {
                let actual = match cas.current {
                    Some(bytes) => decode::<Task>(&bytes)?.version,
                    None => return Err(StorageError::TaskNotFound(id.clone())),
                };
                Err(version_conflict(
                    format!("task:{}", id),
                    expected_version,
                    actual,
                ))
            }
        }
    }

    fn list_tasks(&self, plan_id: &PlanId) -> Result<Vec<Task>, StorageError> {
        let mut tasks = Vec::new();
        for (_, task_id) in self.task_index_entries(plan_id)? {
            if let Some(bytes) = self.tasks.get(&task_id)? {
                tasks.push(decode::<Task>(&bytes)?);
            }
        }
        Ok(tasks)
    }

    fn get_user_xp(&self, user_id: &UserId) -> Result<Option<UserXp>, StorageError> {
        match self.user_xp.get(user_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_user_xp(
        &self,
        user_id: &UserId,
        expected_version: u64,
        total_xp: u64,
    ) -> Result<UserXp, StorageError> {
        let key = user_id.as_str().as_bytes();
        let current = self.user_xp.get(key)?;
        let actual = match &current {
            Some(bytes) => bincode::deserialize::<UserXp>(bytes)?.version,
            None => 0,
        };
        let conflict = |actual| StorageError::VersionConflict {
            entity: format!("user_xp:{}", user_id),
            expected: expected_version,
            actual,
        };
        if actual != expected_version {
            return Err(conflict(actual));
        }

        let xp = UserXp {
            user_id: user_id.clone(),
            total_xp,
            recalculated_at: Utc::now(),
            version: expected_version + 1,
        };
        let bytes = bincode::serialize(&xp)?;
        if let Err(swap) = self.user_xp.compare_and_swap(key, current, Some(bytes))? {
            let actual = match swap.current {
                Some(bytes) => bincode::deserialize::<UserXp>(&bytes)?.version,
                None => 0,
            };
            return Err(conflict(actual));
        }
        Ok(xp)
    }

    fn acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Lease, StorageError> {
        loop {
            let now = now_ms();
            let current = self.leases.get(key.as_bytes())?;
            if let Some(bytes) = &current {
                let held: Lease = bincode::deserialize(bytes)?;
                if held.owner != owner && !held.is_expired_at(now) {
                    return Err(StorageError::LeaseHeld {
                        key: key.to_string(),
                        owner: held.owner,
                    });
                }
            }

            let lease = Lease {
                key: key.to_string(),
                owner: owner.to_string(),
                expires_at_ms: now + ttl.as_millis() as i64,
            };
            let bytes = bincode::serialize(&lease)?;
            // Lost a race with another acquirer; re-evaluate against the new holder
            if self
                .leases
                .compare_and_swap(key.as_bytes(), current, Some(bytes))?
                .is_ok()
            {
                return Ok(lease);
            }
        }
    }

    fn release_lease(&self, key: &str, owner: &str) -> Result<bool, StorageError> {
        loop {
            let current = match self.leases.get(key.as_bytes())? {
                Some(bytes) => bytes,
                None => return Ok(false),
            };
            let held: Lease = bincode::deserialize(&current)?;
            if held.owner != owner {
                return Ok(false);
            }
            if self
                .leases
                .compare_and_swap(key.as_bytes(), Some(current), None as Option<Vec<u8>>)?
                .is_ok()
            {
                return Ok(true);
            }
        }
    }
}
