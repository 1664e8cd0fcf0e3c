//! The orchestrator.

use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};
use crate::schema::{DatabaseSchema, TableSchema};
use crate::table::Table;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tablekit_cache::CacheStore;
use tablekit_client::{Backend, BackendError};
use tablekit_realtime::{RealtimeBus, RealtimeError, RealtimeTransport};
use tablekit_schema::{
    diff_attributes, MigrationExecutor, MigrationPlan, MigrationReport, PermissionReconciler,
    PermissionReport, SchemaError,
};
use tablekit_types::{AttributeStatus, TableId};
use tracing::{error, info, warn};

/// Outcome of reconciling one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: TableId,
    /// The table did not exist and was created.
    pub created: bool,
    pub migration: MigrationReport,
    pub permissions: PermissionReport,
}

impl TableReport {
    /// Nothing had to change.
    pub fn is_noop(&self) -> bool {
        !self.created && self.migration.is_noop() && self.permissions.is_noop()
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub reconciled: Vec<TableReport>,
    /// Tables that could not be reconciled. They stay unusable until a
    /// later [`Orm::reconcile_table`] succeeds.
    pub failed: Vec<(TableId, OrmError)>,
    /// Set when realtime was enabled but the channel could not be opened.
    pub realtime: Option<RealtimeError>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.realtime.is_none()
            && self.reconciled.iter().all(|t| t.permissions.is_clean())
    }

    pub fn failed_tables(&self) -> Vec<&TableId> {
        self.failed.iter().map(|(t, _)| t).collect()
    }

    pub fn table(&self, id: &TableId) -> Option<&TableReport> {
        self.reconciled.iter().find(|t| &t.table == id)
    }
}

pub(crate) struct OrmInner {
    pub(crate) config: OrmConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) bus: RealtimeBus,
    declared: RwLock<BTreeMap<TableId, Arc<TableSchema>>>,
    reconciled: RwLock<BTreeSet<TableId>>,
    /// Migration plans left unfinished by a failed reconcile, resumed by
    /// the next one.
    unfinished: Mutex<HashMap<TableId, MigrationPlan>>,
    closed: AtomicBool,
}

impl OrmInner {
    pub(crate) fn ensure_open(&self) -> OrmResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrmError::ShutDown);
        }
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Session-scoped context: one backend client, one cache, one realtime
/// bus and the tables reconciled against them. Cheap to clone.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

impl Orm {
    /// Reconciles every declared table, then opens the realtime channel.
    ///
    /// A table that fails to reconcile is reported in
    /// [`ReconcileReport::failed`] and does not stop the others. Only an
    /// invalid configuration or schema declaration fails `init` itself.
    pub async fn init(
        config: OrmConfig,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn RealtimeTransport>,
        schema: DatabaseSchema,
    ) -> OrmResult<(Self, ReconcileReport)> {
        config.validate()?;
        schema.check()?;

        let cache = Arc::new(CacheStore::new(config.cache_ttl()));
        let bus = RealtimeBus::new(
            transport,
            cache.clone(),
            config.backend.database_id.clone(),
            config.backoff,
        );
        let declared = schema
            .tables()
            .iter()
            .map(|t| (t.id.clone(), Arc::new(t.clone())))
            .collect();
        let orm = Self {
            inner: Arc::new(OrmInner {
                config,
                backend,
                cache,
                bus,
                declared: RwLock::new(declared),
                reconciled: RwLock::new(BTreeSet::new()),
                unfinished: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        };

        info!(tables = schema.len(), "reconciling declared schema");
        let mut report = ReconcileReport::default();
        for table in schema.tables() {
            match orm.reconcile_table(&table.id).await {
                Ok(table_report) => report.reconciled.push(table_report),
                Err(e) => {
                    error!(table = %table.id, "reconciliation failed: {e}");
                    report.failed.push((table.id.clone(), e));
                }
            }
        }

        if orm.inner.config.realtime
            && let Err(e) = orm.inner.bus.connect().await
        {
            warn!("realtime channel unavailable: {e}");
            report.realtime = Some(e);
        }

        info!(
            reconciled = report.reconciled.len(),
            failed = report.failed.len(),
            "schema reconciliation finished"
        );
        Ok((orm, report))
    }

    /// Brings one declared table in line with its declaration and makes it
    /// usable. Safe to call again after a failure; completed attribute
    /// changes are not repeated.
    pub async fn reconcile_table(&self, id: &TableId) -> OrmResult<TableReport> {
        self.inner.ensure_open()?;
        let schema = read(&self.inner.declared)
            .get(id)
            .cloned()
            .ok_or_else(|| OrmError::UnknownTable(id.clone()))?;

        info!(table = %id, "reconciling table");
        let report = self.reconcile_declared(&schema).await?;

        write(&self.inner.reconciled).insert(id.clone());
        self.inner.bus.track_table(id);
        info!(
            table = %id,
            created = report.created,
            attributes_changed = !report.migration.is_noop(),
            permission_failures = report.permissions.failures.len(),
            "table reconciled"
        );
        Ok(report)
    }

    /// Declares a table after init (for example one inferred from an import
    /// source) and reconciles it.
    pub async fn declare_table(&self, schema: TableSchema) -> OrmResult<TableReport> {
        self.inner.ensure_open()?;
        let id = schema.id.clone();
        {
            let mut declared = write(&self.inner.declared);
            if declared.contains_key(&id) {
                return Err(OrmError::Config(format!("table {id} is already declared")));
            }
            declared.insert(id.clone(), Arc::new(schema));
        }
        self.reconcile_table(&id).await
    }

    async fn reconcile_declared(&self, schema: &TableSchema) -> OrmResult<TableReport> {
        let backend = &self.inner.backend;
        let id = &schema.id;
        let backend_error = |target: &str| {
            let table = id.clone();
            let target = target.to_string();
            move |source: BackendError| SchemaError::Backend {
                table,
                target,
                source,
            }
        };

        let created = match backend.get_table(id).await.map_err(backend_error("table"))? {
            Some(_) => false,
            None => {
                info!(table = %id, "creating table");
                backend
                    .create_table(id, &schema.name, &schema.permissions)
                    .await
                    .map_err(backend_error("table"))?;
                true
            }
        };

        let remote = backend
            .list_attributes(id)
            .await
            .map_err(backend_error("attributes"))?;
        let executor = MigrationExecutor::new(backend.clone(), self.inner.config.poll)
            .with_max_concurrency(self.inner.config.max_concurrent_migrations);
        let resumed = self.take_unfinished(id);
        let mut plan = match resumed {
            Some(plan) => {
                info!(table = %id, pending = plan.pending().len(), "resuming unfinished migration");
                plan
            }
            None => diff_attributes(id, &schema.attributes, &remote)?,
        };
        let migration = match executor.apply(&mut plan).await {
            Ok(report) => report,
            Err(e) => {
                self.keep_unfinished(plan);
                return Err(e.into());
            }
        };

        // Attributes that were already provisioning when listed have no
        // operation in the plan; the table is usable only once they are.
        for attr in &remote {
            if attr.status != AttributeStatus::Available
                && schema.attribute_named(attr.name()).is_some()
                && !plan.operations().iter().any(|op| op.name() == attr.name())
            {
                executor.wait_until_available(id, attr.name()).await?;
            }
        }

        let permissions = PermissionReconciler::new(backend.clone())
            .reconcile(id, &schema.permissions)
            .await?;

        Ok(TableReport {
            table: id.clone(),
            created,
            migration,
            permissions,
        })
    }

    fn take_unfinished(&self, id: &TableId) -> Option<MigrationPlan> {
        self.inner
            .unfinished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }

    fn keep_unfinished(&self, plan: MigrationPlan) {
        self.inner
            .unfinished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(plan.table().clone(), plan);
    }

    /// Handle for a reconciled table.
    pub fn table(&self, id: impl Into<TableId>) -> OrmResult<Table> {
        self.inner.ensure_open()?;
        let id = id.into();
        let schema = read(&self.inner.declared)
            .get(&id)
            .cloned()
            .ok_or_else(|| OrmError::UnknownTable(id.clone()))?;
        if !read(&self.inner.reconciled).contains(&id) {
            return Err(OrmError::TableNotReconciled(id));
        }
        Ok(Table::new(self.inner.clone(), schema))
    }

    /// Reconciled tables, sorted.
    pub fn tables(&self) -> Vec<TableId> {
        read(&self.inner.reconciled).iter().cloned().collect()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    pub fn bus(&self) -> &RealtimeBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &OrmConfig {
        &self.inner.config
    }

    /// Closes the realtime channel, drops every listener and the cache.
    /// Table handles fail with [`OrmError::ShutDown`] afterwards.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.bus.shutdown().await;
        self.inner.cache.clear();
        info!("orm shut down");
    }
}
