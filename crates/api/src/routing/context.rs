//! Current tenant for the running request
//!
//! Each request runs inside [`CurrentTenantContext::scope`], which installs a
//! fresh task-local cell. Code that runs off the tokio runtime (blocking
//! threads, CLI tools) falls back to a thread-local cell. Tasks on a runtime
//! without a scope cannot set a tenant: runtime workers are shared between
//! tasks, so a thread-local value would leak into unrelated tasks.

use std::cell::RefCell;
use std::future::Future;

use tenantry_shared::{SharedTenant, TenantError, TenantId, TenantResult};

tokio::task_local! {
    static TASK_TENANT: RefCell<Option<SharedTenant>>;
}

thread_local! {
    static THREAD_TENANT: RefCell<Option<SharedTenant>> = const { RefCell::new(None) };
}

fn in_task_scope() -> bool {
    TASK_TENANT.try_with(|_| ()).is_ok()
}

/// Run `f` against the innermost cell for the current execution unit.
///
/// On a runtime without a task scope this is the worker's thread-local,
/// which only ever holds a value for the duration of a synchronous
/// [`CurrentTenantContext::with_override`] body.
fn with_slot<R>(f: impl FnOnce(&RefCell<Option<SharedTenant>>) -> R) -> R {
    if in_task_scope() {
        TASK_TENANT.with(f)
    } else {
        THREAD_TENANT.with(f)
    }
}

fn replace_slot(tenant: Option<SharedTenant>) -> Option<SharedTenant> {
    with_slot(|slot| slot.replace(tenant))
}

/// Handle to the current tenant. Cheap to clone; the cells it reads are
/// per task (or per thread), never shared.
#[derive(Debug, Clone, Default)]
pub struct CurrentTenantContext {
    default_tenant_id: Option<TenantId>,
}

impl CurrentTenantContext {
    pub fn new(default_tenant_id: Option<TenantId>) -> Self {
        Self { default_tenant_id }
    }

    /// Whether [`set`](Self::set) has a cell to write to: inside a
    /// [`scope`](Self::scope), or off the tokio runtime
    pub fn has_scope(&self) -> bool {
        in_task_scope() || tokio::runtime::Handle::try_current().is_err()
    }

    /// Install `tenant` as current. Ignored, with a warning, on a runtime
    /// task that is not inside a [`scope`](Self::scope).
    pub fn set(&self, tenant: SharedTenant) {
        if !self.has_scope() {
            tracing::warn!(
                tenant_id = %tenant.id,
                "No tenant scope on this task; current tenant not set"
            );
            return;
        }
        replace_slot(Some(tenant));
    }

    /// Current tenant, if any. Never fails.
    pub fn get(&self) -> Option<SharedTenant> {
        with_slot(|slot| slot.borrow().clone())
    }

    pub fn clear(&self) {
        replace_slot(None);
    }

    /// Run `body` with `tenant` installed, then restore whatever was current
    /// before. The previous value comes back even if `body` panics.
    pub fn with_override<R>(&self, tenant: SharedTenant, body: impl FnOnce() -> R) -> R {
        let _restore = RestoreOnDrop {
            previous: replace_slot(Some(tenant)),
        };
        body()
    }

    /// Run `fut` with a fresh, empty tenant cell
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        TASK_TENANT.scope(RefCell::new(None), fut).await
    }

    /// Run `fut` with `tenant` installed. The enclosing value is visible
    /// again once `fut` completes or is dropped.
    pub async fn override_scope<F: Future>(&self, tenant: SharedTenant, fut: F) -> F::Output {
        TASK_TENANT.scope(RefCell::new(Some(tenant)), fut).await
    }

    /// Id of the current tenant, or the configured default
    pub fn tenant_id(&self) -> TenantResult<TenantId> {
        match self.get() {
            Some(tenant) => Ok(tenant.id),
            None => self.default_tenant_id(),
        }
    }

    pub fn default_tenant_id(&self) -> TenantResult<TenantId> {
        self.default_tenant_id.ok_or_else(|| {
            TenantError::Configuration(
                "no current tenant and no default tenant configured".to_string(),
            )
        })
    }
}

struct RestoreOnDrop {
    previous: Option<SharedTenant>,
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        replace_slot(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Arc;
    use std::time::Duration;
    use tenantry_shared::Tenant;

    fn tenant(id: i64) -> SharedTenant {
        Arc::new(Tenant::new(id, format!("Tenant {}", id), format!("t{}.example.com", id)))
    }

    fn current_id(ctx: &CurrentTenantContext) -> Option<TenantId> {
        ctx.get().map(|t| t.id)
    }

    #[test]
    fn test_set_get_clear() {
        let ctx = CurrentTenantContext::default();
        ctx.clear();
        assert!(ctx.get().is_none());

        ctx.set(tenant(1));
        assert_eq!(current_id(&ctx), Some(TenantId(1)));

        ctx.clear();
        assert!(ctx.get().is_none());
    }

    #[test]
    fn test_override_restores_previous() {
        let ctx = CurrentTenantContext::default();
        ctx.set(tenant(1));

        let seen = ctx.with_override(tenant(2), || current_id(&ctx));
        assert_eq!(seen, Some(TenantId(2)));
        assert_eq!(current_id(&ctx), Some(TenantId(1)));
        ctx.clear();
    }

    #[test]
    fn test_override_restores_on_panic() {
        let ctx = CurrentTenantContext::default();
        ctx.set(tenant(1));

        let result = catch_unwind(AssertUnwindSafe(|| {
            ctx.with_override(tenant(2), || panic!("handler failed"))
        }));

        assert!(result.is_err());
        assert_eq!(current_id(&ctx), Some(TenantId(1)));
        ctx.clear();
    }

    #[test]
    fn test_override_restores_empty() {
        let ctx = CurrentTenantContext::default();
        ctx.clear();

        ctx.with_override(tenant(3), || assert_eq!(current_id(&ctx), Some(TenantId(3))));
        assert!(ctx.get().is_none());
    }

    #[test]
    fn test_tenant_id_falls_back_to_default() {
        let ctx = CurrentTenantContext::new(Some(TenantId(42)));
        ctx.clear();
        assert_eq!(ctx.tenant_id(), Ok(TenantId(42)));

        ctx.set(tenant(7));
        assert_eq!(ctx.tenant_id(), Ok(TenantId(7)));
        ctx.clear();
    }

    #[test]
    fn test_tenant_id_without_default_is_configuration_error() {
        let ctx = CurrentTenantContext::default();
        ctx.clear();
        assert!(matches!(ctx.tenant_id(), Err(TenantError::Configuration(_))));
        assert!(matches!(ctx.default_tenant_id(), Err(TenantError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_scopes_are_isolated_per_task() {
        let ctx = CurrentTenantContext::default();

        let handles: Vec<_> = (1..=8)
            .map(|id| {
                let ctx = ctx.clone();
                let scope = ctx.clone();
                tokio::spawn(async move {
                    scope
                        .scope(async move {
                            ctx.set(tenant(id));
                            tokio::task::yield_now().await;
                            current_id(&ctx)
                        })
                        .await
                })
            })
            .collect();

        for (id, handle) in (1..=8).zip(handles) {
            assert_eq!(handle.await.unwrap(), Some(TenantId(id)));
        }
    }

    #[tokio::test]
    async fn test_scope_starts_empty_and_does_not_leak() {
        let ctx = CurrentTenantContext::default();

        ctx.scope(async {
            assert!(ctx.get().is_none());
            ctx.set(tenant(1));
        })
        .await;

        ctx.scope(async { assert!(ctx.get().is_none()) }).await;
    }

    #[tokio::test]
    async fn test_override_scope_restores_after_completion() {
        let ctx = CurrentTenantContext::default();

        ctx.scope(async {
            ctx.set(tenant(1));

            let inner = ctx
                .override_scope(tenant(2), async {
                    tokio::task::yield_now().await;
                    current_id(&ctx)
                })
                .await;

            assert_eq!(inner, Some(TenantId(2)));
            assert_eq!(current_id(&ctx), Some(TenantId(1)));
        })
        .await;
    }

    #[tokio::test]
    async fn test_override_scope_restores_when_dropped() {
        let ctx = CurrentTenantContext::default();

        ctx.scope(async {
            ctx.set(tenant(1));

            let cancelled = tokio::time::timeout(
                Duration::from_millis(10),
                ctx.override_scope(tenant(2), std::future::pending::<()>()),
            )
            .await;

            assert!(cancelled.is_err());
            assert_eq!(current_id(&ctx), Some(TenantId(1)));
        })
        .await;
    }

    #[tokio::test]
    async fn test_set_without_scope_does_not_leak_to_other_tasks() {
        let ctx = CurrentTenantContext::default();
        assert!(!ctx.has_scope());

        let writer = ctx.clone();
        tokio::spawn(async move {
            writer.set(tenant(5));
            assert!(writer.get().is_none());
        })
        .await
        .unwrap();

        let reader = ctx.clone();
        let seen = tokio::spawn(async move { current_id(&reader) }).await.unwrap();
        assert_eq!(seen, None);
        assert!(ctx.get().is_none());
    }

    #[tokio::test]
    async fn test_override_without_scope_is_confined_to_body() {
        let ctx = CurrentTenantContext::default();

        let seen = ctx.with_override(tenant(4), || current_id(&ctx));
        assert_eq!(seen, Some(TenantId(4)));
        assert!(ctx.get().is_none());

        ctx.scope(async { assert!(ctx.has_scope()) }).await;
    }

    #[test]
    fn test_thread_fallback_off_runtime() {
        let ctx = CurrentTenantContext::default();
        assert!(ctx.has_scope());

        ctx.set(tenant(6));
        let other = std::thread::spawn({
            let ctx = ctx.clone();
            move || current_id(&ctx)
        })
        .join()
        .unwrap();

        assert_eq!(other, None);
        assert_eq!(current_id(&ctx), Some(TenantId(6)));
        ctx.clear();
    }

    #[tokio::test]
    async fn test_sync_override_inside_task_scope() {
        let ctx = CurrentTenantContext::default();

        ctx.scope(async {
            ctx.set(tenant(1));
            let result = catch_unwind(AssertUnwindSafe(|| {
                ctx.with_override(tenant(2), || panic!("boom"))
            }));
            assert!(result.is_err());
            assert_eq!(current_id(&ctx), Some(TenantId(1)));
        })
        .await;
    }
}
