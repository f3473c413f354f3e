//! Tenant context for log scoping
//!
//! Thread-local storage for the tenant (and optionally the user) a piece of
//! work runs on behalf of. [`crate::layers::TenantContextLayer`] copies it
//! onto every span opened while a guard is alive.

use std::cell::RefCell;

use uuid::Uuid;

/// Tenant context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContextData {
    pub tenant: String,
    pub user: Option<String>,
    /// Unique id of this process run
    pub instance_id: Uuid,
}

thread_local! {
    static TENANT_CONTEXT: RefCell<Option<TenantContextData>> = const { RefCell::new(None) };
}

/// RAII guard for tenant context
///
/// Sets the context for the current thread and restores the previous one on
/// drop.
///
/// ```ignore
/// let _guard = TenantContextGuard::new("t1").with_user("alice");
/// tracing::info!("listing resources");
/// ```
pub struct TenantContextGuard {
    previous: Option<TenantContextData>,
}

impl TenantContextGuard {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self::with_instance_id(tenant, Uuid::new_v4())
    }

    /// Use a fixed instance id, e.g. one shared by every guard of a process
    pub fn with_instance_id(tenant: impl Into<String>, instance_id: Uuid) -> Self {
        let data = TenantContextData {
            tenant: tenant.into(),
            user: None,
            instance_id,
        };
        let previous = TENANT_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Attach a user name to the active context
    pub fn with_user(self, user: impl Into<String>) -> Self {
        let user = user.into();
        TENANT_CONTEXT.with(|ctx| {
            if let Some(data) = ctx.borrow_mut().as_mut() {
                data.user = Some(user);
            }
        });
        self
    }

    pub fn current() -> Option<TenantContextData> {
        TENANT_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_tenant() -> Option<String> {
        Self::current().map(|ctx| ctx.tenant)
    }
}

impl Drop for TenantContextGuard {
    fn drop(&mut self) {
        TENANT_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a tenant context
///
/// ```ignore
/// with_tenant_context!("t1", {
///     tracing::info!("listing resources");
/// });
/// ```
#[macro_export]
macro_rules! with_tenant_context {
    ($tenant:expr, $body:block) => {{
        let _guard = $crate::context::TenantContextGuard::new($tenant);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_context_guard() {
        assert!(TenantContextGuard::current().is_none());

        {
            let _guard = TenantContextGuard::new("t1").with_user("alice");
            let ctx = TenantContextGuard::current().unwrap();
            assert_eq!(ctx.tenant, "t1");
            assert_eq!(ctx.user.as_deref(), Some("alice"));
        }

        assert!(TenantContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        {
            let _outer = TenantContextGuard::new("t1");
            assert_eq!(TenantContextGuard::current_tenant().as_deref(), Some("t1"));

            {
                let _inner = TenantContextGuard::new("t2");
                assert_eq!(TenantContextGuard::current_tenant().as_deref(), Some("t2"));
            }

            assert_eq!(TenantContextGuard::current_tenant().as_deref(), Some("t1"));
        }
        assert!(TenantContextGuard::current_tenant().is_none());
    }

    #[test]
    fn test_with_instance_id() {
        let id = Uuid::new_v4();
        let _guard = TenantContextGuard::with_instance_id("t1", id);
        assert_eq!(TenantContextGuard::current().unwrap().instance_id, id);
    }

    #[test]
    fn test_macro_scopes_context() {
        let seen = crate::with_tenant_context!("t9", { TenantContextGuard::current_tenant() });
        assert_eq!(seen.as_deref(), Some("t9"));
        assert!(TenantContextGuard::current().is_none());
    }
}
