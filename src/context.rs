//! Ambient task context.
//!
//! The context is captured at enqueue time and re-established around the
//! user callable at execution time, so task code can ask for the "current
//! project/app/user" without threading parameters through every call site.
//! The binding is a task-local scope: it is per worker, nests, and is
//! restored on every exit path.

use serde::{Deserialize, Serialize};

/// Logical request/task context carried on every record.
///
/// All fields are optional; a missing field reads back as `None` inside the
/// callable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Owning project
    pub project_id: Option<String>,
    /// Tool instance within the project
    pub app_config_id: Option<String>,
    /// Acting user; `None` means anonymous
    pub user_id: Option<String>,
    /// Correlates a record with the request that posted it
    pub correlation_id: Option<String>,
}

#[derive(Clone)]
struct Ambient {
    context: TaskContext,
    notifications_suppressed: bool,
}

tokio::task_local! {
    static AMBIENT: Ambient;
}

impl TaskContext {
    /// Context with every field set to its absent sentinel.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Set the project id.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the app config id.
    pub fn with_app_config(mut self, app_config_id: impl Into<String>) -> Self {
        self.app_config_id = Some(app_config_id.into());
        self
    }

    /// Set the user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// The ambient context of the current task scope.
    ///
    /// Outside any scope this returns the anonymous sentinel value.
    pub fn current() -> TaskContext {
        AMBIENT
            .try_with(|ambient| ambient.context.clone())
            .unwrap_or_default()
    }

    /// Run `future` with `self` as the ambient context.
    ///
    /// The current notification-suppression flag is preserved. The previous
    /// binding is restored when the future completes, whether it succeeds
    /// or not.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        let suppressed = notifications_suppressed();
        enter(self, suppressed, future).await
    }
}

/// Whether side-channel notifications are suppressed in the current scope.
pub fn notifications_suppressed() -> bool {
    AMBIENT
        .try_with(|ambient| ambient.notifications_suppressed)
        .unwrap_or(false)
}

/// Bind both the context and the suppression flag around `future`.
///
/// Used by the worker loop to re-establish a record's captured context for
/// the duration of its execution.
pub(crate) async fn enter<F>(
    context: TaskContext,
    notifications_suppressed: bool,
    future: F,
) -> F::Output
where
    F: std::future::Future,
{
    AMBIENT
        .scope(
            Ambient {
                context,
                notifications_suppressed,
            },
            future,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_anonymous_outside_scope() {
        assert_eq!(TaskContext::current(), TaskContext::anonymous());
        assert!(!notifications_suppressed());
    }

    #[tokio::test]
    async fn scope_binds_and_restores() {
        let ctx = TaskContext::anonymous()
            .with_project("p1")
            .with_user("u7");

        ctx.clone()
            .scope(async {
                assert_eq!(TaskContext::current().project_id.as_deref(), Some("p1"));
                assert_eq!(TaskContext::current().user_id.as_deref(), Some("u7"));
            })
            .await;

        assert_eq!(TaskContext::current(), TaskContext::anonymous());
    }

    #[tokio::test]
    async fn scopes_nest_and_unwind() {
        let outer = TaskContext::anonymous().with_project("outer");
        let inner = TaskContext::anonymous().with_project("inner");

        outer
            .scope(async {
                assert_eq!(TaskContext::current().project_id.as_deref(), Some("outer"));
                inner
                    .scope(async {
                        assert_eq!(
                            TaskContext::current().project_id.as_deref(),
                            Some("inner")
                        );
                    })
                    .await;
                assert_eq!(TaskContext::current().project_id.as_deref(), Some("outer"));
            })
            .await;
    }

    #[tokio::test]
    async fn suppression_flag_travels_with_scope() {
        enter(TaskContext::anonymous(), true, async {
            assert!(notifications_suppressed());
        })
        .await;
        assert!(!notifications_suppressed());
    }
}
