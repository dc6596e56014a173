//! Logging utilities with request context support.
//!
//! Handlers run inside a task-local scope carrying the request ID and the
//! authenticated user, so log lines and usage records can pick them up without
//! threading them through every call.

tokio::task_local! {
    /// Task-local storage for the current request ID.
    ///
    /// This allows logs to include a unique request ID for tracking all
    /// logs related to a single request.
    pub static REQUEST_ID: String;
}

tokio::task_local! {
    /// Task-local storage for the authenticated user ID.
    pub static USER_ID: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Get the current user ID from context.
///
/// Returns "anonymous" if no user is set.
pub fn get_user_id() -> String {
    USER_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| "anonymous".to_string())
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execute an async block with request context (request_id, user_id).
///
/// # Example
///
/// ```ignore
/// with_request_context!(request_id, user.id.clone(), async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($request_id:expr, $user_id:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, async {
                $crate::core::logging::USER_ID.scope($user_id, $body).await
            })
            .await
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_id_get() {
        REQUEST_ID
            .scope("test-request-123".to_string(), async {
                assert_eq!(get_request_id(), "test-request-123");
            })
            .await;
    }

    #[tokio::test]
    async fn test_request_id_isolation() {
        let task1 = tokio::spawn(async {
            REQUEST_ID
                .scope("request-1".to_string(), async {
                    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                    get_request_id()
                })
                .await
        });

        let task2 = tokio::spawn(async {
            REQUEST_ID
                .scope("request-2".to_string(), async {
                    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                    get_request_id()
                })
                .await
        });

        assert_eq!(task1.await.unwrap(), "request-1");
        assert_eq!(task2.await.unwrap(), "request-2");
    }

    #[tokio::test]
    async fn test_context_defaults() {
        assert_eq!(get_request_id(), "");
        assert_eq!(get_user_id(), "anonymous");
    }

    #[test]
    fn test_generate_request_id_is_unique_uuid() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn test_with_request_context_macro() {
        let (request_id, user_id) = crate::with_request_context!(
            "req-42".to_string(),
            "alice".to_string(),
            async { (get_request_id(), get_user_id()) }
        );
        assert_eq!(request_id, "req-42");
        assert_eq!(user_id, "alice");
    }
}
