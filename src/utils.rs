use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use log::error;
use uuid::Uuid;

pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn format_rate_limit_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Build an identifier of the form `<prefix>_<millis>_<random>`.
pub fn generate_id(prefix: &str, millis: i64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, millis, &random[..9])
}

pub fn is_auth_path(path: &str) -> bool {
    path.contains("/auth")
}

pub fn is_admin_path(path: &str) -> bool {
    path.contains("/admin")
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("Mutex poisoned for '{}', recovering", context);
        poisoned.into_inner()
    })
}

pub fn read_or_recover<'a, T>(lock: &'a RwLock<T>, context: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        error!("RwLock poisoned for '{}', recovering", context);
        poisoned.into_inner()
    })
}

pub fn write_or_recover<'a, T>(lock: &'a RwLock<T>, context: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        error!("RwLock poisoned for '{}', recovering", context);
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("audit", 1_700_000_000_000);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "audit");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, generate_id("audit", 1_700_000_000_000));
    }

    #[test]
    fn test_path_markers() {
        assert!(is_auth_path("/api/auth/login"));
        assert!(!is_auth_path("/api/ideas"));
        assert!(is_admin_path("/api/admin/users"));
    }
}
