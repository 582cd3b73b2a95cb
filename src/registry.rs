//! Process-wide named pool registry (§4.D "Factory" subsection): lets
//! unrelated parts of a program share one `Pool` per name instead of
//! each opening their own sockets.

use crate::config::Config;
use crate::pool::Pool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

fn registry() -> &'static Mutex<HashMap<String, Arc<Pool>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Pool>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Return the pool registered under `name`, constructing (but not
/// initializing) one from `config` if this is the first request for
/// that name. Subsequent calls with the same name ignore `config` and
/// return the existing pool — deliberately so: a second, differently
/// configured call for the same name is almost always a bug, and
/// silently reconfiguring a live pool out from under its other callers
/// would be worse than ignoring the new config.
pub fn get_instance(name: &str, config: impl FnOnce() -> Config) -> Arc<Pool> {
    let mut guard = registry().lock().unwrap();
    if let Some(pool) = guard.get(name) {
        return Arc::clone(pool);
    }
    let pool = Pool::new(config());
    guard.insert(name.to_string(), Arc::clone(&pool));
    pool
}

/// Remove `name` from the registry without shutting down the pool it
/// pointed at. Callers that want the sockets closed should call
/// `Pool::shutdown` themselves first.
pub fn remove_instance(name: &str) -> Option<Arc<Pool>> {
    registry().lock().unwrap().remove(name)
}
