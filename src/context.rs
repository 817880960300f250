//! The explicit supervisor context threaded through the process in place of
//! the source's module-level globals (registry, dispatcher, password and
//! auth state).

use std::sync::Arc;

use crate::auth::AuthState;
use crate::dispatcher::Dispatcher;
use crate::logging::RotatingWriter;
use crate::registry::Registry;

pub struct SupervisorContext {
    pub registry: Arc<Registry>,
    pub dispatcher: Dispatcher,
    pub auth: Arc<AuthState>,
    pub log_writer: RotatingWriter,
    pub config_path: String,
}
