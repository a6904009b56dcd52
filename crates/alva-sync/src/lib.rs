//! Keeping the dashboard in sync with the hosted backend: the REST, auth
//! and realtime clients, and the session that ties them to the state.

pub mod auth;
pub mod manager;
pub mod mock;
pub mod realtime;
pub mod rest;
pub mod supabase;

pub use auth::{clear_session, load_session, save_session, AuthClient, AuthError};
pub use manager::{DashboardSession, SessionConfig, SnapshotReceiver};
pub use mock::MockBackend;
pub use realtime::{RealtimeClient, RealtimeConfig};
pub use rest::RestClient;
pub use supabase::{SupabaseBackend, SupabaseConfig};
