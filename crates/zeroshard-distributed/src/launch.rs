//! Launch - Process Group Bootstrap
//!
//! Each rank calls `launch` with the same host/port. The first rank to arrive
//! binds the rendezvous port; later ranks join the world it created. A port
//! that is already taken surfaces as `DistributedError::AddressInUse`, and
//! `run_with_retry` relaunches the whole group on a fresh port when the
//! failure matches a pattern.
//!
//! # Example
//! ```rust
//! use zeroshard_distributed::launch::{run_with_retry, ADDRESS_IN_USE_PATTERN};
//! use zeroshard_distributed::DistributedError;
//!
//! let ranks = run_with_retry(2, ADDRESS_IN_USE_PATTERN, 3, |world| {
//!     world.barrier()?;
//!     Ok::<_, DistributedError>(world.rank())
//! })
//! .unwrap();
//! assert_eq!(ranks, vec![0, 1]);
//! ```
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::collections::HashMap;
use std::fmt;
use std::net::TcpListener;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{LocalBackend, Rendezvous, DEFAULT_TIMEOUT};
use crate::error::{DistributedError, Result};
use crate::process_group::World;

/// Host used by `spawn`.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Failure pattern that triggers a relaunch.
pub const ADDRESS_IN_USE_PATTERN: &str = ".*Address already in use.*";

// =============================================================================
// Configuration
// =============================================================================

/// Communication backend selected at launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Threads in this process.
    #[default]
    Local,
}

/// Parameters every rank passes to `launch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Global rank of the caller.
    pub rank: usize,
    /// Number of ranks in the world.
    pub world_size: usize,
    /// Rendezvous host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Rendezvous port.
    pub port: u16,
    /// Communication backend.
    #[serde(default)]
    pub backend: BackendKind,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

impl LaunchConfig {
    /// Creates a local-backend config on the default host.
    #[must_use]
    pub fn local(rank: usize, world_size: usize, port: u16) -> Self {
        Self {
            rank,
            world_size,
            host: default_host(),
            port,
            backend: BackendKind::Local,
        }
    }
}

// =============================================================================
// Rendezvous Store
// =============================================================================

/// A bound port plus the world being assembled behind it.
struct Store {
    _listener: TcpListener,
    rendezvous: Arc<Rendezvous>,
    world_size: usize,
    joined: Vec<bool>,
    remaining: usize,
    /// Ranks that have not joined by then are not coming.
    deadline: Instant,
}

fn stores() -> &'static Mutex<HashMap<(String, u16), Store>> {
    static STORES: OnceLock<Mutex<HashMap<(String, u16), Store>>> = OnceLock::new();
    STORES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Joins the world behind `config.host:config.port`.
pub fn launch(config: &LaunchConfig) -> Result<World> {
    if config.rank >= config.world_size {
        return Err(DistributedError::InvalidRank {
            rank: config.rank,
            world_size: config.world_size,
        });
    }

    let key = (config.host.clone(), config.port);
    let in_use = || DistributedError::AddressInUse {
        host: config.host.clone(),
        port: config.port,
    };

    let mut stores = stores().lock();
    let now = Instant::now();
    stores.retain(|(host, port), store| {
        let live = store.deadline > now;
        if !live {
            warn!(host = %host, port, missing = store.remaining, "dropping incomplete rendezvous");
        }
        live
    });
    if !stores.contains_key(&key) {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .map_err(|e| DistributedError::from_bind(&e, &config.host, config.port))?;
        debug!(host = %config.host, port = config.port, "bound rendezvous port");
        stores.insert(
            key.clone(),
            Store {
                _listener: listener,
                rendezvous: Arc::new(Rendezvous::new(DEFAULT_TIMEOUT)),
                world_size: config.world_size,
                joined: vec![false; config.world_size],
                remaining: config.world_size,
                deadline: now + DEFAULT_TIMEOUT,
            },
        );
    }

    let store = stores.get_mut(&key).ok_or_else(in_use)?;
    // Another group already owns this port.
    if store.world_size != config.world_size || store.joined[config.rank] {
        return Err(in_use());
    }
    store.joined[config.rank] = true;
    store.remaining -= 1;
    let backend = LocalBackend::join(
        config.rank,
        config.world_size,
        Arc::clone(&store.rendezvous),
    );
    if store.remaining == 0 {
        stores.remove(&key);
    }

    info!(
        rank = config.rank,
        world_size = config.world_size,
        host = %config.host,
        port = config.port,
        "joined process group"
    );
    Ok(World::init(Arc::new(backend)))
}

/// Drops the rendezvous behind `host:port` if some ranks never joined it,
/// freeing the port. Returns true when an entry was removed.
pub fn abandon(host: &str, port: u16) -> bool {
    let removed = stores().lock().remove(&(host.to_string(), port));
    if let Some(store) = &removed {
        warn!(host, port, missing = store.remaining, "abandoned incomplete rendezvous");
    }
    removed.is_some()
}

#[cfg(test)]
fn is_pending(host: &str, port: u16) -> bool {
    stores().lock().contains_key(&(host.to_string(), port))
}

/// Returns a port that was free at the time of the call.
pub fn free_port() -> Result<u16> {
    let listener =
        TcpListener::bind((DEFAULT_HOST, 0)).map_err(|e| DistributedError::Io(e.to_string()))?;
    let addr = listener
        .local_addr()
        .map_err(|e| DistributedError::Io(e.to_string()))?;
    Ok(addr.port())
}

// =============================================================================
// Spawning
// =============================================================================

/// Runs `f` on `world_size` rank threads launched behind `port`.
///
/// Returns the per-rank results in rank order, or the first failure.
pub fn spawn<R, E, F>(world_size: usize, port: u16, f: F) -> core::result::Result<Vec<R>, E>
where
    R: Send,
    E: From<DistributedError> + Send,
    F: Fn(World) -> core::result::Result<R, E> + Sync,
{
    thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = (0..world_size)
            .map(|rank| {
                s.spawn(move || {
                    let world = launch(&LaunchConfig::local(rank, world_size, port))?;
                    f(world)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(world_size);
        let mut first_err = None;
        for (rank, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(err)) => {
                    first_err.get_or_insert(err);
                }
                Err(_) => {
                    first_err.get_or_insert(DistributedError::RankPanicked { rank }.into());
                }
            }
        }
        // Ranks that failed to launch leave the rendezvous incomplete.
        abandon(DEFAULT_HOST, port);
        match first_err {
            Some(err) => Err(err),
            None => Ok(results),
        }
    })
}

/// Spawns the group on a fresh port, relaunching while failures match `pattern`.
pub fn run_with_retry<R, E, F>(
    world_size: usize,
    pattern: &str,
    max_attempts: usize,
    f: F,
) -> core::result::Result<Vec<R>, E>
where
    R: Send,
    E: From<DistributedError> + fmt::Display + Send,
    F: Fn(World) -> core::result::Result<R, E> + Sync,
{
    let matcher =
        Regex::new(pattern).map_err(|e| DistributedError::InvalidConfiguration(e.to_string()))?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let port = free_port()?;
        match spawn(world_size, port, &f) {
            Err(err) if attempt < max_attempts && matcher.is_match(&err.to_string()) => {
                warn!(attempt, port, error = %err, "launch failed, relaunching on a fresh port");
            }
            other => return other,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_spawn_runs_every_rank() {
        let port = free_port().unwrap();
        let ranks = spawn(3, port, |world| {
            world.barrier()?;
            Ok::<_, DistributedError>((world.rank(), world.world_size()))
        })
        .unwrap();
        assert_eq!(ranks, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_taken_port_is_address_in_use() {
        let blocker = TcpListener::bind((DEFAULT_HOST, 0)).unwrap();
        let port = blocker.local_addr().unwrap().port();
        let err = spawn(2, port, |world| Ok::<_, DistributedError>(world.rank())).unwrap_err();
        assert!(matches!(err, DistributedError::AddressInUse { .. }));
        assert!(err.to_string().contains("Address already in use"));
    }

    #[test]
    fn test_abandon_drops_incomplete_rendezvous() {
        let port = free_port().unwrap();
        let _world = launch(&LaunchConfig::local(0, 2, port)).unwrap();
        assert!(is_pending(DEFAULT_HOST, port));
        assert!(abandon(DEFAULT_HOST, port));
        assert!(!is_pending(DEFAULT_HOST, port));
        assert!(!abandon(DEFAULT_HOST, port));
    }

    #[test]
    fn test_failed_spawn_leaves_no_rendezvous() {
        let port = free_port().unwrap();
        // A three-rank world that never completes owns the port.
        let _world = launch(&LaunchConfig::local(0, 3, port)).unwrap();
        let err = spawn(2, port, |world| Ok::<_, DistributedError>(world.rank())).unwrap_err();
        assert!(matches!(err, DistributedError::AddressInUse { .. }));
        assert!(!is_pending(DEFAULT_HOST, port));
    }

    #[test]
    fn test_invalid_rank() {
        let err = launch(&LaunchConfig::local(2, 2, 1)).unwrap_err();
        assert!(matches!(err, DistributedError::InvalidRank { rank: 2, .. }));
    }

    #[test]
    fn test_retry_relaunches_on_matching_failure() {
        let attempts = AtomicUsize::new(0);
        let result = run_with_retry(2, ADDRESS_IN_USE_PATTERN, 3, |world| {
            world.barrier()?;
            if world.rank() == 0 && attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DistributedError::AddressInUse {
                    host: DEFAULT_HOST.to_string(),
                    port: 0,
                });
            }
            Ok(world.rank())
        })
        .unwrap();
        assert_eq!(result, vec![0, 1]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_gives_up_on_other_failures() {
        let attempts = AtomicUsize::new(0);
        let err = run_with_retry(1, ADDRESS_IN_USE_PATTERN, 5, |_world| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DistributedError::InvalidConfiguration("bad".into()))
        })
        .unwrap_err();
        assert!(matches!(err, DistributedError::InvalidConfiguration(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_launch_config_from_toml() {
        let config: LaunchConfig = toml::from_str("rank = 1\nworld_size = 4\nport = 29500").unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.backend, BackendKind::Local);
    }
}
