//! Connection pool for the distributed cache.
//!
//! # Responsibilities
//! - Bound active connections (`max_active`) and retained idle ones (`max_idle`)
//! - Probe idle connections with PING before handing them out
//! - Authenticate and select the database on fresh connections
//!
//! # Design Decisions
//! - Borrow failures surface to the caller, there is no silent retry
//! - A connection that saw an I/O or protocol error is discarded on drop
//! - Idle connections older than `idle_timeout` are dropped on borrow

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cache::resp::{encode_command, read_reply, Reply};
use crate::cache::CacheError;
use crate::config::schema::RedisConfig;

/// One RESP connection.
struct Connection {
    stream: BufReader<TcpStream>,
}

impl Connection {
    async fn dial(config: &RedisConfig) -> Result<Self, CacheError> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| CacheError::Timeout {
                address: config.address.clone(),
            })??;
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            stream: BufReader::new(stream),
        };
        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            conn.call(&[b"AUTH", password.as_bytes()]).await?;
        }
        if config.db != 0 {
            let db = config.db.to_string();
            conn.call(&[b"SELECT", db.as_bytes()]).await?;
        }
        tracing::debug!(address = %config.address, "Cache connection opened");
        Ok(conn)
    }

    async fn call(&mut self, args: &[&[u8]]) -> Result<Reply, CacheError> {
        let frame = encode_command(args);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        match read_reply(&mut self.stream).await? {
            Reply::Error(message) => Err(CacheError::Server(message)),
            reply => Ok(reply),
        }
    }

    async fn ping(&mut self) -> Result<(), CacheError> {
        match self.call(&[b"PING"]).await? {
            Reply::Status(status) if status == "PONG" => Ok(()),
            other => Err(CacheError::Protocol(format!("unexpected PING reply {other:?}"))),
        }
    }
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolInner {
    config: RedisConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> std::sync::MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of cache connections. Clones share the pool.
#[derive(Clone)]
pub struct RedisPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPool")
            .field("address", &self.inner.config.address)
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RedisPool {
    /// Create a pool. No connection is opened until the first borrow.
    pub fn new(config: RedisConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_active));
        Self {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(VecDeque::new()),
                permits,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Borrow a connection.
    pub async fn get(&self) -> Result<PooledConnection, CacheError> {
        if self.is_closed() {
            return Err(CacheError::PoolClosed);
        }
        let permit = self
            .inner
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|err| match err {
                tokio::sync::TryAcquireError::Closed => CacheError::PoolClosed,
                tokio::sync::TryAcquireError::NoPermits => CacheError::PoolExhausted,
            })?;

        let idle_timeout = Duration::from_secs(self.inner.config.idle_timeout_secs);
        let reused = {
            let mut idle = self.inner.idle();
            let mut found = None;
            while let Some(candidate) = idle.pop_front() {
                if idle_timeout.is_zero() || candidate.since.elapsed() < idle_timeout {
                    found = Some(candidate.conn);
                    break;
                }
            }
            found
        };

        let conn = match reused {
            Some(mut conn) => {
                conn.ping().await?;
                conn
            }
            None => Connection::dial(&self.inner.config).await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            broken: false,
            _permit: permit,
        })
    }

    /// Close the pool and drop idle connections. Borrowed connections are
    /// discarded when returned.
    pub fn close(&self) -> Result<(), CacheError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::PoolClosed);
        }
        self.inner.permits.close();
        let dropped = {
            let mut idle = self.inner.idle();
            let n = idle.len();
            idle.clear();
            n
        };
        tracing::info!(address = %self.inner.config.address, idle = dropped, "Cache pool closed");
        Ok(())
    }
}

/// A borrowed connection, returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Run one command. Server error replies are returned as `CacheError::Server`
    /// and leave the connection usable.
    pub async fn call(&mut self, args: &[&[u8]]) -> Result<Reply, CacheError> {
        let conn = self.conn.as_mut().ok_or(CacheError::PoolClosed)?;
        match conn.call(args).await {
            Err(err @ CacheError::Server(_)) => Err(err),
            Err(err) => {
                self.broken = true;
                Err(err)
            }
            ok => ok,
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || self.pool.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.pool.idle();
        if idle.len() < self.pool.config.max_idle {
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
    }
}
