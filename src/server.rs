//! Connection dispatcher (C6): the accept loop, per-connection command
//! loop, and the background tasks that drive AOF flushing and RDB
//! scheduling. See spec §4.6, §5.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::aof::{AppendFsync, Aof};
use crate::cmd::Command;
use crate::config::Config;
use crate::db::{Db, MemoryConfig};
use crate::error::CommandError;
use crate::rdb::{self, RdbScheduler, SaveRule};
use crate::resp::{Connection, Frame};
use crate::session::Session;

/// Server-wide state threaded explicitly into every command handler and
/// background task — no process-global keyspace or handler table (spec
/// §9's "Global mutable state" redesign note).
pub struct Context {
    pub db: Db,
    pub aof: Option<Arc<Aof>>,
    pub rdb: Arc<RdbScheduler>,
    pub config: Arc<Config>,
}

impl Context {
    pub fn rdb_path(&self) -> PathBuf {
        self.config.dir.join(&self.config.db_filename)
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<Context>,
}

impl Server {
    pub async fn bind(config: Config) -> anyhow::Result<Server> {
        let listen_addr = config.listen_addr.clone();
        let listener = TcpListener::bind(&listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("can't bind {listen_addr}: {e}"))?;

        tokio::fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| anyhow::anyhow!("can't create dir {}: {e}", config.dir.display()))?;

        let mem_config = MemoryConfig {
            max_memory: config.max_memory,
            policy: config.max_memory_policy,
            samples: config.max_memory_samples,
        };
        let db = Db::new(mem_config);

        let aof = if config.append_only {
            Some(Arc::new(
                Aof::open(&config.dir, &config.append_filename, config.append_fsync).await?,
            ))
        } else {
            None
        };

        let rules = config
            .save_rules
            .iter()
            .map(|&(secs, changes)| SaveRule::new(secs, changes))
            .collect();
        let rdb_scheduler = Arc::new(RdbScheduler::new(rules));

        let ctx = Arc::new(Context {
            db,
            aof,
            rdb: rdb_scheduler,
            config: Arc::new(config),
        });

        Ok(Server { listener, ctx })
    }

    /// Loads persisted state on boot: AOF replay if enabled, else RDB
    /// restore (spec §4.4's "on startup, if AOF is enabled... the server
    /// replays"; RDB load otherwise per main's own startup ordering).
    pub async fn load_persisted_state(&self) -> anyhow::Result<()> {
        if self.ctx.config.append_only {
            let path = self.ctx.config.dir.join(&self.ctx.config.append_filename);
            crate::aof::Aof::replay(&path, &self.ctx.db).await?;
            tracing::info!(path = %path.display(), "DB loaded from append only file");
        } else {
            let path = self.ctx.rdb_path();
            match rdb::load(&path, &self.ctx.db).await {
                Ok(()) => tracing::info!(path = %path.display(), "DB loaded from disk"),
                Err(crate::error::RdbError::CorruptSnapshot) => {
                    tracing::warn!("RDB file failed integrity check; starting with an empty keyspace");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn context(&self) -> Arc<Context> {
        self.ctx.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the AOF `everysec` flusher and RDB scheduler as background
    /// tasks (spec §5).
    pub fn spawn_background_tasks(&self) {
        if let Some(aof) = self.ctx.aof.clone() {
            if aof.fsync == AppendFsync::EverySec {
                tokio::spawn(everysec_flusher(aof));
            }
        }

        if !self.ctx.rdb.rules.is_empty() {
            tokio::spawn(rdb_scheduler_task(self.ctx.clone()));
        }
    }

    /// Accepts connections until `shutdown` resolves, then stops accepting
    /// new ones and returns so the caller can drain in-flight work and
    /// perform a final AOF flush (spec §5).
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let ctx = self.ctx.clone();
                            tokio::spawn(async move {
                                tracing::debug!(%addr, "connection accepted");
                                handle_connection(socket, ctx).await;
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("shutting down accept loop");
                    return;
                }
            }
        }
    }

    pub async fn final_flush(&self) {
        if let Some(aof) = &self.ctx.aof {
            if let Err(e) = aof.flush().await {
                tracing::error!(error = %e, "final AOF flush failed");
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, ctx: Arc<Context>) {
    let mut conn = Connection::new(socket, ctx.config.limits);
    let mut session = Session::new();

    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return, // clean client close
            Err(e) => {
                tracing::debug!(error = %e, "protocol error, closing connection");
                let _ = conn.write_frame(&Frame::Error(format!("ERR {e}"))).await;
                let _ = conn.flush().await;
                conn.reset_linger();
                return;
            }
        };

        let args = match frame.into_command_args() {
            Ok(args) => args,
            Err(e) => {
                let _ = conn.write_frame(&Frame::Error(format!("ERR {e}"))).await;
                let _ = conn.flush().await;
                conn.reset_linger();
                return;
            }
        };

        let reply = dispatch(args, &ctx, &mut session).await;
        if conn.write_frame(&reply).await.is_err() {
            return;
        }
        if conn.flush().await.is_err() {
            return;
        }
    }
}

async fn dispatch(args: Vec<bytes::Bytes>, ctx: &Context, session: &mut Session) -> Frame {
    let command = match Command::from_args(args) {
        Ok(c) => c,
        Err(e) => return Frame::Error(e.as_resp_message()),
    };

    if ctx.config.requirepass.is_some() && !session.authenticated && !command.is_safe() {
        return Frame::Error(CommandError::AuthRequired.as_resp_message());
    }

    command.apply(ctx, session).await
}

async fn everysec_flusher(aof: Arc<Aof>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if let Err(e) = aof.flush().await {
            tracing::error!(error = %e, "periodic AOF flush failed");
        }
    }
}

async fn rdb_scheduler_task(ctx: Arc<Context>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if !ctx.rdb.any_rule_due() {
            continue;
        }
        if !ctx.rdb.try_begin_bgsave() {
            continue;
        }
        let path = ctx.rdb_path();
        let db = ctx.db.clone();
        let rdb_sched = ctx.rdb.clone();
        tokio::spawn(async move {
            match rdb::save(&path, &db).await {
                Ok(()) => rdb_sched.reset_all(),
                Err(e) => tracing::error!(error = %e, "scheduled RDB save failed"),
            }
            rdb_sched.end_bgsave();
        });
    }
}
