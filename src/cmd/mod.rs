//! Command handlers (C7): one small type per command, each owning its own
//! argument parsing and execution. See spec §4.7.

mod auth;
mod bgrewriteaof;
mod bgsave;
mod dbsize;
mod del;
mod exists;
mod expire;
mod flushdb;
mod get;
mod keys;
mod ping;
mod save;
mod set;
mod ttl;

use bytes::Bytes;

use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;
use crate::session::Session;

pub use auth::Auth;
pub use bgrewriteaof::BgRewriteAof;
pub use bgsave::BgSave;
pub use dbsize::Dbsize;
pub use del::Del;
pub use exists::Exists;
pub use expire::Expire;
pub use flushdb::FlushDb;
pub use get::Get;
pub use keys::Keys;
pub use ping::Ping;
pub use save::Save;
pub use set::Set;
pub use ttl::Ttl;

pub enum Command {
    CommandInfo,
    Auth(Auth),
    Set(Set),
    Get(Get),
    Del(Del),
    Exists(Exists),
    Keys(Keys),
    Expire(Expire),
    Ttl(Ttl),
    Dbsize(Dbsize),
    FlushDb(FlushDb),
    Save(Save),
    BgSave(BgSave),
    BgRewriteAof(BgRewriteAof),
    Ping(Ping),
}

impl Command {
    /// Looks up the command name (case-insensitively) and parses its
    /// arguments. `args` is the full top-level array including the
    /// command name at index 0, per spec §4.6.
    pub fn from_args(mut args: Vec<Bytes>) -> Result<Command, CommandError> {
        if args.is_empty() {
            return Err(CommandError::UnknownCommand);
        }
        let name_bytes = args.remove(0);
        let name = String::from_utf8_lossy(&name_bytes).to_ascii_uppercase();
        let rest = args;

        Ok(match name.as_str() {
            "COMMAND" => Command::CommandInfo,
            "AUTH" => Command::Auth(Auth::parse(&rest)?),
            "SET" => Command::Set(Set::parse(&rest)?),
            "GET" => Command::Get(Get::parse(&rest)?),
            "DEL" => Command::Del(Del::parse(&rest)?),
            "EXISTS" => Command::Exists(Exists::parse(&rest)?),
            "KEYS" => Command::Keys(Keys::parse(&rest)?),
            "EXPIRE" => Command::Expire(Expire::parse(&rest)?),
            "TTL" => Command::Ttl(Ttl::parse(&rest)?),
            "DBSIZE" => Command::Dbsize(Dbsize::parse(&rest)?),
            "FLUSHDB" => Command::FlushDb(FlushDb::parse(&rest)?),
            "SAVE" => Command::Save(Save::parse(&rest)?),
            "BGSAVE" => Command::BgSave(BgSave::parse(&rest)?),
            "BGREWRITEAOF" => Command::BgRewriteAof(BgRewriteAof::parse(&rest)?),
            "PING" => Command::Ping(Ping::parse(&rest)?),
            _ => return Err(CommandError::UnknownCommand),
        })
    }

    /// Safe commands are permitted before authentication (spec §4.6).
    pub fn is_safe(&self) -> bool {
        matches!(self, Command::CommandInfo | Command::Auth(_) | Command::Ping(_))
    }

    pub async fn apply(self, ctx: &Context, session: &mut Session) -> Frame {
        match self {
            Command::CommandInfo => Frame::Simple("OK".into()),
            Command::Auth(c) => c.apply(ctx, session),
            Command::Set(c) => c.apply(ctx).await,
            Command::Get(c) => c.apply(ctx),
            Command::Del(c) => c.apply(ctx).await,
            Command::Exists(c) => c.apply(ctx),
            Command::Keys(c) => c.apply(ctx),
            Command::Expire(c) => c.apply(ctx).await,
            Command::Ttl(c) => c.apply(ctx),
            Command::Dbsize(c) => c.apply(ctx),
            Command::FlushDb(c) => c.apply(ctx).await,
            Command::Save(c) => c.apply(ctx).await,
            Command::BgSave(c) => c.apply(ctx).await,
            Command::BgRewriteAof(c) => c.apply(ctx).await,
            Command::Ping(c) => c.apply(),
        }
    }
}

/// Appends a just-applied mutating command's frame to the AOF (if enabled)
/// and marks the RDB scheduler's dirty counters, per spec §4.4/§4.5's "on
/// every mutating command" rules. Shared by every mutating command's
/// `apply`.
async fn record_mutation(ctx: &Context, frame: &Frame) {
    if let Some(aof) = &ctx.aof {
        if let Err(e) = aof.append(frame).await {
            tracing::error!(error = %e, "AOF append failed");
        }
    }
    ctx.rdb.mark_dirty();
}

fn arity_err(cmd: &str) -> CommandError {
    CommandError::Arity(cmd.to_string())
}

fn err_frame(e: CommandError) -> Frame {
    Frame::Error(e.as_resp_message())
}

/// Applies only the keyspace-mutating effect of a replayed AOF command,
/// bypassing authentication, AOF re-append, and client replies entirely
/// (spec §4.4). Unknown or malformed replay entries are ignored: the AOF
/// is assumed to have been produced by this same server.
pub fn apply_for_replay(db: &crate::db::Db, mut args: Vec<Bytes>) {
    if args.is_empty() {
        return;
    }
    let name = String::from_utf8_lossy(&args.remove(0)).to_ascii_uppercase();
    match name.as_str() {
        "SET" if args.len() == 2 => {
            let value = args.pop().unwrap();
            let key = args.pop().unwrap();
            let _ = db.set(key, value);
        }
        "DEL" => {
            for key in args {
                db.delete(&key);
            }
        }
        "EXPIRE" if args.len() == 2 => {
            let secs: i64 = String::from_utf8_lossy(&args[1]).parse().unwrap_or(0);
            db.set_expire(&args[0], secs);
        }
        "FLUSHDB" => db.flush(),
        _ => {}
    }
}
