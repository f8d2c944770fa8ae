use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::rdb;
use crate::resp::Frame;
use crate::server::Context;

/// `SAVE`: foreground snapshot, blocks the caller until the write and
/// verifying re-read complete (spec §4.5, §6).
pub struct Save;

impl Save {
    pub fn parse(args: &[Bytes]) -> Result<Save, CommandError> {
        if !args.is_empty() {
            return Err(arity_err("SAVE"));
        }
        Ok(Save)
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        match rdb::save(&ctx.rdb_path(), &ctx.db).await {
            Ok(()) => {
                ctx.rdb.reset_all();
                Frame::Simple("OK".into())
            }
            Err(e) => Frame::Error(format!("ERR {e}")),
        }
    }
}
