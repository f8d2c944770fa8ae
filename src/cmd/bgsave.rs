use bytes::Bytes;

use super::{arity_err, err_frame};
use crate::error::CommandError;
use crate::rdb;
use crate::resp::Frame;
use crate::server::Context;

/// `BGSAVE`: forks off a background snapshot and returns immediately
/// (spec §4.5, §6). Rejected with an error if one is already running.
pub struct BgSave;

impl BgSave {
    pub fn parse(args: &[Bytes]) -> Result<BgSave, CommandError> {
        if !args.is_empty() {
            return Err(arity_err("BGSAVE"));
        }
        Ok(BgSave)
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        if !ctx.rdb.try_begin_bgsave() {
            return err_frame(CommandError::BgsaveBusy);
        }

        let path = ctx.rdb_path();
        let db = ctx.db.clone();
        let rdb_sched = ctx.rdb.clone();
        tokio::spawn(async move {
            match rdb::save(&path, &db).await {
                Ok(()) => rdb_sched.reset_all(),
                Err(e) => tracing::error!(error = %e, "background save failed"),
            }
            rdb_sched.end_bgsave();
        });

        Frame::Simple("Background saving started".into())
    }
}
