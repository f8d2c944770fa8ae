use bytes::Bytes;

use super::{arity_err, err_frame};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `BGREWRITEAOF`: compacts the append-only file in the background
/// (spec §4.4, §5). A no-op error if AOF is disabled; rejected if a
/// rewrite is already running.
pub struct BgRewriteAof;

impl BgRewriteAof {
    pub fn parse(args: &[Bytes]) -> Result<BgRewriteAof, CommandError> {
        if !args.is_empty() {
            return Err(arity_err("BGREWRITEAOF"));
        }
        Ok(BgRewriteAof)
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        let Some(aof) = ctx.aof.clone() else {
            return Frame::Error(
                "ERR Background append only file rewriting not possible: AOF disabled".into(),
            );
        };

        if !aof.try_begin_rewrite() {
            return err_frame(CommandError::BgrewriteaofBusy);
        }

        let db = ctx.db.clone();
        tokio::spawn(async move {
            if let Err(e) = aof.rewrite(&db).await {
                tracing::error!(error = %e, "background AOF rewrite failed");
            }
            aof.end_rewrite();
        });

        Frame::Simple("Background append only file rewriting started".into())
    }
}
