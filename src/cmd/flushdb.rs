use bytes::Bytes;

use super::{arity_err, record_mutation};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `FLUSHDB` (spec §4.2, §4.7).
pub struct FlushDb;

impl FlushDb {
    pub fn parse(args: &[Bytes]) -> Result<FlushDb, CommandError> {
        if !args.is_empty() {
            return Err(arity_err("FLUSHDB"));
        }
        Ok(FlushDb)
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        ctx.db.flush();
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"FLUSHDB"));
        record_mutation(ctx, &frame).await;
        Frame::Simple("OK".into())
    }
}
