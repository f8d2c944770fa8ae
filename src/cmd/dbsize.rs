use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `DBSIZE` (spec §4.2, §4.7).
pub struct Dbsize;

impl Dbsize {
    pub fn parse(args: &[Bytes]) -> Result<Dbsize, CommandError> {
        if !args.is_empty() {
            return Err(arity_err("DBSIZE"));
        }
        Ok(Dbsize)
    }

    pub fn apply(self, ctx: &Context) -> Frame {
        Frame::Integer(ctx.db.dbsize() as i64)
    }
}
