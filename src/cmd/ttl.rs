use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `TTL key` (spec §4.2, §4.7).
pub struct Ttl {
    key: Bytes,
}

impl Ttl {
    pub fn parse(args: &[Bytes]) -> Result<Ttl, CommandError> {
        match args {
            [key] => Ok(Ttl { key: key.clone() }),
            _ => Err(arity_err("TTL")),
        }
    }

    pub fn apply(self, ctx: &Context) -> Frame {
        Frame::Integer(ctx.db.ttl(&self.key))
    }
}
