use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `GET key` (spec §4.2, §4.7).
pub struct Get {
    key: Bytes,
}

impl Get {
    pub fn parse(args: &[Bytes]) -> Result<Get, CommandError> {
        match args {
            [key] => Ok(Get { key: key.clone() }),
            _ => Err(arity_err("GET")),
        }
    }

    pub fn apply(self, ctx: &Context) -> Frame {
        match ctx.db.get(&self.key) {
            Some(value) => Frame::Bulk(value),
            None => Frame::Null,
        }
    }
}
