use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `EXISTS key [key ...]` (spec §4.2, §4.7).
pub struct Exists {
    keys: Vec<Bytes>,
}

impl Exists {
    pub fn parse(args: &[Bytes]) -> Result<Exists, CommandError> {
        if args.is_empty() {
            return Err(arity_err("EXISTS"));
        }
        Ok(Exists { keys: args.to_vec() })
    }

    pub fn apply(self, ctx: &Context) -> Frame {
        let count = self.keys.iter().filter(|k| ctx.db.exists(k)).count();
        Frame::Integer(count as i64)
    }
}
