use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `KEYS pattern` (spec §4.2, §4.7). Glob matching is binary-safe.
pub struct Keys {
    pattern: Bytes,
}

impl Keys {
    pub fn parse(args: &[Bytes]) -> Result<Keys, CommandError> {
        match args {
            [pattern] => Ok(Keys {
                pattern: pattern.clone(),
            }),
            _ => Err(arity_err("KEYS")),
        }
    }

    pub fn apply(self, ctx: &Context) -> Frame {
        let mut frame = Frame::array();
        for key in ctx.db.keys(&self.pattern) {
            frame.push_bulk(key);
        }
        frame
    }
}
