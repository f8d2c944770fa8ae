use bytes::Bytes;

use super::{arity_err, record_mutation};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `EXPIRE key seconds` (spec §4.2, §4.7).
pub struct Expire {
    key: Bytes,
    seconds: i64,
}

impl Expire {
    pub fn parse(args: &[Bytes]) -> Result<Expire, CommandError> {
        match args {
            [key, seconds] => {
                let seconds = std::str::from_utf8(seconds)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| arity_err("EXPIRE"))?;
                Ok(Expire {
                    key: key.clone(),
                    seconds,
                })
            }
            _ => Err(arity_err("EXPIRE")),
        }
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        let result = ctx.db.set_expire(&self.key, self.seconds);
        if result == 1 {
            let mut frame = Frame::array();
            frame.push_bulk(Bytes::from_static(b"EXPIRE"));
            frame.push_bulk(self.key);
            frame.push_bulk(Bytes::from(self.seconds.to_string()));
            record_mutation(ctx, &frame).await;
        }
        Frame::Integer(result as i64)
    }
}
