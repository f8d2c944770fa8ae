use bytes::Bytes;

use super::{arity_err, err_frame, record_mutation};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `SET key value` (spec §4.2, §4.7).
pub struct Set {
    key: Bytes,
    value: Bytes,
}

impl Set {
    pub fn parse(args: &[Bytes]) -> Result<Set, CommandError> {
        match args {
            [key, value] => Ok(Set {
                key: key.clone(),
                value: value.clone(),
            }),
            _ => Err(arity_err("SET")),
        }
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        match ctx.db.set(self.key.clone(), self.value.clone()) {
            Ok(()) => {
                let mut frame = Frame::array();
                frame.push_bulk(Bytes::from_static(b"SET"));
                frame.push_bulk(self.key);
                frame.push_bulk(self.value);
                record_mutation(ctx, &frame).await;
                Frame::Simple("OK".into())
            }
            Err(e) => err_frame(CommandError::from(e)),
        }
    }
}
