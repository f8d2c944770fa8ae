use bytes::Bytes;

use super::{arity_err, record_mutation};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;

/// `DEL key [key ...]`, returns the count of keys actually removed
/// (spec §4.2, §4.7).
pub struct Del {
    keys: Vec<Bytes>,
}

impl Del {
    pub fn parse(args: &[Bytes]) -> Result<Del, CommandError> {
        if args.is_empty() {
            return Err(arity_err("DEL"));
        }
        Ok(Del { keys: args.to_vec() })
    }

    pub async fn apply(self, ctx: &Context) -> Frame {
        let removed: usize = self.keys.iter().map(|k| ctx.db.delete(k)).sum();
        if removed > 0 {
            let mut frame = Frame::array();
            frame.push_bulk(Bytes::from_static(b"DEL"));
            for key in &self.keys {
                frame.push_bulk(key.clone());
            }
            record_mutation(ctx, &frame).await;
        }
        Frame::Integer(removed as i64)
    }
}
