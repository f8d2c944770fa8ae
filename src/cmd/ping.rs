use bytes::Bytes;

use super::arity_err;
use crate::error::CommandError;
use crate::resp::Frame;

/// `PING [message]`: replies `PONG`, or echoes `message` back if given.
/// Permitted before authentication so a client can health-check a
/// connection before sending `AUTH`.
pub struct Ping {
    message: Option<Bytes>,
}

impl Ping {
    pub fn parse(args: &[Bytes]) -> Result<Ping, CommandError> {
        match args {
            [] => Ok(Ping { message: None }),
            [message] => Ok(Ping {
                message: Some(message.clone()),
            }),
            _ => Err(arity_err("PING")),
        }
    }

    pub fn apply(self) -> Frame {
        match self.message {
            None => Frame::Simple("PONG".into()),
            Some(message) => Frame::Bulk(message),
        }
    }
}
