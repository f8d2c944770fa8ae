use bytes::Bytes;

use super::{arity_err, err_frame};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::server::Context;
use crate::session::Session;

/// `AUTH password` (spec §4.6). One of the two commands allowed before
/// authentication when `requirepass` is configured.
pub struct Auth {
    password: Bytes,
}

impl Auth {
    pub fn parse(args: &[Bytes]) -> Result<Auth, CommandError> {
        match args {
            [password] => Ok(Auth {
                password: password.clone(),
            }),
            _ => Err(arity_err("AUTH")),
        }
    }

    pub fn apply(self, ctx: &Context, session: &mut Session) -> Frame {
        let Some(expected) = &ctx.config.requirepass else {
            return Frame::Error("ERR Client sent AUTH, but no password is set".into());
        };

        if expected.as_bytes() == self.password.as_ref() {
            session.authenticated = true;
            Frame::Simple("OK".into())
        } else {
            session.authenticated = false;
            err_frame(CommandError::BadPassword)
        }
    }
}
