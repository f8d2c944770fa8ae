//! Per-connection client session state (spec §3 "Client session").

pub struct Session {
    pub authenticated: bool,
}

impl Session {
    pub fn new() -> Session {
        Session { authenticated: false }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}
