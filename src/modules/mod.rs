//! Built-in feature modules.
//!
//! Each module wires itself into the engine through the public
//! extension points only: command registry, mode watchers, x-line
//! factories, event providers and pre-command hooks. They are the same
//! interfaces an out-of-tree module would use.

mod banredirect;
mod restrictchans;
mod sethost;
mod shun;
mod svshold;

use crate::server::Server;

pub fn register_core_modules(server: &mut Server) {
    shun::init(server);
    svshold::init(server);
    sethost::init(server);
    banredirect::init(server);
    restrictchans::init(server);
}
