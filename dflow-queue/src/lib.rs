//! Work queue and request queue (spec §4.4, §4.5): the two matching data
//! structures a server owns. Adding a work unit and registering a worker's
//! `get` request are the two halves of the same match; `dflow-server`
//! drives both from its single-threaded event loop (spec §5) and this
//! crate stays ignorant of notification/reply plumbing, same split as
//! `dflow-store`/`dflow-subscribe`.

pub mod request;
pub mod work;

pub use request::{Request, RequestQueue};
pub use work::{HostDirectory, WorkQueue};
