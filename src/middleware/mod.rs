mod guard;

pub use guard::{Guard, RequestContext, RouteBinding, RouteTable};
